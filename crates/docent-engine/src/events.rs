//! Normalized events consumed by the dispatch and feedback flows.

use serde::{Deserialize, Serialize};

/// A top-level channel message after transport normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    /// Synthetic or edited-away messages; never dispatched.
    pub hidden: bool,
}

impl InboundMessage {
    /// True when the message is a reply inside an existing thread rather
    /// than a thread root.
    pub fn is_thread_reply(&self) -> bool {
        self.thread_ts
            .as_deref()
            .is_some_and(|thread_ts| thread_ts != self.ts)
    }

    /// The thread timestamp a reply to this message should be sent under.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(self.ts.as_str())
    }
}

/// Which of the two feedback buttons was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackKind {
    Answered,
    StillNeedsHelp,
}

impl FeedbackKind {
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id {
            crate::render::ACTION_ID_ANSWERED => Some(Self::Answered),
            crate::render::ACTION_ID_QUESTION => Some(Self::StillNeedsHelp),
            _ => None,
        }
    }

    pub fn action_id(&self) -> &'static str {
        match self {
            Self::Answered => crate::render::ACTION_ID_ANSWERED,
            Self::StillNeedsHelp => crate::render::ACTION_ID_QUESTION,
        }
    }
}

/// A button click on a previously dispatched reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackInteraction {
    pub channel_id: String,
    pub user_id: String,
    /// Timestamp of the bot reply message carrying the buttons.
    pub message_ts: String,
    /// Thread root of that message, when it lives inside a thread.
    pub message_thread_ts: Option<String>,
    /// Text of the bot reply message, preserved when stripping buttons.
    pub message_text: String,
    pub kind: FeedbackKind,
}

impl FeedbackInteraction {
    /// The correlation key: the thread the original reply was sent under.
    pub fn thread_ts(&self) -> &str {
        self.message_thread_ts
            .as_deref()
            .unwrap_or(self.message_ts.as_str())
    }
}
