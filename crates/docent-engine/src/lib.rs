//! Rule-driven dispatch and feedback-correlation engine.
//!
//! The engine selects a response for an inbound channel message from a
//! per-channel ordered rule set, renders a thread-scoped reply with optional
//! feedback buttons, and correlates later button clicks back to the rule
//! that produced the reply.

mod dispatch;
mod events;
mod feedback;
mod matcher;
mod render;
mod transport;


pub use dispatch::{DispatchError, DispatchOutcome, Dispatcher, IgnoreReason};
pub use events::{FeedbackInteraction, FeedbackKind, InboundMessage};
pub use feedback::{FeedbackOutcome, InteractionHandler};
pub use matcher::select_rule;
pub use render::{
    render_ack, render_reply, resolve_template, ReplyPayload, ACTION_ID_ANSWERED,
    ACTION_ID_QUESTION, DEFAULT_FAIL_LABEL, DEFAULT_SUCCESS_LABEL, FALLBACK_FAIL_MESSAGE,
    FALLBACK_FAIL_REACTION, FALLBACK_SUCCESS_MESSAGE, FALLBACK_SUCCESS_REACTION, USER_PLACEHOLDER,
};
pub use transport::{ChatTransport, PostedMessage, TransportError};
