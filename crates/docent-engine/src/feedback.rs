//! Feedback path: correlate a button click back to its dispatch, count it,
//! and close the loop with an ack reply, a reaction, and a button strip.

use crate::events::{FeedbackInteraction, FeedbackKind};
use crate::render::{
    render_ack, FALLBACK_FAIL_MESSAGE, FALLBACK_FAIL_REACTION, FALLBACK_SUCCESS_MESSAGE,
    FALLBACK_SUCCESS_REACTION,
};
use crate::transport::ChatTransport;
use docent_store::{CounterKind, Rule, TriageStore};
use std::sync::Arc;

/// What actually happened while resolving one interaction. Side-effect
/// failures are reflected here rather than propagated; the transport
/// acknowledgment has already been sent by the time the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackOutcome {
    /// The rule attributed via the dispatch record, when one existed.
    pub rule_id: Option<i64>,
    pub ack_sent: bool,
    pub reaction_added: bool,
    pub buttons_stripped: bool,
}

/// Orchestrates the feedback path for button interactions.
pub struct InteractionHandler {
    store: Arc<dyn TriageStore>,
    transport: Arc<dyn ChatTransport>,
}

impl InteractionHandler {
    pub fn new(store: Arc<dyn TriageStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { store, transport }
    }

    /// Handles one button click. Terminal after one pass; each side effect
    /// has its own failure boundary and a failure in one never blocks the
    /// others.
    pub async fn handle(&self, interaction: &FeedbackInteraction) -> FeedbackOutcome {
        let thread_ts = interaction.thread_ts();

        let record = match self.store.dispatch_for_thread(thread_ts).await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(thread_ts, %error, "dispatch correlation failed; using fallback text");
                None
            }
        };

        let rule = match &record {
            Some(record) => match self.store.rule_by_id(record.rule_id).await {
                Ok(rule) => rule,
                Err(error) => {
                    tracing::warn!(
                        rule_id = record.rule_id,
                        %error,
                        "rule lookup failed; using fallback text"
                    );
                    None
                }
            },
            None => None,
        };

        let (text, reaction) = feedback_response(rule.as_ref(), interaction.kind);

        if let Some(record) = &record {
            let kind = match interaction.kind {
                FeedbackKind::Answered => CounterKind::Success,
                FeedbackKind::StillNeedsHelp => CounterKind::Fail,
            };
            if let Err(error) = self.store.increment_counter(record.rule_id, kind).await {
                tracing::warn!(rule_id = record.rule_id, %error, "failed to increment feedback counter");
            }
        }

        let ack_sent = match self
            .transport
            .post_reply(&interaction.channel_id, &render_ack(&text), thread_ts)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(thread_ts, %error, "failed to send feedback follow-up");
                false
            }
        };

        // Reaction lands on the original inbound message (the thread root);
        // the button strip rewrites the bot reply the click came from.
        let (reaction_result, strip_result) = tokio::join!(
            self.transport
                .add_reaction(&interaction.channel_id, thread_ts, &reaction),
            self.transport.strip_message_blocks(
                &interaction.channel_id,
                &interaction.message_ts,
                &interaction.message_text,
            ),
        );

        let reaction_added = match reaction_result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(thread_ts, %error, "failed to add feedback reaction");
                false
            }
        };
        let buttons_stripped = match strip_result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    ts = %interaction.message_ts,
                    %error,
                    "failed to strip buttons from reply"
                );
                false
            }
        };

        FeedbackOutcome {
            rule_id: record.map(|record| record.rule_id),
            ack_sent,
            reaction_added,
            buttons_stripped,
        }
    }
}

/// Per-rule custom text and reaction are authoritative when present;
/// engine-wide constants are the fallback.
fn feedback_response(rule: Option<&Rule>, kind: FeedbackKind) -> (String, String) {
    match kind {
        FeedbackKind::Answered => (
            rule.and_then(|rule| rule.success_message.clone())
                .unwrap_or_else(|| FALLBACK_SUCCESS_MESSAGE.to_string()),
            rule.and_then(|rule| rule.success_reaction.clone())
                .unwrap_or_else(|| FALLBACK_SUCCESS_REACTION.to_string()),
        ),
        FeedbackKind::StillNeedsHelp => (
            rule.and_then(|rule| rule.fail_message.clone())
                .unwrap_or_else(|| FALLBACK_FAIL_MESSAGE.to_string()),
            rule.and_then(|rule| rule.fail_reaction.clone())
                .unwrap_or_else(|| FALLBACK_FAIL_REACTION.to_string()),
        ),
    }
}
