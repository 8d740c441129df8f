//! Dispatch orchestration: resolve channel, match, render, send, record.

use crate::events::InboundMessage;
use crate::matcher::select_rule;
use crate::render::{render_reply, resolve_template};
use crate::transport::{ChatTransport, TransportError};
use chrono::Utc;
use docent_store::{CounterKind, DispatchRecord, TriageStore, TriageStoreError};
use std::sync::Arc;
use thiserror::Error;

/// Bound on the audit copy of inbound text kept in the dispatch record.
const AUDIT_TEXT_MAX_CHARS: usize = 500;

/// Errors that prevent a dispatch from producing a reply. Silence is the
/// designed user-visible failure mode; these surface for diagnostics only.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to resolve channel name: {0}")]
    ChannelResolve(#[source] TransportError),
    #[error("failed to fetch rules: {0}")]
    RuleFetch(#[source] TriageStoreError),
    #[error("failed to send reply: {0}")]
    Send(#[source] TransportError),
}

/// Why an inbound message was not eligible for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ThreadReply,
    Hidden,
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored(IgnoreReason),
    NoRuleConfigured,
    Replied { rule_id: i64, thread_ts: String },
}

/// Orchestrates the dispatch path for inbound messages.
pub struct Dispatcher {
    store: Arc<dyn TriageStore>,
    transport: Arc<dyn ChatTransport>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TriageStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { store, transport }
    }

    /// Handles one top-level inbound message: select a rule, send the
    /// rendered reply in-thread, then record the dispatch and bump the
    /// rule's sent counter.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
    ) -> Result<DispatchOutcome, DispatchError> {
        if message.hidden {
            return Ok(DispatchOutcome::Ignored(IgnoreReason::Hidden));
        }
        if message.is_thread_reply() {
            return Ok(DispatchOutcome::Ignored(IgnoreReason::ThreadReply));
        }

        let channel = self
            .transport
            .channel_name(&message.channel_id)
            .await
            .map_err(DispatchError::ChannelResolve)?;

        let rules = self
            .store
            .rules_for_channel(&channel)
            .await
            .map_err(DispatchError::RuleFetch)?;
        let default_rule = self
            .store
            .default_rule_for_channel(&channel)
            .await
            .map_err(DispatchError::RuleFetch)?;

        let Some(rule) = select_rule(&rules, default_rule.as_ref(), &message.text) else {
            tracing::info!(
                channel = %channel,
                ts = %message.ts,
                "no rule matched and no default configured; message left unanswered"
            );
            return Ok(DispatchOutcome::NoRuleConfigured);
        };

        let text = resolve_template(&rule.response_template, &message.user_id);
        let payload = render_reply(
            &text,
            rule.show_buttons,
            rule.success_label.as_deref(),
            rule.fail_label.as_deref(),
        );

        let thread_ts = message.reply_thread_ts().to_string();
        self.transport
            .post_reply(&message.channel_id, &payload, &thread_ts)
            .await
            .map_err(DispatchError::Send)?;

        let record = DispatchRecord {
            thread_ts: thread_ts.clone(),
            rule_id: rule.id,
            channel: channel.clone(),
            original_text: truncate_chars(&message.text, AUDIT_TEXT_MAX_CHARS),
            dispatched_at: Utc::now(),
        };
        if let Err(error) = self.store.record_dispatch(record).await {
            tracing::warn!(
                rule_id = rule.id,
                thread_ts = %thread_ts,
                %error,
                "failed to record dispatch; feedback on this thread will use fallback text"
            );
        }
        if let Err(error) = self.store.increment_counter(rule.id, CounterKind::Sent).await {
            tracing::warn!(rule_id = rule.id, %error, "failed to increment sent counter");
        }

        Ok(DispatchOutcome::Replied {
            rule_id: rule.id,
            thread_ts,
        })
    }
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
