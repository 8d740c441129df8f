//! Trait seam the chat transport implements; fakes substitute in tests.

use crate::render::ReplyPayload;
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by transport calls.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chat api {operation} failed: {detail}")]
    Api { operation: String, detail: String },
}

impl TransportError {
    pub fn api(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// A message the transport posted, identified by channel and timestamp.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

/// Outbound chat operations the engine needs. All calls are potentially
/// long-latency I/O and run inside the event's own task.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Resolves a channel identifier to its human-readable name.
    async fn channel_name(&self, channel_id: &str) -> Result<String, TransportError>;

    /// Posts a rendered reply under `thread_ts`.
    async fn post_reply(
        &self,
        channel_id: &str,
        payload: &ReplyPayload,
        thread_ts: &str,
    ) -> Result<PostedMessage, TransportError>;

    /// Adds a reaction to the message at `timestamp`.
    async fn add_reaction(
        &self,
        channel_id: &str,
        timestamp: &str,
        reaction: &str,
    ) -> Result<(), TransportError>;

    /// Rewrites the message at `ts` to `text` with no interactive blocks.
    async fn strip_message_blocks(
        &self,
        channel_id: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), TransportError>;
}
