//! Socket Mode session loop: ack envelopes, normalize events, and hand each
//! one to the engine in its own task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use docent_engine::{
    ChatTransport, Dispatcher, FeedbackInteraction, FeedbackKind, InboundMessage,
    InteractionHandler, PostedMessage, ReplyPayload, TransportError,
};
use docent_store::TriageStore;

mod slack_api_client;


pub use slack_api_client::SlackApiClient;

/// Runtime configuration for the Slack triage transport loop.
#[derive(Clone)]
pub struct SlackTriageRuntimeConfig {
    pub api_base: String,
    pub app_token: String,
    pub bot_token: String,
    /// Resolved via `auth.test` when absent.
    pub bot_user_id: Option<String>,
    pub request_timeout_ms: u64,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackSocketEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

/// One normalized socket frame.
#[derive(Debug, Clone, PartialEq)]
enum SocketEvent {
    Message(InboundMessage),
    Interaction(FeedbackInteraction),
    /// Slack asked us to reconnect; ends the session cleanly.
    Disconnect,
    Ignored,
}

/// How a socket session ended: an operator shutdown stops the reconnect
/// loop, anything else opens a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Disconnected,
}

fn should_reconnect(end: SessionEnd) -> bool {
    matches!(end, SessionEnd::Disconnected)
}

/// Runs the Slack Socket Mode triage loop until ctrl-c.
pub async fn run_slack_triage(
    config: SlackTriageRuntimeConfig,
    store: Arc<dyn TriageStore>,
) -> Result<()> {
    let runtime = SlackTriageRuntime::new(config, store).await?;
    runtime.run().await
}

struct SlackTriageRuntime {
    config: SlackTriageRuntimeConfig,
    client: Arc<SlackApiClient>,
    dispatcher: Arc<Dispatcher>,
    interactions: Arc<InteractionHandler>,
    bot_user_id: String,
}

impl SlackTriageRuntime {
    async fn new(config: SlackTriageRuntimeConfig, store: Arc<dyn TriageStore>) -> Result<Self> {
        let client = Arc::new(SlackApiClient::new(
            config.api_base.clone(),
            config.app_token.clone(),
            config.bot_token.clone(),
            config.request_timeout_ms,
        )?);

        let bot_user_id = match config.bot_user_id.clone() {
            Some(user_id) if !user_id.trim().is_empty() => user_id.trim().to_string(),
            _ => client.resolve_bot_user_id().await?,
        };

        let transport: Arc<dyn ChatTransport> = client.clone();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), transport.clone()));
        let interactions = Arc::new(InteractionHandler::new(store, transport));

        Ok(Self {
            config,
            client,
            dispatcher,
            interactions,
            bot_user_id,
        })
    }

    async fn run(&self) -> Result<()> {
        loop {
            let socket_url = match self.client.open_socket_connection().await {
                Ok(url) => url,
                Err(error) => {
                    eprintln!("docent failed to open socket connection: {error}");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            println!("docent shutdown requested");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                    continue;
                }
            };

            println!("docent socket connected");
            match self.run_socket_session(&socket_url).await {
                Ok(end) if !should_reconnect(end) => {
                    println!("docent shutdown requested");
                    return Ok(());
                }
                Ok(_) => {}
                Err(error) => {
                    eprintln!("docent socket session error: {error}");
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("docent shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn run_socket_session(&self, socket_url: &str) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .context("failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(SessionEnd::Shutdown);
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(SessionEnd::Disconnected);
                    };
                    let message = message_result.context("failed reading slack websocket message")?;
                    let Some(envelope) = decode_socket_frame(message) else {
                        continue;
                    };
                    // Acknowledge before any other side effect; the ack is
                    // the transport-level idempotent acknowledgment.
                    if let Some(envelope_id) = envelope.envelope_id.as_deref() {
                        ack_envelope(&mut sink, envelope_id).await?;
                    }
                    match normalize_socket_envelope(&envelope, &self.bot_user_id) {
                        Ok(SocketEvent::Message(message)) => self.spawn_dispatch(message),
                        Ok(SocketEvent::Interaction(interaction)) => {
                            self.spawn_feedback(interaction)
                        }
                        Ok(SocketEvent::Disconnect) => return Ok(SessionEnd::Disconnected),
                        Ok(SocketEvent::Ignored) => {}
                        Err(error) => {
                            tracing::warn!(%error, "dropping malformed slack envelope");
                        }
                    }
                }
            }
        }
    }

    /// One task per event; unrelated events never block each other and a
    /// failed event is logged inside its own task.
    fn spawn_dispatch(&self, message: InboundMessage) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.dispatch(&message).await {
                Ok(outcome) => {
                    tracing::debug!(channel = %message.channel_id, ?outcome, "dispatch completed")
                }
                Err(error) => {
                    tracing::warn!(channel = %message.channel_id, %error, "dispatch failed")
                }
            }
        });
    }

    fn spawn_feedback(&self, interaction: FeedbackInteraction) {
        let handler = self.interactions.clone();
        tokio::spawn(async move {
            let outcome = handler.handle(&interaction).await;
            tracing::debug!(channel = %interaction.channel_id, ?outcome, "feedback resolved");
        });
    }
}

#[async_trait]
impl ChatTransport for SlackApiClient {
    async fn channel_name(&self, channel_id: &str) -> Result<String, TransportError> {
        self.conversation_name(channel_id)
            .await
            .map_err(|error| TransportError::api("conversations.info", error.to_string()))
    }

    async fn post_reply(
        &self,
        channel_id: &str,
        payload: &ReplyPayload,
        thread_ts: &str,
    ) -> Result<PostedMessage, TransportError> {
        let posted = self
            .post_message(
                channel_id,
                &payload.text,
                payload.blocks.as_ref(),
                Some(thread_ts),
            )
            .await
            .map_err(|error| TransportError::api("chat.postMessage", error.to_string()))?;
        Ok(PostedMessage {
            channel: posted.channel,
            ts: posted.ts,
        })
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        timestamp: &str,
        reaction: &str,
    ) -> Result<(), TransportError> {
        SlackApiClient::add_reaction(self, channel_id, timestamp, reaction)
            .await
            .map_err(|error| TransportError::api("reactions.add", error.to_string()))
    }

    async fn strip_message_blocks(
        &self,
        channel_id: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        self.clear_message_blocks(channel_id, ts, text)
            .await
            .map_err(|error| TransportError::api("chat.update", error.to_string()))
    }
}

async fn ack_envelope<S>(sink: &mut S, envelope_id: &str) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    sink.send(WsMessage::Text(ack.into()))
        .await
        .context("failed to send slack socket ack")
}

/// A frame that fails to parse is dropped with a diagnostic; it never ends
/// the session.
fn decode_socket_frame(message: WsMessage) -> Option<SlackSocketEnvelope> {
    match parse_socket_envelope(message) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, "dropping unparseable slack socket frame");
            None
        }
    }
}

fn parse_socket_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    match message {
        WsMessage::Text(text) => {
            let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Binary(bytes) => {
            let text =
                String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?;
            let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct SlackEventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    event: SlackMessageEventPayload,
}

#[derive(Debug, Deserialize)]
struct SlackMessageEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    hidden: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SlackBlockActionsPayload {
    #[serde(rename = "type")]
    payload_type: String,
    channel: Option<SlackObjectId>,
    user: Option<SlackObjectId>,
    message: Option<SlackInteractionMessage>,
    #[serde(default)]
    actions: Vec<SlackBlockAction>,
}

#[derive(Debug, Deserialize)]
struct SlackObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SlackInteractionMessage {
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackBlockAction {
    action_id: String,
}

fn normalize_socket_envelope(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
) -> Result<SocketEvent> {
    match envelope.envelope_type.as_str() {
        "disconnect" => Ok(SocketEvent::Disconnect),
        "events_api" => normalize_message_envelope(&envelope.payload, bot_user_id),
        "interactive" => normalize_interactive_envelope(&envelope.payload),
        _ => Ok(SocketEvent::Ignored),
    }
}

fn normalize_message_envelope(payload: &Value, bot_user_id: &str) -> Result<SocketEvent> {
    let callback = serde_json::from_value::<SlackEventCallbackEnvelope>(payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(SocketEvent::Ignored);
    }

    let event = callback.event;
    if event.event_type != "message" {
        return Ok(SocketEvent::Ignored);
    }
    // Bot-authored and self-authored traffic never reaches the engine.
    if event.bot_id.is_some() || event.subtype.as_deref() == Some("bot_message") {
        return Ok(SocketEvent::Ignored);
    }
    let user_id = match event.user {
        Some(user) if !user.trim().is_empty() => user,
        _ => return Ok(SocketEvent::Ignored),
    };
    if user_id == bot_user_id {
        return Ok(SocketEvent::Ignored);
    }
    let channel_id = match event.channel {
        Some(channel) if !channel.trim().is_empty() => channel,
        _ => return Ok(SocketEvent::Ignored),
    };
    let ts = match event.ts {
        Some(ts) if !ts.trim().is_empty() => ts,
        _ => return Ok(SocketEvent::Ignored),
    };

    // Subtyped messages (joins, edits, tombstones) are synthetic; the
    // dispatcher treats them like Slack's own hidden flag.
    let hidden = event.hidden.unwrap_or(false) || event.subtype.is_some();

    Ok(SocketEvent::Message(InboundMessage {
        channel_id,
        user_id,
        text: event.text.unwrap_or_default(),
        ts,
        thread_ts: event.thread_ts,
        hidden,
    }))
}

fn normalize_interactive_envelope(payload: &Value) -> Result<SocketEvent> {
    let payload = serde_json::from_value::<SlackBlockActionsPayload>(payload.clone())
        .context("failed to decode slack interactive payload")?;
    if payload.payload_type != "block_actions" {
        return Ok(SocketEvent::Ignored);
    }

    let (Some(channel), Some(user), Some(message)) =
        (payload.channel, payload.user, payload.message)
    else {
        return Ok(SocketEvent::Ignored);
    };
    let Some(action) = payload.actions.first() else {
        return Ok(SocketEvent::Ignored);
    };
    let Some(kind) = FeedbackKind::from_action_id(&action.action_id) else {
        return Ok(SocketEvent::Ignored);
    };

    Ok(SocketEvent::Interaction(FeedbackInteraction {
        channel_id: channel.id,
        user_id: user.id,
        message_ts: message.ts,
        message_thread_ts: message.thread_ts,
        message_text: message.text.unwrap_or_default(),
        kind,
    }))
}
