//! Slack Web API client used by the triage transport loop.
//!
//! Calls are single-shot: the engine treats Web API failures as best-effort
//! logged degradations, so there is no retry or backoff layer here.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOkResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversationsInfoResponse {
    ok: bool,
    channel: Option<SlackConversationInfo>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversationInfo {
    name: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SlackPostedMessage {
    pub(crate) channel: String,
    pub(crate) ts: String,
}

/// Thin typed wrapper over the Slack Web API endpoints the triage loop
/// needs.
#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        app_token: String,
        bot_token: String,
        request_timeout_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("docent-triage"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    pub(crate) async fn resolve_bot_user_id(&self) -> Result<String> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", || {
                self.http
                    .post(format!("{}/auth.test", self.api_base))
                    .bearer_auth(&self.bot_token)
            })
            .await?;

        if !response.ok {
            bail!(
                "slack auth.test failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }

        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))
    }

    pub(crate) async fn open_socket_connection(&self) -> Result<String> {
        let response: SlackOpenSocketResponse = self
            .request_json("apps.connections.open", || {
                self.http
                    .post(format!("{}/apps.connections.open", self.api_base))
                    .bearer_auth(&self.app_token)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack apps.connections.open failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack apps.connections.open did not return url"))
    }

    pub(crate) async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<&Value>,
        thread_ts: Option<&str>,
    ) -> Result<SlackPostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks.clone();
        }
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;

        if !response.ok {
            bail!(
                "slack chat.postMessage failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(SlackPostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    /// Rewrites a message with an empty block set, removing its buttons
    /// while preserving the text.
    pub(crate) async fn clear_message_blocks(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<()> {
        let payload = json!({
            "channel": channel,
            "ts": ts,
            "text": text,
            "blocks": [],
        });
        let response: SlackChatMessageResponse = self
            .request_json("chat.update", || {
                self.http
                    .post(format!("{}/chat.update", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack chat.update failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    pub(crate) async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        name: &str,
    ) -> Result<()> {
        let payload = json!({
            "channel": channel,
            "timestamp": timestamp,
            "name": name,
        });
        let response: SlackOkResponse = self
            .request_json("reactions.add", || {
                self.http
                    .post(format!("{}/reactions.add", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack reactions.add failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    pub(crate) async fn conversation_name(&self, channel: &str) -> Result<String> {
        let response: SlackConversationsInfoResponse = self
            .request_json("conversations.info", || {
                self.http
                    .post(format!("{}/conversations.info", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .form(&[("channel", channel)])
            })
            .await?;
        if !response.ok {
            bail!(
                "slack conversations.info failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .channel
            .and_then(|info| info.name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack conversations.info did not return a channel name"))
    }

    async fn request_json<T, F>(&self, operation: &str, builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> reqwest::RequestBuilder,
    {
        let response = builder()
            .send()
            .await
            .with_context(|| format!("slack api {operation} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "slack api {operation} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 800)
            );
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode slack {operation}"))
    }
}

fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
