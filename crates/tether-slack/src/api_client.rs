//! Slack Web API client used by the bridge and the hook binaries.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use tether_core::paths;

use crate::helpers::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_chat,
};

#[derive(Debug, Clone, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReactionResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConversationsOpenResponse {
    ok: bool,
    channel: Option<ConversationsOpenChannel>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConversationsOpenChannel {
    id: String,
}

/// Workspace identity learned once at startup.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub bot_user_id: String,
    /// Workspace base URL, used to build thread permalinks.
    pub workspace_url: String,
}

#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        app_token: String,
        bot_token: String,
        request_timeout: Duration,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("tether-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout.max(Duration::from_millis(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    pub async fn auth_test(&self) -> Result<AuthInfo> {
        let response: AuthTestResponse = self
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

        let bot_user_id = response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))?;
        let workspace_url = response
            .url
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.trim_end_matches('/').to_string())
            .ok_or_else(|| anyhow!("slack auth.test did not return workspace url"))?;
        Ok(AuthInfo {
            bot_user_id,
            workspace_url,
        })
    }

    /// Socket Mode entry point; authenticated with the app-level token.
    pub async fn open_socket_connection(&self) -> Result<String> {
        let response: OpenSocketResponse = self
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

    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": truncate_for_chat(text, 38_000),
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response: ChatMessageResponse = self
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

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    pub async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.reaction_request("reactions.add", channel, ts, name)
            .await
    }

    pub async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.reaction_request("reactions.remove", channel, ts, name)
            .await
    }

    async fn reaction_request(
        &self,
        operation: &str,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<()> {
        let payload = json!({
            "channel": channel,
            "timestamp": ts,
            "name": name,
        });
        let response: ReactionResponse = self
            .request_json(operation, || {
                self.http
                    .post(format!("{}/{}", self.api_base, operation))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            let code = response.error.unwrap_or_else(|| "unknown error".to_string());
            // Reapplying or re-clearing a reaction is a no-op, not a failure.
            if code == "already_reacted" || code == "no_reaction" {
                return Ok(());
            }
            bail!("slack {operation} failed: {code}");
        }
        Ok(())
    }

    /// Resolve the DM channel for a user, cached on disk so reaction removal
    /// in DM threads does not hit `conversations.open` repeatedly.
    pub async fn dm_channel_for_user(&self, user_id: &str) -> Result<String> {
        let cache_path = paths::dm_cache_path(user_id);
        if let Ok(cached) = std::fs::read_to_string(&cache_path) {
            let cached = cached.trim();
            if !cached.is_empty() {
                return Ok(cached.to_string());
            }
        }

        let payload = json!({ "users": user_id });
        let response: ConversationsOpenResponse = self
            .request_json("conversations.open", || {
                self.http
                    .post(format!("{}/conversations.open", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack conversations.open failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let channel_id = response
            .channel
            .map(|channel| channel.id)
            .ok_or_else(|| anyhow!("slack conversations.open response missing channel"))?;

        if let Err(error) = tether_core::write_text_atomic(&cache_path, &channel_id) {
            warn!(user_id, %error, "failed to cache dm channel id");
        }
        Ok(channel_id)
    }

    /// Download a private attachment URL with the bot bearer token.
    pub async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        self.request_bytes("file download", || {
            self.http.get(url).bearer_auth(&self.bot_token)
        })
        .await
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder().send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode slack {operation}"))?;
                        return Ok(parsed);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "slack api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_chat(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }

    async fn request_bytes<F>(&self, operation: &str, mut builder: F) -> Result<Vec<u8>>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder().send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.bytes().await?.to_vec());
                    }
                    let retry_after = parse_retry_after(response.headers());
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    bail!("slack api {operation} failed with status {}", status.as_u16());
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }
}
