//! Shared plumbing for the assistant's lifecycle hook binaries.
//!
//! Hooks run out-of-process: the assistant invokes them with a JSON payload
//! on stdin, and they coordinate with the bridge purely through the shared
//! registry, the pending/dedup files, and the chat API.

pub mod dedup;
pub mod lookup;
pub mod payload;
pub mod transcript;

use std::time::Duration;

use anyhow::Result;

use tether_core::config::BridgeConfig;
use tether_core::instance_digest;
use tether_registry::{RegistryStore, Session};
use tether_slack::SlackApiClient;

const HOOK_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HOOK_RETRY_ATTEMPTS: usize = 2;
const HOOK_RETRY_BASE_DELAY_MS: u64 = 200;

/// Everything a hook needs: the parsed config, the shared registry, and a
/// chat client.
pub struct HookContext {
    pub config: BridgeConfig,
    pub registry: RegistryStore,
    pub slack: SlackApiClient,
}

impl HookContext {
    pub fn load() -> Result<Self> {
        let config_path = BridgeConfig::default_path()?;
        let config = BridgeConfig::load(&config_path)?;
        let digest = instance_digest(&config.bot_token);
        let registry = RegistryStore::for_instance(&digest);
        let slack = SlackApiClient::new(
            config.api_base.clone(),
            config.app_token.clone(),
            config.bot_token.clone(),
            HOOK_REQUEST_TIMEOUT,
            HOOK_RETRY_ATTEMPTS,
            HOOK_RETRY_BASE_DELAY_MS,
        )?;
        Ok(Self {
            config,
            registry,
            slack,
        })
    }

    /// Post into the session's thread, resolving a bare user id destination
    /// to its DM channel first.
    pub async fn post_to_thread(&self, session: &Session, text: &str) -> Result<()> {
        let channel = self.resolve_channel(&session.channel_id).await?;
        self.slack
            .post_message(&channel, Some(&session.thread_id), text)
            .await?;
        Ok(())
    }

    pub async fn remove_reaction_in_thread(
        &self,
        session: &Session,
        message_ts: &str,
        name: &str,
    ) -> Result<()> {
        let channel = self.resolve_channel(&session.channel_id).await?;
        self.slack.remove_reaction(&channel, message_ts, name).await
    }

    async fn resolve_channel(&self, destination: &str) -> Result<String> {
        if destination.starts_with('U') || destination.starts_with('W') {
            return self.slack.dm_channel_for_user(destination).await;
        }
        Ok(destination.to_string())
    }
}
