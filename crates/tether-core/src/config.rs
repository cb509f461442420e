//! Bridge configuration file model.
//!
//! A single JSON document at `~/.tether/config.json` (override with the
//! `TETHER_CONFIG` env var). Unknown keys are rejected so typos surface at
//! startup instead of silently falling back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeConfig {
    pub bot_token: String,
    pub app_token: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub notify_channel: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub multi_session: MultiSessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MultiSessionConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
    #[serde(default = "default_tmux_session")]
    pub tmux_session: String,
    #[serde(default = "default_working_dir")]
    pub default_working_dir: String,
    #[serde(default)]
    pub notify_on_timeout: bool,
    #[serde(default = "default_retention_days")]
    pub temp_file_retention_days: u64,
    #[serde(default = "default_assistant_command")]
    pub assistant_command: String,
}

impl Default for MultiSessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            tmux_session: default_tmux_session(),
            default_working_dir: default_working_dir(),
            notify_on_timeout: false,
            temp_file_retention_days: default_retention_days(),
            assistant_command: default_assistant_command(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_concurrent() -> usize {
    5
}

fn default_idle_timeout_minutes() -> u64 {
    60
}

fn default_tmux_session() -> String {
    "claude".to_string()
}

fn default_working_dir() -> String {
    "~".to_string()
}

fn default_retention_days() -> u64 {
    14
}

fn default_assistant_command() -> String {
    "claude".to_string()
}

impl BridgeConfig {
    /// Resolve the config path: `TETHER_CONFIG` env override, else
    /// `$HOME/.tether/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(explicit) = std::env::var("TETHER_CONFIG") {
            if !explicit.trim().is_empty() {
                return Ok(PathBuf::from(explicit));
            }
        }
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".tether").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            bail!("config is missing botToken");
        }
        if self.app_token.trim().is_empty() {
            bail!("config is missing appToken");
        }
        Ok(())
    }
}

/// Every delay and poll interval the bridge uses, in one place.
///
/// The defaults are upper-bound tuning values synchronized with the
/// assistant's UI transitions; tests run [`Timing::zero`] so nothing sleeps.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Delay before the auto-confirmation keystroke for the trust dialog.
    pub trust_prompt_delay: Duration,
    /// Interval between pane captures while waiting for prompt readiness.
    pub readiness_poll_interval: Duration,
    /// Give-up deadline for readiness polling; input is sent regardless.
    pub readiness_deadline: Duration,
    /// Settle period between readiness detection and the first keystroke.
    pub readiness_settle: Duration,
    /// Gap between paired keystrokes (Down pacing, double Enter).
    pub keystroke_gap: Duration,
    /// Wait for the option menu / amendment input to open after Tab.
    pub option_ui_delay: Duration,
    /// Pause between consecutive attachment injections.
    pub attachment_gap: Duration,
    /// Delay before clearing the processing reaction after a plain rejection.
    pub rejection_cleanup_delay: Duration,
    /// Hard timeout for one attachment download.
    pub download_timeout: Duration,
    pub idle_sweep_interval: Duration,
    pub crash_sweep_interval: Duration,
    pub temp_sweep_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            trust_prompt_delay: Duration::from_secs(2),
            readiness_poll_interval: Duration::from_millis(300),
            readiness_deadline: Duration::from_secs(15),
            readiness_settle: Duration::from_millis(200),
            keystroke_gap: Duration::from_millis(100),
            option_ui_delay: Duration::from_millis(500),
            attachment_gap: Duration::from_secs(1),
            rejection_cleanup_delay: Duration::from_millis(1500),
            download_timeout: Duration::from_secs(30),
            idle_sweep_interval: Duration::from_secs(60),
            crash_sweep_interval: Duration::from_secs(30),
            temp_sweep_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Timing {
    /// All-zero timing for tests: no sleeps, readiness gives up after the
    /// first capture.
    pub fn zero() -> Self {
        Self {
            trust_prompt_delay: Duration::ZERO,
            readiness_poll_interval: Duration::ZERO,
            readiness_deadline: Duration::ZERO,
            readiness_settle: Duration::ZERO,
            keystroke_gap: Duration::ZERO,
            option_ui_delay: Duration::ZERO,
            attachment_gap: Duration::ZERO,
            rejection_cleanup_delay: Duration::ZERO,
            download_timeout: Duration::from_secs(5),
            idle_sweep_interval: Duration::ZERO,
            crash_sweep_interval: Duration::ZERO,
            temp_sweep_interval: Duration::ZERO,
        }
    }
}
