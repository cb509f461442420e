//! Hook payloads as the assistant writes them to stdin.

use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HookPayload {
    pub hook_event_name: String,
    pub session_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Stop,
    SubagentStop,
    IdlePrompt,
    PermissionPrompt,
    PreCompact,
    UserPromptSubmit,
    Other,
}

impl HookPayload {
    pub fn from_stdin() -> Result<Self> {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read hook payload from stdin")?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse hook payload")
    }

    pub fn event(&self) -> HookEvent {
        match self.hook_event_name.as_str() {
            "Stop" => HookEvent::Stop,
            "SubagentStop" => HookEvent::SubagentStop,
            "PreCompact" => HookEvent::PreCompact,
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "Notification" => match self.notification_type.as_deref() {
                Some("idle_prompt") => HookEvent::IdlePrompt,
                Some("permission_prompt") => HookEvent::PermissionPrompt,
                _ => HookEvent::Other,
            },
            _ => HookEvent::Other,
        }
    }
}
