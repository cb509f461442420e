//! Prompt-forwarding hook.
//!
//! Invoked on every prompt submitted in the assistant. If the pending-hash
//! file shows the prompt was injected by the bridge, the hook swallows it;
//! otherwise somebody typed at the terminal directly, and the prompt is
//! forwarded to the thread so the chat side keeps a complete record.

use std::time::Duration;

use anyhow::Result;

use tether_core::pending;
use tether_hooks::payload::{HookEvent, HookPayload};
use tether_hooks::{dedup, lookup, HookContext};
use tether_slack::truncate_for_chat;

const POST_COOLDOWN: Duration = Duration::from_secs(3);
const PROMPT_MAX_CHARS: usize = 4_000;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("tether-prompt-hook: {error:#}");
    }
}

async fn run() -> Result<()> {
    let payload = HookPayload::from_stdin()?;
    if payload.event() != HookEvent::UserPromptSubmit {
        return Ok(());
    }
    let prompt = payload.prompt.clone().unwrap_or_default();
    if prompt.trim().is_empty() {
        return Ok(());
    }

    let ctx = HookContext::load()?;
    let current_window = lookup::current_window_name();
    let env_thread = lookup::env_thread_id();
    let Some(session) = lookup::find_session(
        &ctx.registry,
        &payload.session_id,
        current_window.as_deref(),
        env_thread.as_deref(),
    ) else {
        return Ok(());
    };

    // Bridge-injected input: consume the marker and stay silent.
    if pending::consume_if_matches(&session.thread_id, &prompt) {
        return Ok(());
    }

    let dedup_key = format!("{}-prompt", session.thread_id);
    if !dedup::should_post(&dedup_key, &prompt, POST_COOLDOWN) {
        return Ok(());
    }

    ctx.post_to_thread(
        &session,
        &format!(
            "⌨️ _Local input:_ {}",
            truncate_for_chat(&prompt, PROMPT_MAX_CHARS)
        ),
    )
    .await
}
