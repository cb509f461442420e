//! Lifecycle notify hook.
//!
//! Invoked by the assistant on `Stop`, `SubagentStop`, `Notification`, and
//! `PreCompact`. Finds its session in the shared registry, applies the
//! corresponding lifecycle transition, and posts into the chat thread.
//! Failures are reported on stderr and never propagate a non-zero exit;
//! a broken side channel must not wedge the assistant.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use tether_hooks::payload::{HookEvent, HookPayload};
use tether_hooks::{dedup, lookup, transcript, HookContext};
use tether_muxer::{Muxer, TmuxMuxer};
use tether_registry::{window_for_assistant, Session};
use tether_slack::truncate_for_chat;

const POST_COOLDOWN: Duration = Duration::from_secs(3);
const NOTICE_MAX_CHARS: usize = 4_000;
const PROCESSING_REACTION: &str = "eyes";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("tether-notify-hook: {error:#}");
    }
}

async fn run() -> Result<()> {
    let payload = HookPayload::from_stdin()?;
    let event = payload.event();
    if matches!(
        event,
        HookEvent::SubagentStop | HookEvent::UserPromptSubmit | HookEvent::Other
    ) {
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

    match event {
        HookEvent::Stop => handle_stop(&ctx, &payload, session).await,
        HookEvent::IdlePrompt => handle_idle(&ctx, &session),
        HookEvent::PermissionPrompt => handle_permission(&ctx, &payload, &session).await,
        HookEvent::PreCompact => handle_precompact(&ctx, &session).await,
        _ => Ok(()),
    }
}

/// The assistant finished a turn: adopt its id as the window name, refresh
/// the registry, clear the processing reaction, and post the response.
async fn handle_stop(ctx: &HookContext, payload: &HookPayload, session: Session) -> Result<()> {
    let adopted = window_for_assistant(&payload.session_id);
    if session.window != adopted {
        let muxer = TmuxMuxer::default();
        if let Err(error) = muxer
            .rename_window(
                &ctx.config.multi_session.tmux_session,
                &session.window,
                &adopted,
            )
            .await
        {
            eprintln!("tether-notify-hook: window rename failed: {error}");
        }
    }

    let last_inbound = session.last_inbound_message_id.clone();
    ctx.registry.update(|sessions| {
        if let Some(record) = sessions.get_mut(&session.thread_id) {
            record.window = adopted.clone();
            record.assistant_id = Some(payload.session_id.clone());
            record.pending_permission = false;
            record.last_inbound_message_id = None;
            record.mark_active();
        }
    })?;

    if let Some(message_ts) = last_inbound {
        if let Err(error) = ctx
            .remove_reaction_in_thread(&session, &message_ts, PROCESSING_REACTION)
            .await
        {
            eprintln!("tether-notify-hook: reaction cleanup failed: {error}");
        }
    }

    let response = payload
        .transcript_path
        .as_deref()
        .and_then(|path| transcript::last_assistant_message(Path::new(path)))
        .unwrap_or_else(|| "Done.".to_string());
    let notice = format!("✅ {}", truncate_for_chat(&response, NOTICE_MAX_CHARS));
    if dedup::should_post(&session.thread_id, &notice, POST_COOLDOWN) {
        ctx.post_to_thread(&session, &notice).await?;
    }
    Ok(())
}

fn handle_idle(ctx: &HookContext, session: &Session) -> Result<()> {
    ctx.registry.update(|sessions| {
        if let Some(record) = sessions.get_mut(&session.thread_id) {
            if record.is_live() {
                record.mark_idle();
            }
        }
    })?;
    Ok(())
}

/// Permission prompts always post; a user waiting on their phone must see
/// the question even if an identical one was just asked.
async fn handle_permission(
    ctx: &HookContext,
    payload: &HookPayload,
    session: &Session,
) -> Result<()> {
    ctx.registry.update(|sessions| {
        if let Some(record) = sessions.get_mut(&session.thread_id) {
            record.pending_permission = true;
        }
    })?;

    let prompt = payload
        .message
        .clone()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| "The assistant is asking for permission.".to_string());
    let notice = format!(
        "🔐 {}\nReply `1` to approve, `3` to reject, or `3 <instructions>`.",
        truncate_for_chat(&prompt, NOTICE_MAX_CHARS)
    );
    ctx.post_to_thread(session, &notice).await
}

async fn handle_precompact(ctx: &HookContext, session: &Session) -> Result<()> {
    let notice = "♻️ Compacting conversation context; responses may pause briefly.";
    if dedup::should_post(&session.thread_id, notice, POST_COOLDOWN) {
        ctx.post_to_thread(session, notice).await?;
    }
    Ok(())
}
