//! Session lifecycle: creation, resurrection, readiness, injection,
//! periodic sweeps, and termination.
//!
//! All state lives in the shared registry; this module only ever holds
//! snapshots. Creation is single-flighted per thread so two concurrent
//! inbound messages cannot both spawn windows.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tether_core::config::{MultiSessionConfig, Timing};
use tether_core::{current_unix_timestamp, pending};
use tether_muxer::{Key, Muxer, MuxerError};
use tether_registry::{provisional_index, provisional_name, RegistryStore, Session, SessionStatus};
use tether_slack::SlackApiClient;

use crate::attachments;
use crate::inbound::expand_home;
use crate::keystrokes::{self, SendPacing};

pub const PROCESSING_REACTION: &str = "eyes";

const READINESS_CAPTURE_LINES: u32 = 30;

/// Substrings of the assistant's trust dialog; input must not be injected
/// while one is on screen.
const TRUST_PROMPT_MARKERS: &[&str] = &[
    "Do you trust the files in this folder?",
    "Trust the files in this folder",
    "trust this folder",
];

/// Substrings indicating the assistant accepts input.
const READY_MARKERS: &[&str] = &[
    "Welcome to Claude",
    "What would you like to do?",
    "? for shortcuts",
    "│ >",
];

#[derive(Debug, Clone)]
pub enum EnsureOutcome {
    /// A live session already existed.
    Existing(Session),
    Created(Session),
    Resurrected(Session),
    LimitReached { active: usize },
}

impl EnsureOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            EnsureOutcome::Existing(session)
            | EnsureOutcome::Created(session)
            | EnsureOutcome::Resurrected(session) => Some(session),
            EnsureOutcome::LimitReached { .. } => None,
        }
    }

    /// Fresh windows need readiness detection before the first injection.
    pub fn is_fresh(&self) -> bool {
        matches!(
            self,
            EnsureOutcome::Created(_) | EnsureOutcome::Resurrected(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    IdleTimeout,
    Crash,
    Reaction,
    Command,
}

impl TerminateReason {
    fn notice(&self, settings: &MultiSessionConfig) -> Option<String> {
        match self {
            TerminateReason::IdleTimeout => {
                if settings.notify_on_timeout {
                    Some(format!(
                        "⏰ Session timed out after {} minutes of inactivity. Reply here to resume it.",
                        settings.idle_timeout_minutes
                    ))
                } else {
                    None
                }
            }
            TerminateReason::Crash => Some(
                "⚠️ The session's terminal window disappeared; the session is now terminated. \
                 Reply here to resume it."
                    .to_string(),
            ),
            TerminateReason::Reaction => Some(":skull: Session terminated via reaction.".to_string()),
            TerminateReason::Command => Some(":skull: Session terminated.".to_string()),
        }
    }
}

pub struct SessionManager {
    registry: RegistryStore,
    muxer: Arc<dyn Muxer>,
    slack: SlackApiClient,
    settings: MultiSessionConfig,
    notify_channel: String,
    timing: Timing,
    /// Last allocated provisional window index; monotonic for the process.
    last_provisional: AtomicU64,
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        registry: RegistryStore,
        muxer: Arc<dyn Muxer>,
        slack: SlackApiClient,
        settings: MultiSessionConfig,
        notify_channel: String,
        timing: Timing,
    ) -> Self {
        Self {
            registry,
            muxer,
            slack,
            settings,
            notify_channel,
            timing,
            last_provisional: AtomicU64::new(0),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn settings(&self) -> &MultiSessionConfig {
        &self.settings
    }

    fn tmux_session(&self) -> &str {
        &self.settings.tmux_session
    }

    fn pacing(&self) -> SendPacing {
        SendPacing {
            keystroke_gap: self.timing.keystroke_gap,
            option_ui_delay: self.timing.option_ui_delay,
        }
    }

    /// Startup duties: make sure the muxer session exists, seed the
    /// provisional counter from surviving windows, reconcile the registry
    /// against reality, and clear out stale attachment directories.
    pub async fn startup(&self) -> Result<()> {
        self.muxer
            .ensure_session(self.tmux_session())
            .await
            .map_err(anyhow::Error::from)
            .context("failed to reach the muxer server")?;

        let windows = self
            .muxer
            .list_windows(self.tmux_session())
            .await
            .unwrap_or_default();

        let max_index = windows.iter().filter_map(|w| provisional_index(w)).max();
        if let Some(max_index) = max_index {
            self.last_provisional.store(max_index, Ordering::SeqCst);
        }

        let reconciled = self.registry.update(|sessions| {
            let mut count = 0_usize;
            for session in sessions.values_mut() {
                if session.is_live() && !windows.iter().any(|w| *w == session.window) {
                    session.mark_terminated();
                    count += 1;
                }
            }
            count
        })?;
        if reconciled > 0 {
            info!(reconciled, "marked window-less sessions terminated at startup");
        }

        let removed = attachments::cleanup_stale_thread_dirs(self.settings.temp_file_retention_days)
            .unwrap_or_default();
        if removed > 0 {
            info!(removed, "removed stale attachment directories at startup");
        }
        Ok(())
    }

    async fn creation_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn next_provisional_window(&self) -> String {
        provisional_name(self.last_provisional.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn resolved_default_dir(&self) -> String {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
        expand_home(&self.settings.default_working_dir, &home)
    }

    /// Find or create the session for a thread.
    ///
    /// Single-flighted per thread: a second caller waits, re-reads the
    /// registry, and receives the session the first caller created.
    pub async fn ensure_session(
        &self,
        thread_id: &str,
        channel_id: &str,
        requested_dir: Option<&str>,
    ) -> Result<EnsureOutcome> {
        let lock = self.creation_lock(thread_id).await;
        let _guard = lock.lock().await;

        let sessions = self.registry.load();
        if let Some(existing) = sessions.get(thread_id) {
            if existing.is_live() {
                return Ok(EnsureOutcome::Existing(existing.clone()));
            }
        }

        let active = sessions.values().filter(|s| s.is_live()).count();
        if active >= self.settings.max_concurrent {
            return Ok(EnsureOutcome::LimitReached { active });
        }

        let prior = sessions
            .get(thread_id)
            .filter(|session| session.is_resurrectable())
            .cloned();

        let working_dir = match &prior {
            Some(prior) => prior.working_dir.clone(),
            None => requested_dir
                .map(str::to_string)
                .unwrap_or_else(|| self.resolved_default_dir()),
        };

        let window = self.next_provisional_window();
        self.muxer
            .create_window(self.tmux_session(), &window, Some(&working_dir))
            .await
            .with_context(|| format!("failed to create window {window}"))?;

        let cd_line = format!("cd \"{}\"", working_dir.replace('"', "\\\""));
        self.muxer
            .send_literal(self.tmux_session(), &window, &cd_line)
            .await?;
        self.muxer
            .send_key(self.tmux_session(), &window, Key::Enter)
            .await?;

        let mut launch_line = format!(
            "threadId={} channelId={} {}",
            shell_quote(thread_id),
            shell_quote(channel_id),
            self.settings.assistant_command,
        );
        if let Some(prior) = &prior {
            if let Some(assistant_id) = &prior.assistant_id {
                launch_line.push_str(&format!(" --resume {}", shell_quote(assistant_id)));
            }
        }
        self.muxer
            .send_literal(self.tmux_session(), &window, &launch_line)
            .await?;
        self.muxer
            .send_key(self.tmux_session(), &window, Key::Enter)
            .await?;

        let mut record = Session::new(thread_id, channel_id, &window, &working_dir);
        if let Some(prior) = &prior {
            record.assistant_id = prior.assistant_id.clone();
        }
        self.registry.update(|sessions| {
            sessions.insert(thread_id.to_string(), record.clone());
        })?;

        self.schedule_trust_confirmation(&window);

        info!(
            thread_id,
            %window,
            %working_dir,
            resurrected = prior.is_some(),
            "session starting"
        );

        if prior.is_some() {
            Ok(EnsureOutcome::Resurrected(record))
        } else {
            Ok(EnsureOutcome::Created(record))
        }
    }

    /// Fire a single `"1"` after a delay to accept the assistant's
    /// trust-this-folder dialog. Harmless if the dialog never appears: the
    /// digit is swallowed by the prompt and readiness has not passed yet.
    fn schedule_trust_confirmation(&self, window: &str) {
        let muxer = self.muxer.clone();
        let tmux_session = self.tmux_session().to_string();
        let window = window.to_string();
        let delay = self.timing.trust_prompt_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = muxer.send_key(&tmux_session, &window, Key::Digit(1)).await {
                debug!(%window, %error, "trust confirmation keystroke failed");
            }
        });
    }

    /// Poll the pane until a prompt-ready marker appears (and no trust
    /// dialog is showing). On deadline, proceed anyway.
    pub async fn wait_until_ready(&self, window: &str) {
        let deadline = tokio::time::Instant::now() + self.timing.readiness_deadline;
        loop {
            match self
                .muxer
                .capture(self.tmux_session(), window, READINESS_CAPTURE_LINES)
                .await
            {
                Ok(pane) if pane_is_ready(&pane) => break,
                Ok(_) => {}
                Err(error) => debug!(window, %error, "readiness capture failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(window, "readiness deadline reached, proceeding anyway");
                break;
            }
            tokio::time::sleep(self.timing.readiness_poll_interval).await;
        }
        tokio::time::sleep(self.timing.readiness_settle).await;
    }

    /// Inject one inbound message: attachments first, then the processing
    /// reaction, then the text per the keystroke policy.
    pub async fn deliver(
        &self,
        thread_id: &str,
        text: &str,
        attachment_paths: &[PathBuf],
        message_ts: &str,
        bypass_option_heuristic: bool,
    ) -> Result<()> {
        let Some(session) = self.registry.get(thread_id) else {
            bail!("no session for thread {thread_id}");
        };
        let trimmed = text.trim();
        if trimmed.is_empty() && attachment_paths.is_empty() {
            return Ok(());
        }

        let tmux_session = self.tmux_session();
        for path in attachment_paths {
            let path_text = path.to_string_lossy();
            pending::write_pending(thread_id, &path_text)?;
            self.muxer
                .send_literal(tmux_session, &session.window, &path_text)
                .await?;
            self.muxer
                .send_key(tmux_session, &session.window, Key::Enter)
                .await?;
            tokio::time::sleep(self.timing.keystroke_gap).await;
            self.muxer
                .send_key(tmux_session, &session.window, Key::Enter)
                .await?;
            tokio::time::sleep(self.timing.attachment_gap).await;
        }

        if let Err(error) = self
            .slack
            .add_reaction(&session.channel_id, message_ts, PROCESSING_REACTION)
            .await
        {
            warn!(thread_id, %error, "failed to add processing reaction");
        }
        self.registry.update(|sessions| {
            if let Some(record) = sessions.get_mut(thread_id) {
                record.last_inbound_message_id = Some(message_ts.to_string());
                record.touch();
            }
        })?;

        if !trimmed.is_empty() {
            if bypass_option_heuristic {
                pending::write_pending(thread_id, trimmed)?;
                keystrokes::send_free_text(
                    self.muxer.as_ref(),
                    tmux_session,
                    &session.window,
                    trimmed,
                    self.pacing(),
                )
                .await?;
            } else {
                let mut to_send = trimmed.to_string();
                if session.pending_permission && !keystrokes::is_option_input(trimmed) {
                    // Free text while a permission prompt is open reads as
                    // reject-with-instructions.
                    to_send = format!("3 {trimmed}");
                }
                if session.pending_permission {
                    self.registry.update(|sessions| {
                        if let Some(record) = sessions.get_mut(thread_id) {
                            record.pending_permission = false;
                        }
                    })?;
                }
                pending::write_pending(thread_id, trimmed)?;
                keystrokes::send(
                    self.muxer.as_ref(),
                    tmux_session,
                    &session.window,
                    &to_send,
                    self.pacing(),
                )
                .await?;
            }
        }

        if keystrokes::is_plain_rejection(trimmed) {
            // No completion event follows a rejection, so the reaction is
            // cleared on a timer.
            self.schedule_reaction_cleanup(&session, message_ts);
        }

        Ok(())
    }

    fn schedule_reaction_cleanup(&self, session: &Session, message_ts: &str) {
        let slack = self.slack.clone();
        let channel_id = session.channel_id.clone();
        let message_ts = message_ts.to_string();
        let delay = self.timing.rejection_cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let channel = match resolve_channel(&slack, &channel_id).await {
                Ok(channel) => channel,
                Err(error) => {
                    warn!(%error, "failed to resolve channel for reaction cleanup");
                    return;
                }
            };
            if let Err(error) = slack
                .remove_reaction(&channel, &message_ts, PROCESSING_REACTION)
                .await
            {
                warn!(%error, "failed to remove processing reaction");
            }
        });
    }

    /// Kill the window and mark the session terminated. Idempotent: a
    /// session that is already terminated (or unknown) returns `false`.
    pub async fn terminate(&self, thread_id: &str, reason: TerminateReason) -> Result<bool> {
        let Some(session) = self.registry.get(thread_id) else {
            return Ok(false);
        };
        if !session.is_live() {
            return Ok(false);
        }

        if let Err(error) = self
            .muxer
            .kill_window(self.tmux_session(), &session.window)
            .await
        {
            warn!(thread_id, window = %session.window, %error, "kill-window failed");
        }

        let transitioned = self.registry.update(|sessions| match sessions.get_mut(thread_id) {
            Some(record) if record.is_live() => {
                record.mark_terminated();
                true
            }
            _ => false,
        })?;

        if transitioned {
            info!(thread_id, window = %session.window, ?reason, "session terminated");
            if let Some(notice) = reason.notice(&self.settings) {
                self.post_to_thread(&session, &notice).await;
            }
        }
        Ok(transitioned)
    }

    pub async fn post_to_thread(&self, session: &Session, text: &str) {
        let destination = if session.channel_id.is_empty() {
            self.notify_channel.clone()
        } else {
            session.channel_id.clone()
        };
        let channel = match resolve_channel(&self.slack, &destination).await {
            Ok(channel) => channel,
            Err(error) => {
                warn!(thread_id = %session.thread_id, %error, "failed to resolve channel");
                return;
            }
        };
        if let Err(error) = self
            .slack
            .post_message(&channel, Some(&session.thread_id), text)
            .await
        {
            warn!(thread_id = %session.thread_id, %error, "failed to post to thread");
        }
    }

    /// Terminate idle sessions past the configured timeout.
    pub async fn run_idle_sweep(&self) -> usize {
        let now = current_unix_timestamp();
        let timeout_secs = self.settings.idle_timeout_minutes.saturating_mul(60);
        let expired = self
            .registry
            .load()
            .values()
            .filter(|session| session.status == SessionStatus::Idle)
            .filter(|session| {
                session
                    .idle_since
                    .map(|idle_since| now.saturating_sub(idle_since) > timeout_secs)
                    .unwrap_or(false)
            })
            .map(|session| session.thread_id.clone())
            .collect::<Vec<_>>();

        let mut terminated = 0_usize;
        for thread_id in expired {
            match self.terminate(&thread_id, TerminateReason::IdleTimeout).await {
                Ok(true) => terminated += 1,
                Ok(false) => {}
                Err(error) => warn!(%thread_id, %error, "idle sweep terminate failed"),
            }
        }
        terminated
    }

    /// Mark sessions whose window vanished as crashed.
    pub async fn run_crash_sweep(&self) -> usize {
        let windows = match self.muxer.list_windows(self.tmux_session()).await {
            Ok(windows) => windows,
            Err(error) => {
                warn!(%error, "crash sweep could not list windows");
                return 0;
            }
        };

        let missing = self
            .registry
            .load()
            .values()
            .filter(|session| session.is_live())
            .filter(|session| !windows.iter().any(|w| *w == session.window))
            .map(|session| session.thread_id.clone())
            .collect::<Vec<_>>();

        let mut terminated = 0_usize;
        for thread_id in missing {
            match self.terminate(&thread_id, TerminateReason::Crash).await {
                Ok(true) => terminated += 1,
                Ok(false) => {}
                Err(error) => warn!(%thread_id, %error, "crash sweep terminate failed"),
            }
        }
        terminated
    }

    pub fn run_temp_cleanup(&self) -> usize {
        attachments::cleanup_stale_thread_dirs(self.settings.temp_file_retention_days)
            .unwrap_or_else(|error| {
                warn!(%error, "temp cleanup failed");
                0
            })
    }

    /// True when the error means the target window (or the whole muxer
    /// server) is gone and the session should be treated as crashed.
    pub fn is_crash_error(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<MuxerError>(),
            Some(MuxerError::NotFound(_)) | Some(MuxerError::Transient(_))
        )
    }
}

/// Resolve a destination that may be a bare user id (DM) to a channel id.
pub async fn resolve_channel(slack: &SlackApiClient, destination: &str) -> Result<String> {
    if destination.starts_with('U') || destination.starts_with('W') {
        return slack.dm_channel_for_user(destination).await;
    }
    Ok(destination.to_string())
}

fn pane_is_ready(pane: &str) -> bool {
    if TRUST_PROMPT_MARKERS.iter().any(|marker| pane.contains(marker)) {
        return false;
    }
    READY_MARKERS.iter().any(|marker| pane.contains(marker))
}

fn shell_quote(raw: &str) -> String {
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./:@%+=".contains(ch));
    if safe {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_readiness_requires_marker_and_no_trust_dialog() {
        assert!(pane_is_ready("Welcome to Claude\n│ > "));
        assert!(pane_is_ready("What would you like to do?"));
        assert!(!pane_is_ready("some shell output"));
        assert!(!pane_is_ready(
            "Welcome to Claude\nDo you trust the files in this folder?"
        ));
    }

    #[test]
    fn shell_quote_leaves_plain_ids_bare() {
        assert_eq!(shell_quote("1001.0"), "1001.0");
        assert_eq!(shell_quote("D123"), "D123");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
    }
}
