//! The bridge runtime: Socket Mode event loop, inbound routing, and
//! command dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use tether_core::config::{BridgeConfig, Timing};
use tether_muxer::{Key, Muxer};
use tether_registry::{RegistryStore, Session};
use tether_slack::{
    normalize_socket_envelope, parse_socket_envelope, strip_mention, InboundEvent, MessageEvent,
    MessageKind, ReactionEvent, SlashCommandEvent, SocketEnvelope,
};
use tether_slack::{PostedMessage, SlackApiClient};

use crate::attachments::fetch_attachments;
use crate::commands::{self, BotCommand};
use crate::inbound::{
    parse_directive, reaction_action, resolve_working_dir, split_working_dir_prefix, Directive,
    ReactionAction, WorkingDirResolution,
};
use crate::sessions::{EnsureOutcome, SessionManager, TerminateReason};

const SLACK_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SLACK_RETRY_ATTEMPTS: usize = 3;
const SLACK_RETRY_BASE_DELAY_MS: u64 = 250;

const REFUSAL_NOTICE: &str = "Sorry, you're not on the allow-list for this bridge.";

#[derive(Clone)]
pub struct BridgeRuntimeConfig {
    pub config: BridgeConfig,
    pub timing: Timing,
    pub registry: RegistryStore,
    pub reconnect_delay: Duration,
}

#[derive(Clone)]
pub struct BridgeRuntime {
    config: BridgeConfig,
    timing: Timing,
    slack: SlackApiClient,
    muxer: Arc<dyn Muxer>,
    sessions: Arc<SessionManager>,
    bot_user_id: String,
    workspace_url: String,
    reconnect_delay: Duration,
    handler_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl BridgeRuntime {
    /// Authenticate, reconcile the registry against live windows, and build
    /// the runtime. Fails fast on bad credentials or an unreachable muxer.
    pub async fn new(options: BridgeRuntimeConfig, muxer: Arc<dyn Muxer>) -> Result<Self> {
        let BridgeRuntimeConfig {
            config,
            timing,
            registry,
            reconnect_delay,
        } = options;

        let slack = SlackApiClient::new(
            config.api_base.clone(),
            config.app_token.clone(),
            config.bot_token.clone(),
            SLACK_REQUEST_TIMEOUT,
            SLACK_RETRY_ATTEMPTS,
            SLACK_RETRY_BASE_DELAY_MS,
        )?;
        let auth = slack.auth_test().await.context("slack authentication failed")?;

        let sessions = Arc::new(SessionManager::new(
            registry,
            muxer.clone(),
            slack.clone(),
            config.multi_session.clone(),
            config.notify_channel.clone(),
            timing.clone(),
        ));
        sessions.startup().await?;

        info!(
            bot_user_id = %auth.bot_user_id,
            workspace_url = %auth.workspace_url,
            "bridge runtime ready"
        );

        Ok(Self {
            config,
            timing,
            slack,
            muxer,
            sessions,
            bot_user_id: auth.bot_user_id,
            workspace_url: auth.workspace_url,
            reconnect_delay,
            handler_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Spawn the three periodic sweeps. Zero intervals (tests) spawn
    /// nothing; tests drive the sweep passes directly.
    pub fn spawn_sweeps(&self) {
        if self.timing.idle_sweep_interval > Duration::ZERO {
            let sessions = self.sessions.clone();
            let period = self.timing.idle_sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    sessions.run_idle_sweep().await;
                }
            });
        }
        if self.timing.crash_sweep_interval > Duration::ZERO {
            let sessions = self.sessions.clone();
            let period = self.timing.crash_sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    sessions.run_crash_sweep().await;
                }
            });
        }
        if self.timing.temp_sweep_interval > Duration::ZERO {
            let sessions = self.sessions.clone();
            let period = self.timing.temp_sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    sessions.run_temp_cleanup();
                }
            });
        }
    }

    /// Socket Mode loop: connect, drain, reconnect on failure. Runs until
    /// the caller drops/aborts it (the binary races this against signals).
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.slack.open_socket_connection().await {
                Ok(socket_url) => {
                    info!("socket mode connected");
                    if let Err(error) = self.run_socket_session(&socket_url).await {
                        warn!(%error, "socket session ended with error");
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to open socket connection");
                }
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn run_socket_session(&self, socket_url: &str) -> Result<()> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .context("failed to connect socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        while let Some(message) = source.next().await {
            let message = message.context("failed reading websocket message")?;
            let Some(envelope) = parse_socket_envelope(message)? else {
                continue;
            };
            let ack_payload = self.handle_envelope(&envelope).await;

            let mut ack = json!({ "envelope_id": envelope.envelope_id });
            if let Some(payload) = ack_payload {
                ack["payload"] = payload;
            }
            sink.send(WsMessage::Text(ack.to_string().into()))
                .await
                .context("failed to send socket ack")?;
        }
        Ok(())
    }

    /// Route one envelope. The returned value, if any, becomes the ack
    /// payload (slash command responses travel back through the ack).
    pub async fn handle_envelope(&self, envelope: &SocketEnvelope) -> Option<serde_json::Value> {
        let normalized = match normalize_socket_envelope(envelope, &self.bot_user_id) {
            Ok(normalized) => normalized,
            Err(error) => {
                debug!(%error, "unparseable envelope ignored");
                return None;
            }
        };
        let event = normalized?;

        match event {
            InboundEvent::Message(message) => {
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime.handle_message(message).await;
                });
                None
            }
            InboundEvent::ReactionAdded(reaction) => {
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime.handle_reaction(reaction).await;
                });
                None
            }
            InboundEvent::SlashCommand(command) => {
                let text = self.handle_slash_command(&command).await;
                Some(json!({ "response_type": "ephemeral", "text": text }))
            }
        }
    }

    fn is_allowed(&self, user_id: &str) -> bool {
        self.config
            .allowed_users
            .iter()
            .any(|allowed| allowed == user_id)
    }

    async fn handler_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.handler_locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn reply(&self, channel: &str, thread_ts: Option<&str>, text: &str) {
        if let Err(error) = self.slack.post_message(channel, thread_ts, text).await {
            warn!(channel, %error, "failed to post reply");
        }
    }

    /// Handle one user message end to end: authorization, directives,
    /// commands, session creation, attachment fetch, injection.
    pub async fn handle_message(&self, message: MessageEvent) {
        if !self.is_allowed(&message.user_id) {
            self.reply(
                &message.channel_id,
                message.thread_ts.as_deref(),
                REFUSAL_NOTICE,
            )
            .await;
            return;
        }

        let raw_text = match message.kind {
            MessageKind::Mention => strip_mention(&message.text, &self.bot_user_id),
            MessageKind::DirectMessage => message.text.trim().to_string(),
        };
        let thread_id = message.thread_id().to_string();

        // Per-thread serialization: later messages wait here until earlier
        // ones finish injecting.
        let lock = self.handler_lock(&thread_id).await;
        let _guard = lock.lock().await;

        let existing = self
            .sessions
            .registry()
            .get(&thread_id)
            .filter(Session::is_live);

        let mut text = raw_text;
        let mut bypass_option_heuristic = false;
        if let Some(session) = &existing {
            match parse_directive(&text) {
                Some(Directive::Kill) => {
                    if let Err(error) = self
                        .sessions
                        .terminate(&thread_id, TerminateReason::Command)
                        .await
                    {
                        warn!(%thread_id, %error, "kill directive failed");
                    }
                    return;
                }
                Some(Directive::Status) => {
                    self.reply(
                        &message.channel_id,
                        Some(&thread_id),
                        &commands::render_session_status(session),
                    )
                    .await;
                    return;
                }
                Some(Directive::Say(rest)) => {
                    text = rest;
                    bypass_option_heuristic = true;
                }
                None => {}
            }
        } else if let Some(command) = commands::parse_command(&text) {
            let response = self.run_command(command).await;
            self.reply(&message.channel_id, message.thread_ts.as_deref(), &response)
                .await;
            return;
        }

        let mut requested_dir: Option<String> = None;
        if message.starts_thread() {
            let (prefix, remainder) = split_working_dir_prefix(&text);
            if let Some(prefix) = prefix {
                text = remainder;
                let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
                match resolve_working_dir(&prefix, &home) {
                    WorkingDirResolution::Resolved(dir) => requested_dir = Some(dir),
                    WorkingDirResolution::Invalid { requested } => {
                        self.reply(
                            &message.channel_id,
                            Some(&thread_id),
                            &format!(
                                "⚠️ `{requested}` is not a directory; using the default \
                                 working directory."
                            ),
                        )
                        .await;
                    }
                }
            }
        }

        if text.trim().is_empty() && message.files.is_empty() {
            return;
        }

        let outcome = match self
            .sessions
            .ensure_session(&thread_id, &message.channel_id, requested_dir.as_deref())
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%thread_id, %error, "session creation failed");
                self.reply(
                    &message.channel_id,
                    Some(&thread_id),
                    "⚠️ Failed to start a session for this thread.",
                )
                .await;
                return;
            }
        };

        let session = match &outcome {
            EnsureOutcome::LimitReached { active } => {
                self.reply(
                    &message.channel_id,
                    Some(&thread_id),
                    &format!(
                        "Session limit reached ({active}/{} running). Try again later or \
                         free one with `!kill <window>`.",
                        self.sessions.settings().max_concurrent
                    ),
                )
                .await;
                return;
            }
            EnsureOutcome::Existing(session)
            | EnsureOutcome::Created(session)
            | EnsureOutcome::Resurrected(session) => session.clone(),
        };

        if outcome.is_fresh() {
            self.sessions.wait_until_ready(&session.window).await;
        }

        let report = match fetch_attachments(
            &self.slack,
            &thread_id,
            &message.files,
            self.timing.download_timeout,
        )
        .await
        {
            Ok(report) => report,
            Err(error) => {
                warn!(%thread_id, %error, "attachment fetch failed");
                Default::default()
            }
        };
        if let Some(annotation) = report.annotation() {
            if text.trim().is_empty() {
                text = annotation;
            } else {
                text = format!("{text} {annotation}");
            }
        }

        if let Err(error) = self
            .sessions
            .deliver(
                &thread_id,
                &text,
                &report.saved,
                &message.ts,
                bypass_option_heuristic,
            )
            .await
        {
            if SessionManager::is_crash_error(&error) {
                warn!(%thread_id, "window vanished mid-delivery, marking crashed");
                if let Err(error) = self
                    .sessions
                    .terminate(&thread_id, TerminateReason::Crash)
                    .await
                {
                    warn!(%thread_id, %error, "crash termination failed");
                }
            } else {
                warn!(%thread_id, %error, "message delivery failed");
            }
        }
    }

    /// Reactions on a thread root: stop-family terminates, check approves,
    /// x rejects.
    pub async fn handle_reaction(&self, reaction: ReactionEvent) {
        if !self.is_allowed(&reaction.user_id) {
            return;
        }
        let Some(action) = reaction_action(&reaction.reaction) else {
            return;
        };
        let Some(session) = self
            .sessions
            .registry()
            .get(&reaction.item_ts)
            .filter(Session::is_live)
        else {
            return;
        };

        let tmux_session = self.sessions.settings().tmux_session.clone();
        match action {
            ReactionAction::Terminate => {
                if let Err(error) = self
                    .sessions
                    .terminate(&session.thread_id, TerminateReason::Reaction)
                    .await
                {
                    warn!(thread_id = %session.thread_id, %error, "reaction terminate failed");
                }
            }
            ReactionAction::Approve => {
                if let Err(error) = self
                    .muxer
                    .send_literal(&tmux_session, &session.window, "1")
                    .await
                {
                    warn!(thread_id = %session.thread_id, %error, "approve keystroke failed");
                }
            }
            ReactionAction::Reject => {
                if let Err(error) = self
                    .muxer
                    .send_key(&tmux_session, &session.window, Key::Escape)
                    .await
                {
                    warn!(thread_id = %session.thread_id, %error, "reject keystroke failed");
                }
            }
        }
    }

    pub async fn handle_slash_command(&self, command: &SlashCommandEvent) -> String {
        if !self.is_allowed(&command.user_id) {
            return REFUSAL_NOTICE.to_string();
        }
        match commands::parse_slash_args(&command.text) {
            Some(parsed) => self.run_command(parsed).await,
            None => commands::help_text(),
        }
    }

    async fn run_command(&self, command: BotCommand) -> String {
        match command {
            BotCommand::Sessions => {
                let sessions = self
                    .sessions
                    .registry()
                    .load()
                    .into_values()
                    .collect::<Vec<_>>();
                let lines = commands::render_session_lines(&sessions, &self.workspace_url);
                if lines.is_empty() {
                    "No active sessions.".to_string()
                } else {
                    lines.join("\n")
                }
            }
            BotCommand::Status => {
                let settings = self.sessions.settings();
                let muxer_alive = self
                    .muxer
                    .session_exists(&settings.tmux_session)
                    .await
                    .unwrap_or(false);
                let sessions = self
                    .sessions
                    .registry()
                    .load()
                    .into_values()
                    .collect::<Vec<_>>();
                commands::render_bridge_status(muxer_alive, &sessions, settings)
            }
            BotCommand::Kill { window } => {
                let target = self
                    .sessions
                    .registry()
                    .load()
                    .into_values()
                    .find(|session| session.is_live() && session.window == window);
                match target {
                    Some(session) => {
                        match self
                            .sessions
                            .terminate(&session.thread_id, TerminateReason::Command)
                            .await
                        {
                            Ok(true) => format!("Terminated session `{window}`."),
                            Ok(false) => format!("Session `{window}` was already terminated."),
                            Err(error) => {
                                warn!(%window, %error, "kill command failed");
                                format!("Failed to terminate `{window}`.")
                            }
                        }
                    }
                    None => format!("No running session owns window `{window}`."),
                }
            }
            BotCommand::Find { query } => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
                let matches = commands::find_directories(&home, &query).await;
                if matches.is_empty() {
                    format!("No directories matching `{query}`.")
                } else {
                    matches.join("\n")
                }
            }
            BotCommand::Help => commands::help_text(),
        }
    }

    /// Post a message into a thread (used by tests and auxiliary tooling).
    pub async fn post_in_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<PostedMessage> {
        self.slack
            .post_message(channel, Some(thread_ts), text)
            .await
    }
}
