//! End-to-end runtime behavior against a recording muxer fake and a mock
//! chat API.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use tempfile::TempDir;

use tether_core::config::{BridgeConfig, MultiSessionConfig, Timing};
use tether_core::{pending, pending_hash};
use tether_muxer::{Key, Muxer, MuxerError};
use tether_registry::{RegistryStore, Session, SessionStatus};
use tether_slack::{FileAttachment, MessageEvent, MessageKind, ReactionEvent};

use crate::runtime::{BridgeRuntime, BridgeRuntimeConfig};
use crate::sessions::{EnsureOutcome, TerminateReason};

// ---------------------------------------------------------------------------
// Recording muxer fake
// ---------------------------------------------------------------------------

struct RecordingMuxer {
    calls: StdMutex<Vec<String>>,
    windows: StdMutex<HashSet<String>>,
    pane: StdMutex<String>,
}

impl RecordingMuxer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            windows: StdMutex::new(HashSet::new()),
            pane: StdMutex::new(String::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().expect("calls lock").clear();
    }

    fn record(&self, entry: String) {
        self.calls.lock().expect("calls lock").push(entry);
    }

    fn add_window(&self, name: &str) {
        self.windows.lock().expect("windows lock").insert(name.to_string());
    }

    fn remove_window(&self, name: &str) {
        self.windows.lock().expect("windows lock").remove(name);
    }

    fn has_window(&self, name: &str) -> bool {
        self.windows.lock().expect("windows lock").contains(name)
    }

    fn set_pane(&self, content: &str) {
        *self.pane.lock().expect("pane lock") = content.to_string();
    }
}

#[async_trait]
impl Muxer for RecordingMuxer {
    async fn session_exists(&self, _session: &str) -> tether_muxer::Result<bool> {
        Ok(true)
    }

    async fn ensure_session(&self, _session: &str) -> tether_muxer::Result<()> {
        Ok(())
    }

    async fn window_exists(&self, _session: &str, window: &str) -> tether_muxer::Result<bool> {
        Ok(self.has_window(window))
    }

    async fn create_window(
        &self,
        _session: &str,
        window: &str,
        start_dir: Option<&str>,
    ) -> tether_muxer::Result<()> {
        self.record(format!(
            "create-window {window} {}",
            start_dir.unwrap_or("-")
        ));
        self.add_window(window);
        Ok(())
    }

    async fn kill_window(&self, _session: &str, window: &str) -> tether_muxer::Result<()> {
        self.record(format!("kill-window {window}"));
        self.remove_window(window);
        Ok(())
    }

    async fn rename_window(
        &self,
        _session: &str,
        from: &str,
        to: &str,
    ) -> tether_muxer::Result<()> {
        if !self.has_window(from) {
            return Err(MuxerError::NotFound(format!("can't find window: {from}")));
        }
        self.record(format!("rename-window {from} {to}"));
        self.remove_window(from);
        self.add_window(to);
        Ok(())
    }

    async fn send_literal(
        &self,
        _session: &str,
        window: &str,
        text: &str,
    ) -> tether_muxer::Result<()> {
        if !self.has_window(window) {
            return Err(MuxerError::NotFound(format!("can't find window: {window}")));
        }
        self.record(format!("literal {window} {text}"));
        Ok(())
    }

    async fn send_key(&self, _session: &str, window: &str, key: Key) -> tether_muxer::Result<()> {
        if !self.has_window(window) {
            return Err(MuxerError::NotFound(format!("can't find window: {window}")));
        }
        self.record(format!("key {window} {}", key.cli_name()));
        Ok(())
    }

    async fn capture(
        &self,
        _session: &str,
        window: &str,
        _lines_back: u32,
    ) -> tether_muxer::Result<String> {
        if !self.has_window(window) {
            return Err(MuxerError::NotFound(format!("can't find window: {window}")));
        }
        Ok(self.pane.lock().expect("pane lock").clone())
    }

    async fn list_windows(&self, _session: &str) -> tether_muxer::Result<Vec<String>> {
        let mut windows = self
            .windows
            .lock()
            .expect("windows lock")
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        windows.sort();
        Ok(windows)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _tempdir: TempDir,
    server: MockServer,
    muxer: Arc<RecordingMuxer>,
    runtime: BridgeRuntime,
}

async fn harness_with(settings: MultiSessionConfig) -> Harness {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/auth.test");
        then.status(200).json_body(serde_json::json!({
            "ok": true,
            "user_id": "UBOT",
            "url": "https://example.slack.com",
        }));
    });

    let tempdir = tempfile::tempdir().expect("tempdir");
    let registry = RegistryStore::new(
        tempdir.path().join("registry.json"),
        tempdir.path().join("registry.json.lock"),
    );

    let config = BridgeConfig {
        bot_token: "xoxb-test".to_string(),
        app_token: "xapp-test".to_string(),
        allowed_users: vec!["U1".to_string()],
        notify_channel: "C0".to_string(),
        api_base: server.base_url(),
        multi_session: settings,
    };

    let muxer = RecordingMuxer::new();
    let runtime = BridgeRuntime::new(
        BridgeRuntimeConfig {
            config,
            timing: Timing::zero(),
            registry,
            reconnect_delay: Duration::from_millis(10),
        },
        muxer.clone(),
    )
    .await
    .expect("runtime");

    Harness {
        _tempdir: tempdir,
        server,
        muxer,
        runtime,
    }
}

async fn harness() -> Harness {
    harness_with(MultiSessionConfig::default()).await
}

fn dm(thread: Option<&str>, ts: &str, text: &str) -> MessageEvent {
    MessageEvent {
        kind: MessageKind::DirectMessage,
        channel_id: "D1".to_string(),
        user_id: "U1".to_string(),
        text: text.to_string(),
        ts: ts.to_string(),
        thread_ts: thread.map(str::to_string),
        files: Vec::new(),
    }
}

/// Unique thread ids so parallel tests never collide on shared `/tmp` files.
fn thread_ts(suffix: u32) -> String {
    format!("{}.{suffix}", std::process::id())
}

/// Assert that `expected` appears in `calls` in order. Other calls may be
/// interleaved (the delayed trust keystroke lands at an arbitrary point).
fn assert_subsequence(calls: &[String], expected: &[&str]) {
    let mut position = 0_usize;
    for want in expected {
        let found = calls[position..]
            .iter()
            .position(|call| call == want)
            .unwrap_or_else(|| {
                panic!("missing call `{want}` after index {position} in {calls:#?}")
            });
        position += found + 1;
    }
}

async fn settle() {
    // Let zero-delay spawned tasks (trust keystroke, reaction cleanup) run.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_thread_with_working_dir_creates_window_and_injects() {
    let harness = harness().await;
    let thread = thread_ts(11);
    pending::clear_pending(&thread);

    harness
        .runtime
        .handle_message(dm(None, &thread, "[/tmp] fix thing"))
        .await;
    settle().await;

    let session = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("session recorded");
    assert_eq!(session.window, "new-1");
    assert_eq!(session.working_dir, "/tmp");
    assert_eq!(session.status, SessionStatus::Starting);

    let calls = harness.muxer.calls();
    assert_subsequence(
        &calls,
        &[
            "create-window new-1 /tmp",
            "literal new-1 cd \"/tmp\"",
            "key new-1 Enter",
            &format!("literal new-1 threadId={thread} channelId=D1 claude"),
            "key new-1 Enter",
            "literal new-1 fix thing",
            "key new-1 Enter",
            "key new-1 Enter",
        ],
    );
    // Delayed trust confirmation fired.
    assert!(calls.iter().any(|call| call == "key new-1 1"));

    // Pending hash matches the injected text.
    assert_eq!(
        pending::read_pending(&thread).expect("pending file"),
        pending_hash("fix thing")
    );
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn second_message_reuses_the_window_and_sends_bare_digit() {
    let harness = harness().await;
    let thread = thread_ts(12);
    pending::clear_pending(&thread);

    harness
        .runtime
        .handle_message(dm(None, &thread, "start here"))
        .await;
    settle().await;
    harness.muxer.clear_calls();

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.1", "2"))
        .await;
    settle().await;

    let calls = harness.muxer.calls();
    assert_eq!(calls, vec!["literal new-1 2".to_string()]);
    assert!(!calls.iter().any(|call| call.contains("create-window")));
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn permission_amendment_drives_the_option_menu() {
    let harness = harness().await;
    let thread = thread_ts(13);
    pending::clear_pending(&thread);

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    session.pending_permission = true;
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed session");
    harness.muxer.clear_calls();

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.2", "3 try the other file"))
        .await;
    settle().await;

    let calls = harness.muxer.calls();
    assert_eq!(
        calls,
        vec![
            "key abcd1234 Down".to_string(),
            "key abcd1234 Down".to_string(),
            "key abcd1234 Tab".to_string(),
            "literal abcd1234 try the other file".to_string(),
            "key abcd1234 Enter".to_string(),
        ]
    );

    let session = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("session");
    assert!(!session.pending_permission);
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn pending_free_text_is_rewritten_to_reject_with_instructions() {
    let harness = harness().await;
    let thread = thread_ts(14);
    pending::clear_pending(&thread);

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    session.pending_permission = true;
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed session");
    harness.muxer.clear_calls();

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.3", "try the other file"))
        .await;
    settle().await;

    // Rewritten to "3 try the other file": option 3 with instructions.
    let calls = harness.muxer.calls();
    assert_eq!(calls[0], "key abcd1234 Down");
    assert_eq!(calls[1], "key abcd1234 Down");
    assert_eq!(calls[2], "key abcd1234 Tab");
    assert_eq!(calls[3], "literal abcd1234 try the other file");

    // The pending hash records the original text, not the rewrite.
    assert_eq!(
        pending::read_pending(&thread).expect("pending file"),
        pending_hash("try the other file")
    );
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn say_directive_bypasses_the_option_heuristic() {
    let harness = harness().await;
    let thread = thread_ts(15);
    pending::clear_pending(&thread);

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    session.pending_permission = true;
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed session");
    harness.muxer.clear_calls();

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.4", "!say 3 is the answer"))
        .await;
    settle().await;

    let calls = harness.muxer.calls();
    assert_eq!(
        calls,
        vec![
            "literal abcd1234 3 is the answer".to_string(),
            "key abcd1234 Enter".to_string(),
            "key abcd1234 Enter".to_string(),
        ]
    );
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn attachment_flow_downloads_supported_and_annotates_unsupported() {
    let harness = harness().await;
    let thread = thread_ts(16);
    pending::clear_pending(&thread);
    let files_dir = tether_core::paths::thread_files_dir(&thread);
    let _ = std::fs::remove_dir_all(&files_dir);

    let download = harness.server.mock(|when, then| {
        when.method(GET).path("/files/a.png");
        then.status(200).body(vec![0x89, 0x50, 0x4e, 0x47]);
    });

    let mut message = dm(None, &thread, "look at these");
    message.files = vec![
        FileAttachment {
            id: "F1".to_string(),
            name: Some("a.png".to_string()),
            mimetype: Some("image/png".to_string()),
            url_private_download: Some(format!("{}/files/a.png", harness.server.base_url())),
        },
        FileAttachment {
            id: "F2".to_string(),
            name: Some("b.xyz".to_string()),
            mimetype: None,
            url_private_download: Some(format!("{}/files/b.xyz", harness.server.base_url())),
        },
    ];

    harness.runtime.handle_message(message).await;
    settle().await;

    download.assert();
    let saved = files_dir.join("a.png");
    assert!(saved.exists(), "downloaded file missing");

    let calls = harness.muxer.calls();
    let saved_text = saved.to_string_lossy().to_string();
    assert_subsequence(
        &calls,
        &[
            &format!("literal new-1 {saved_text}"),
            "key new-1 Enter",
            "key new-1 Enter",
            "literal new-1 look at these [Unsupported file types: b.xyz]",
        ],
    );

    let _ = std::fs::remove_dir_all(&files_dir);
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn reaction_kill_terminates_and_posts_confirmation() {
    let harness = harness().await;
    let thread = thread_ts(17);

    let skull = harness.server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_contains(":skull: Session terminated via reaction.");
        then.status(200)
            .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.1"}));
    });

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed session");

    let reaction = ReactionEvent {
        user_id: "U1".to_string(),
        reaction: "octagonal_sign".to_string(),
        channel_id: "D1".to_string(),
        item_ts: thread.clone(),
    };
    harness.runtime.handle_reaction(reaction.clone()).await;

    assert!(harness
        .muxer
        .calls()
        .iter()
        .any(|call| call == "kill-window abcd1234"));
    let session = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("session");
    assert_eq!(session.status, SessionStatus::Terminated);
    skull.assert_hits(1);

    // Applying the same reaction again is a no-op on a terminated session.
    harness.runtime.handle_reaction(reaction).await;
    skull.assert_hits(1);
}

#[tokio::test]
async fn approve_and_reject_reactions_map_to_keystrokes() {
    let harness = harness().await;
    let thread = thread_ts(18);

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed session");
    harness.muxer.clear_calls();

    harness
        .runtime
        .handle_reaction(ReactionEvent {
            user_id: "U1".to_string(),
            reaction: "white_check_mark".to_string(),
            channel_id: "D1".to_string(),
            item_ts: thread.clone(),
        })
        .await;
    harness
        .runtime
        .handle_reaction(ReactionEvent {
            user_id: "U1".to_string(),
            reaction: "x".to_string(),
            channel_id: "D1".to_string(),
            item_ts: thread.clone(),
        })
        .await;

    assert_eq!(
        harness.muxer.calls(),
        vec![
            "literal abcd1234 1".to_string(),
            "key abcd1234 Escape".to_string(),
        ]
    );
}

#[tokio::test]
async fn resurrection_reuses_assistant_id_and_working_dir() {
    let harness = harness().await;
    let thread = thread_ts(19);
    pending::clear_pending(&thread);

    let mut prior = Session::new(&thread, "D1", "abcd1234", "/x");
    prior.assistant_id = Some("abcd1234-5678-90ab-cdef-001122334455".to_string());
    prior.mark_terminated();
    harness
        .runtime
        .sessions()
        .registry()
        .put(prior)
        .expect("seed prior");
    harness.muxer.clear_calls();

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.9", "hello"))
        .await;
    settle().await;

    let session = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("session");
    assert_eq!(session.status, SessionStatus::Starting);
    assert_eq!(session.window, "new-1");
    assert_eq!(session.working_dir, "/x");
    assert_eq!(
        session.assistant_id.as_deref(),
        Some("abcd1234-5678-90ab-cdef-001122334455")
    );

    let calls = harness.muxer.calls();
    assert_subsequence(
        &calls,
        &[
            "create-window new-1 /x",
            "literal new-1 cd \"/x\"",
            &format!(
                "literal new-1 threadId={thread} channelId=D1 claude --resume \
                 abcd1234-5678-90ab-cdef-001122334455"
            ),
            "literal new-1 hello",
        ],
    );
    pending::clear_pending(&thread);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_ensure_session_creates_exactly_one_window() {
    let harness = harness().await;
    let thread = thread_ts(21);

    let sessions = harness.runtime.sessions().clone();
    let (left, right) = tokio::join!(
        sessions.ensure_session(&thread, "D1", None),
        sessions.ensure_session(&thread, "D1", None),
    );
    let left = left.expect("left");
    let right = right.expect("right");

    let creations = harness
        .muxer
        .calls()
        .iter()
        .filter(|call| call.starts_with("create-window"))
        .count();
    assert_eq!(creations, 1);

    let left_window = left.session().expect("left session").window.clone();
    let right_window = right.session().expect("right session").window.clone();
    assert_eq!(left_window, right_window);
    assert!(left.is_fresh() != right.is_fresh(), "exactly one creator");
}

#[tokio::test]
async fn limit_zero_rejects_every_new_thread() {
    let settings = MultiSessionConfig {
        max_concurrent: 0,
        ..MultiSessionConfig::default()
    };
    let harness = harness_with(settings).await;
    let thread = thread_ts(22);

    let limit_notice = harness.server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_contains("Session limit reached");
        then.status(200)
            .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.1"}));
    });

    harness
        .runtime
        .handle_message(dm(None, &thread, "anything"))
        .await;

    limit_notice.assert_hits(1);
    assert!(harness
        .muxer
        .calls()
        .iter()
        .all(|call| !call.starts_with("create-window")));
    assert!(harness.runtime.sessions().registry().get(&thread).is_none());
}

#[tokio::test]
async fn limit_counts_only_live_sessions() {
    let settings = MultiSessionConfig {
        max_concurrent: 1,
        ..MultiSessionConfig::default()
    };
    let harness = harness_with(settings).await;
    let thread_a = thread_ts(23);
    let thread_b = thread_ts(24);

    let mut dead = Session::new(&thread_a, "D1", "abcd1234", "/x");
    dead.mark_terminated();
    harness
        .runtime
        .sessions()
        .registry()
        .put(dead)
        .expect("seed dead");

    let outcome = harness
        .runtime
        .sessions()
        .ensure_session(&thread_b, "D1", None)
        .await
        .expect("ensure");
    assert!(matches!(outcome, EnsureOutcome::Created(_)));

    // One live session now; the next thread hits the cap.
    let thread_c = thread_ts(25);
    let outcome = harness
        .runtime
        .sessions()
        .ensure_session(&thread_c, "D1", None)
        .await
        .expect("ensure");
    assert!(matches!(outcome, EnsureOutcome::LimitReached { active: 1 }));
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let harness = harness().await;
    let thread = thread_ts(26);

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed");

    let first = harness
        .runtime
        .sessions()
        .terminate(&thread, TerminateReason::Command)
        .await
        .expect("first");
    let second = harness
        .runtime
        .sessions()
        .terminate(&thread, TerminateReason::Command)
        .await
        .expect("second");
    assert!(first);
    assert!(!second);

    // assistant_id-free terminated sessions are not resurrectable, but the
    // record survives for inspection.
    let record = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("record");
    assert_eq!(record.status, SessionStatus::Terminated);
}

#[tokio::test]
async fn crash_sweep_terminates_sessions_with_missing_windows() {
    let harness = harness().await;
    let thread = thread_ts(27);

    let crash_notice = harness.server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_contains("terminal window disappeared");
        then.status(200)
            .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.1"}));
    });

    // Live registry record with no backing window.
    let mut session = Session::new(&thread, "D1", "ghost123", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed");

    let terminated = harness.runtime.sessions().run_crash_sweep().await;
    assert_eq!(terminated, 1);
    crash_notice.assert_hits(1);

    let record = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("record");
    assert_eq!(record.status, SessionStatus::Terminated);

    // A second sweep finds nothing to do.
    assert_eq!(harness.runtime.sessions().run_crash_sweep().await, 0);
}

#[tokio::test]
async fn idle_sweep_respects_the_timeout() {
    let settings = MultiSessionConfig {
        idle_timeout_minutes: 1,
        ..MultiSessionConfig::default()
    };
    let harness = harness_with(settings).await;
    let fresh_thread = thread_ts(28);
    let stale_thread = thread_ts(29);

    harness.muxer.add_window("fresh123");
    harness.muxer.add_window("stale123");

    let mut fresh = Session::new(&fresh_thread, "D1", "fresh123", "/x");
    fresh.mark_idle();
    harness
        .runtime
        .sessions()
        .registry()
        .put(fresh)
        .expect("seed fresh");

    let mut stale = Session::new(&stale_thread, "D1", "stale123", "/x");
    stale.mark_idle();
    stale.idle_since = Some(tether_core::current_unix_timestamp() - 120);
    harness
        .runtime
        .sessions()
        .registry()
        .put(stale)
        .expect("seed stale");

    let terminated = harness.runtime.sessions().run_idle_sweep().await;
    assert_eq!(terminated, 1);

    let registry = harness.runtime.sessions().registry();
    assert_eq!(
        registry.get(&stale_thread).expect("stale").status,
        SessionStatus::Terminated
    );
    assert_eq!(
        registry.get(&fresh_thread).expect("fresh").status,
        SessionStatus::Idle
    );
}

#[tokio::test]
async fn window_vanishing_mid_delivery_is_treated_as_crash() {
    let harness = harness().await;
    let thread = thread_ts(30);
    pending::clear_pending(&thread);

    // Session claims a window the muxer does not have.
    let mut session = Session::new(&thread, "D1", "gone1234", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed");

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.30", "hello?"))
        .await;
    settle().await;

    let record = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("record");
    assert_eq!(record.status, SessionStatus::Terminated);
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn unauthorized_users_get_a_refusal_and_no_session() {
    let harness = harness().await;
    let thread = thread_ts(31);

    let refusal = harness.server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_contains("allow-list");
        then.status(200)
            .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.1"}));
    });

    let mut message = dm(None, &thread, "hello");
    message.user_id = "UEVIL".to_string();
    harness.runtime.handle_message(message).await;

    refusal.assert_hits(1);
    assert!(harness.runtime.sessions().registry().get(&thread).is_none());
}

#[tokio::test]
async fn empty_text_without_attachments_is_a_no_op() {
    let harness = harness().await;
    let thread = thread_ts(32);

    harness
        .runtime
        .handle_message(dm(None, &thread, "   "))
        .await;

    assert!(harness.runtime.sessions().registry().get(&thread).is_none());
    assert!(harness.muxer.calls().is_empty());
}

#[tokio::test]
async fn readiness_timeout_still_sends_the_first_message() {
    let harness = harness().await;
    let thread = thread_ts(33);
    pending::clear_pending(&thread);

    // A pane with no markers at all: readiness gives up at the deadline.
    harness.muxer.set_pane("plain shell output");

    harness
        .runtime
        .handle_message(dm(None, &thread, "go"))
        .await;
    settle().await;

    assert!(harness
        .muxer
        .calls()
        .iter()
        .any(|call| call == "literal new-1 go"));
    pending::clear_pending(&thread);
}

#[tokio::test]
async fn kill_directive_and_status_directive_work_in_thread() {
    let harness = harness().await;
    let thread = thread_ts(34);

    let status_reply = harness.server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_contains("pending permission");
        then.status(200)
            .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.1"}));
    });

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed");

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.40", "!status"))
        .await;
    status_reply.assert_hits(1);

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.41", "!kill"))
        .await;
    let record = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("record");
    assert_eq!(record.status, SessionStatus::Terminated);
    assert!(harness
        .muxer
        .calls()
        .iter()
        .any(|call| call == "kill-window abcd1234"));
}

#[tokio::test]
async fn bot_commands_answer_outside_session_threads() {
    let harness = harness().await;
    let thread = thread_ts(35);

    let sessions_reply = harness.server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_contains("No active sessions.");
        then.status(200)
            .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.1"}));
    });

    harness
        .runtime
        .handle_message(dm(None, &thread, "!sessions"))
        .await;
    sessions_reply.assert_hits(1);
    assert!(harness.muxer.calls().iter().all(|c| !c.starts_with("create-window")));
}

#[tokio::test]
async fn slash_commands_share_the_command_grammar() {
    let harness = harness().await;

    let response = harness
        .runtime
        .handle_slash_command(&tether_slack::SlashCommandEvent {
            command: "/tether".to_string(),
            text: "help".to_string(),
            user_id: "U1".to_string(),
            channel_id: "C1".to_string(),
        })
        .await;
    assert!(response.contains("!sessions"));

    let denied = harness
        .runtime
        .handle_slash_command(&tether_slack::SlashCommandEvent {
            command: "/tether".to_string(),
            text: "help".to_string(),
            user_id: "UEVIL".to_string(),
            channel_id: "C1".to_string(),
        })
        .await;
    assert!(denied.contains("allow-list"));
}

#[tokio::test]
async fn startup_reconcile_marks_windowless_sessions_terminated() {
    // Build a harness, seed a live session with no window, then build a
    // second runtime over the same registry: startup() must reconcile.
    let harness = harness().await;
    let thread = thread_ts(36);

    let mut session = Session::new(&thread, "D1", "ghost999", "/x");
    session.mark_active();
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed");

    harness
        .runtime
        .sessions()
        .startup()
        .await
        .expect("startup");

    let record = harness
        .runtime
        .sessions()
        .registry()
        .get(&thread)
        .expect("record");
    assert_eq!(record.status, SessionStatus::Terminated);
}

#[tokio::test]
async fn provisional_counter_seeds_from_existing_windows() {
    let harness = harness().await;
    let thread = thread_ts(37);

    harness.muxer.add_window("new-7");
    harness
        .runtime
        .sessions()
        .startup()
        .await
        .expect("startup");

    let outcome = harness
        .runtime
        .sessions()
        .ensure_session(&thread, "D1", None)
        .await
        .expect("ensure");
    let session = outcome.session().expect("session");
    assert_eq!(session.window, "new-8");
}

#[tokio::test]
async fn plain_rejection_schedules_reaction_cleanup() {
    let harness = harness().await;
    let thread = thread_ts(38);
    pending::clear_pending(&thread);

    let removal = harness.server.mock(|when, then| {
        when.method(POST).path("/reactions.remove");
        then.status(200).json_body(serde_json::json!({"ok": true}));
    });

    harness.muxer.add_window("abcd1234");
    let mut session = Session::new(&thread, "D1", "abcd1234", "/x");
    session.mark_active();
    session.pending_permission = true;
    harness
        .runtime
        .sessions()
        .registry()
        .put(session)
        .expect("seed");

    harness
        .runtime
        .handle_message(dm(Some(&thread), "9999.50", "3"))
        .await;
    settle().await;

    removal.assert_hits(1);
    pending::clear_pending(&thread);
}
