//! Session lookup for hooks.
//!
//! A hook prefers the `threadId` env var it inherited from the launch line.
//! When that is absent (e.g. the assistant was started by `--resume` from a
//! fresh shell) it falls back to matching the registry by window name. The
//! compound predicate covers the rename race: between window creation and
//! the first Stop, the session may still carry its provisional name while
//! the assistant id is already known.

use std::process::Command;

use tether_registry::{window_for_assistant, RegistryStore, Session, SessionStatus};

/// Name of the tmux window this hook is running inside, if any.
pub fn current_window_name() -> Option<String> {
    let output = Command::new("tmux")
        .args(["display-message", "-p", "#{window_name}"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// The thread id inherited from the bridge's launch line, when present.
pub fn env_thread_id() -> Option<String> {
    std::env::var("threadId")
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Locate the session a hook invocation belongs to.
pub fn find_session(
    registry: &RegistryStore,
    assistant_session_id: &str,
    current_window: Option<&str>,
    env_thread_id: Option<&str>,
) -> Option<Session> {
    if let Some(thread_id) = env_thread_id {
        if let Some(session) = registry.get(thread_id) {
            return Some(session);
        }
    }

    let adopted = window_for_assistant(assistant_session_id);
    let mut candidates = registry
        .load()
        .into_values()
        .filter(|session| session.is_live())
        .filter(|session| {
            session.window == adopted || Some(session.window.as_str()) == current_window
        })
        .collect::<Vec<_>>();

    // Prefer active sessions, then the most recently created.
    candidates.sort_by(|left, right| {
        let left_active = left.status == SessionStatus::Active;
        let right_active = right.status == SessionStatus::Active;
        right_active
            .cmp(&left_active)
            .then(right.created_at.cmp(&left.created_at))
    });
    candidates.into_iter().next()
}
