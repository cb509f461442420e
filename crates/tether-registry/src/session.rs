//! Session records and window-name conventions.

use serde::{Deserialize, Serialize};

use tether_core::current_unix_timestamp;

/// Prefix of window names assigned before the assistant reveals its own id.
pub const PROVISIONAL_PREFIX: &str = "new-";

/// A window permanently adopts the first 8 chars of the assistant id.
pub const WINDOW_ID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Active,
    Idle,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Terminated => "terminated",
        }
    }
}

/// One chat thread bound to one terminal window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub thread_id: String,
    pub channel_id: String,
    pub window: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub working_dir: String,
    pub status: SessionStatus,
    pub created_at: u64,
    pub last_activity: u64,
    #[serde(default)]
    pub idle_since: Option<u64>,
    #[serde(default)]
    pub last_inbound_message_id: Option<String>,
    #[serde(default)]
    pub pending_permission: bool,
}

impl Session {
    pub fn new(thread_id: &str, channel_id: &str, window: &str, working_dir: &str) -> Self {
        let now = current_unix_timestamp();
        Self {
            thread_id: thread_id.to_string(),
            channel_id: channel_id.to_string(),
            window: window.to_string(),
            assistant_id: None,
            working_dir: working_dir.to_string(),
            status: SessionStatus::Starting,
            created_at: now,
            last_activity: now,
            idle_since: None,
            last_inbound_message_id: None,
            pending_permission: false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != SessionStatus::Terminated
    }

    /// Any inbound wakes an idle session and refreshes the activity clock.
    pub fn touch(&mut self) {
        self.last_activity = current_unix_timestamp();
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Active;
            self.idle_since = None;
        }
    }

    pub fn mark_active(&mut self) {
        self.status = SessionStatus::Active;
        self.idle_since = None;
        self.last_activity = current_unix_timestamp();
    }

    pub fn mark_idle(&mut self) {
        self.status = SessionStatus::Idle;
        self.idle_since = Some(current_unix_timestamp());
    }

    /// Terminate preserves `assistant_id` so the thread stays resurrectable.
    pub fn mark_terminated(&mut self) {
        self.status = SessionStatus::Terminated;
        self.idle_since = None;
        self.pending_permission = false;
    }

    pub fn has_provisional_window(&self) -> bool {
        self.window.starts_with(PROVISIONAL_PREFIX)
    }

    /// A terminated session can be re-attached when the assistant id is
    /// known and the window had already adopted it.
    pub fn is_resurrectable(&self) -> bool {
        self.status == SessionStatus::Terminated
            && self.assistant_id.is_some()
            && !self.has_provisional_window()
    }
}

/// Provisional window name for index `n`.
pub fn provisional_name(n: u64) -> String {
    format!("{PROVISIONAL_PREFIX}{n}")
}

/// Parses the index out of a provisional window name.
pub fn provisional_index(window: &str) -> Option<u64> {
    window.strip_prefix(PROVISIONAL_PREFIX)?.parse().ok()
}

/// Window name a session adopts once its assistant id is known.
pub fn window_for_assistant(assistant_id: &str) -> String {
    assistant_id.chars().take(WINDOW_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_names_round_trip() {
        assert_eq!(provisional_name(3), "new-3");
        assert_eq!(provisional_index("new-3"), Some(3));
        assert_eq!(provisional_index("new-x"), None);
        assert_eq!(provisional_index("abcd1234"), None);
    }

    #[test]
    fn assistant_window_truncates_to_eight_chars() {
        assert_eq!(
            window_for_assistant("abcd1234-5678-90ab-cdef-001122334455"),
            "abcd1234"
        );
        assert_eq!(window_for_assistant("ab"), "ab");
    }

    #[test]
    fn touch_reactivates_idle_sessions() {
        let mut session = Session::new("1001.0", "D1", "new-1", "/tmp");
        session.mark_idle();
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(session.idle_since.is_some());

        session.touch();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.idle_since.is_none());
    }

    #[test]
    fn terminated_session_with_adopted_window_is_resurrectable() {
        let mut session = Session::new("1001.0", "D1", "abcd1234", "/x");
        session.assistant_id = Some("abcd1234-5678".to_string());
        session.mark_terminated();
        assert!(session.is_resurrectable());

        let mut provisional = Session::new("1002.0", "D1", "new-7", "/x");
        provisional.assistant_id = Some("ffff0000".to_string());
        provisional.mark_terminated();
        assert!(!provisional.is_resurrectable());
    }

    #[test]
    fn registry_record_serializes_camel_case() {
        let session = Session::new("1001.0", "D1", "new-1", "/tmp");
        let value = serde_json::to_value(&session).expect("serialize");
        assert_eq!(value["threadId"], "1001.0");
        assert_eq!(value["status"], "starting");
        assert_eq!(value["pendingPermission"], false);
    }
}
