//! Thin facade over the terminal multiplexer CLI.
//!
//! Everything the bridge knows about tmux lives behind the [`Muxer`] trait:
//! window lifecycle, keystroke injection, and pane capture. Callers pass raw
//! strings; argument quoting is this crate's responsibility (arguments are
//! handed to the process individually, never through a shell). Tests run the
//! runtime against a recording fake instead of a live tmux server.

pub mod tmux;

use async_trait::async_trait;
use thiserror::Error;

pub use tmux::TmuxMuxer;

#[derive(Debug, Error)]
pub enum MuxerError {
    /// The target window or session does not exist.
    #[error("muxer target not found: {0}")]
    NotFound(String),
    /// The muxer server is unreachable or went away mid-command.
    #[error("transient muxer failure: {0}")]
    Transient(String),
    #[error("muxer command failed: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, MuxerError>;

/// Named keys the bridge injects besides literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Down,
    Escape,
    Digit(u8),
}

impl Key {
    /// The key name as the muxer CLI spells it.
    pub fn cli_name(&self) -> String {
        match self {
            Key::Enter => "Enter".to_string(),
            Key::Tab => "Tab".to_string(),
            Key::Down => "Down".to_string(),
            Key::Escape => "Escape".to_string(),
            Key::Digit(n) => n.to_string(),
        }
    }
}

#[async_trait]
pub trait Muxer: Send + Sync {
    async fn session_exists(&self, session: &str) -> Result<bool>;

    /// Create the session detached if it is not already running.
    async fn ensure_session(&self, session: &str) -> Result<()>;

    async fn window_exists(&self, session: &str, window: &str) -> Result<bool>;

    /// Create a background window, optionally starting in `start_dir`.
    async fn create_window(
        &self,
        session: &str,
        window: &str,
        start_dir: Option<&str>,
    ) -> Result<()>;

    /// Idempotent: killing an absent window is not an error.
    async fn kill_window(&self, session: &str, window: &str) -> Result<()>;

    async fn rename_window(&self, session: &str, from: &str, to: &str) -> Result<()>;

    /// Send exact characters with no key-name interpretation.
    async fn send_literal(&self, session: &str, window: &str, text: &str) -> Result<()>;

    async fn send_key(&self, session: &str, window: &str, key: Key) -> Result<()>;

    /// Last `lines_back` lines of the window's pane as one string.
    async fn capture(&self, session: &str, window: &str, lines_back: u32) -> Result<String>;

    async fn list_windows(&self, session: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_match_cli_spelling() {
        assert_eq!(Key::Enter.cli_name(), "Enter");
        assert_eq!(Key::Tab.cli_name(), "Tab");
        assert_eq!(Key::Down.cli_name(), "Down");
        assert_eq!(Key::Escape.cli_name(), "Escape");
        assert_eq!(Key::Digit(3).cli_name(), "3");
    }
}
