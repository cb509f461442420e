//! tmux-backed [`Muxer`] implementation.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Key, Muxer, MuxerError, Result};

#[derive(Debug, Clone)]
pub struct TmuxMuxer {
    tmux_bin: String,
}

impl Default for TmuxMuxer {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxMuxer {
    pub fn new(tmux_bin: &str) -> Self {
        Self {
            tmux_bin: tmux_bin.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(command = %args.join(" "), "tmux");
        let output = Command::new(&self.tmux_bin)
            .args(args)
            .output()
            .await
            .map_err(|error| MuxerError::Transient(format!("failed to spawn tmux: {error}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&stderr))
    }
}

/// tmux reports all failures on stderr with exit code 1; the message text is
/// the only signal for distinguishing a missing target from a dead server.
fn classify_failure(stderr: &str) -> MuxerError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("can't find window")
        || lowered.contains("can't find session")
        || lowered.contains("can't find pane")
        || lowered.contains("session not found")
        || lowered.contains("window not found")
    {
        MuxerError::NotFound(stderr.to_string())
    } else if lowered.contains("no server running")
        || lowered.contains("lost server")
        || lowered.contains("server exited")
        || lowered.contains("error connecting")
    {
        MuxerError::Transient(stderr.to_string())
    } else {
        MuxerError::Unknown(stderr.to_string())
    }
}

fn target(session: &str, window: &str) -> String {
    format!("{session}:{window}")
}

#[async_trait]
impl Muxer for TmuxMuxer {
    async fn session_exists(&self, session: &str) -> Result<bool> {
        // `has-session` failing for any reason (missing session, no server
        // yet) reads as "not running"; `new-session` starts the server.
        Ok(self.run(&["has-session", "-t", session]).await.is_ok())
    }

    async fn ensure_session(&self, session: &str) -> Result<()> {
        if self.session_exists(session).await? {
            return Ok(());
        }
        self.run(&["new-session", "-d", "-s", session]).await?;
        Ok(())
    }

    async fn window_exists(&self, session: &str, window: &str) -> Result<bool> {
        let windows = self.list_windows(session).await?;
        Ok(windows.iter().any(|name| name == window))
    }

    async fn create_window(
        &self,
        session: &str,
        window: &str,
        start_dir: Option<&str>,
    ) -> Result<()> {
        let session_target = format!("{session}:");
        let mut args = vec!["new-window", "-d", "-t", &session_target, "-n", window];
        if let Some(dir) = start_dir {
            args.push("-c");
            args.push(dir);
        }
        self.run(&args).await?;
        Ok(())
    }

    async fn kill_window(&self, session: &str, window: &str) -> Result<()> {
        let target = target(session, window);
        match self.run(&["kill-window", "-t", &target]).await {
            Ok(_) | Err(MuxerError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn rename_window(&self, session: &str, from: &str, to: &str) -> Result<()> {
        let target = target(session, from);
        self.run(&["rename-window", "-t", &target, to]).await?;
        Ok(())
    }

    async fn send_literal(&self, session: &str, window: &str, text: &str) -> Result<()> {
        let target = target(session, window);
        self.run(&["send-keys", "-t", &target, "-l", text]).await?;
        Ok(())
    }

    async fn send_key(&self, session: &str, window: &str, key: Key) -> Result<()> {
        let target = target(session, window);
        let name = key.cli_name();
        self.run(&["send-keys", "-t", &target, &name]).await?;
        Ok(())
    }

    async fn capture(&self, session: &str, window: &str, lines_back: u32) -> Result<String> {
        let target = target(session, window);
        let start = format!("-{lines_back}");
        self.run(&["capture-pane", "-p", "-t", &target, "-S", &start])
            .await
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<String>> {
        let stdout = self
            .run(&["list-windows", "-t", session, "-F", "#{window_name}"])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_targets_classify_as_not_found() {
        assert!(matches!(
            classify_failure("can't find window: new-3"),
            MuxerError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("can't find session: claude"),
            MuxerError::NotFound(_)
        ));
    }

    #[test]
    fn dead_server_classifies_as_transient() {
        assert!(matches!(
            classify_failure("no server running on /tmp/tmux-0/default"),
            MuxerError::Transient(_)
        ));
        assert!(matches!(
            classify_failure("lost server"),
            MuxerError::Transient(_)
        ));
    }

    #[test]
    fn other_failures_classify_as_unknown() {
        assert!(matches!(
            classify_failure("usage: send-keys ..."),
            MuxerError::Unknown(_)
        ));
    }

    #[test]
    fn targets_join_session_and_window() {
        assert_eq!(target("claude", "new-1"), "claude:new-1");
    }
}
