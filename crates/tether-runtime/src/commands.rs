//! Administrative bot commands: parsing and response rendering.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use tether_core::current_unix_timestamp;
use tether_core::config::MultiSessionConfig;
use tether_registry::{Session, SessionStatus};

const FIND_MAX_RESULTS: usize = 10;
const FIND_MAX_DEPTH: &str = "4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Sessions,
    Status,
    Kill { window: String },
    Find { query: String },
    Help,
}

/// Parse a `!…` command message. `None` means the text is not a command.
pub fn parse_command(text: &str) -> Option<BotCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('!')?;
    parse_command_words(rest)
}

/// Parse the argument text of a slash command (same grammar, no `!`).
pub fn parse_slash_args(text: &str) -> Option<BotCommand> {
    parse_command_words(text.trim())
}

fn parse_command_words(rest: &str) -> Option<BotCommand> {
    let mut words = rest.split_whitespace();
    let head = words.next()?;
    let tail = words.collect::<Vec<_>>().join(" ");
    match head {
        "sessions" | "s" if tail.is_empty() => Some(BotCommand::Sessions),
        "status" if tail.is_empty() => Some(BotCommand::Status),
        "kill" if !tail.is_empty() => Some(BotCommand::Kill { window: tail }),
        "find" | "f" if !tail.is_empty() => Some(BotCommand::Find { query: tail }),
        "help" | "h" if tail.is_empty() => Some(BotCommand::Help),
        _ => None,
    }
}

pub fn help_text() -> String {
    [
        "Supported commands:",
        "- `!sessions` / `!s`: list running sessions",
        "- `!status`: bridge status",
        "- `!kill <window>`: terminate the session owning a window",
        "- `!find <q>` / `!f <q>`: search directories under $HOME",
        "- `!help` / `!h`: this text",
        "",
        "Inside a session thread: `!kill`, `!status`, and `!say <text>` \
         (forward text verbatim).",
        "Start a thread with `[<path>] …` to pick the working directory.",
    ]
    .join("\n")
}

pub fn status_emoji(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Starting => "🟡",
        SessionStatus::Active => "🟢",
        SessionStatus::Idle => "💤",
        SessionStatus::Terminated => "⬛",
    }
}

/// Permalink to a thread root: workspace url + channel + ts with the dot
/// removed.
pub fn thread_link(workspace_url: &str, channel_id: &str, thread_id: &str) -> String {
    format!(
        "{}/archives/{}/p{}",
        workspace_url.trim_end_matches('/'),
        channel_id,
        thread_id.replace('.', "")
    )
}

/// One list entry per live session.
pub fn render_session_lines(sessions: &[Session], workspace_url: &str) -> Vec<String> {
    let now = current_unix_timestamp();
    sessions
        .iter()
        .filter(|session| session.is_live())
        .map(|session| {
            let idle_secs = now.saturating_sub(session.last_activity);
            format!(
                "{} {} (idle {}s) {}\n    `{}`",
                status_emoji(session.status),
                session.working_dir,
                idle_secs,
                thread_link(workspace_url, &session.channel_id, &session.thread_id),
                session.window,
            )
        })
        .collect()
}

pub fn render_bridge_status(
    muxer_alive: bool,
    sessions: &[Session],
    settings: &MultiSessionConfig,
) -> String {
    let starting = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Starting)
        .count();
    let active = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Active)
        .count();
    let idle = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Idle)
        .count();
    let live = starting + active + idle;

    [
        format!(
            "Bridge status: tmux session `{}` {}",
            settings.tmux_session,
            if muxer_alive { "alive" } else { "unreachable" }
        ),
        format!(
            "sessions: {live}/{} ({starting} starting, {active} active, {idle} idle)",
            settings.max_concurrent
        ),
        format!(
            "idle timeout: {} min, timeout notices: {}",
            settings.idle_timeout_minutes,
            if settings.notify_on_timeout { "on" } else { "off" }
        ),
    ]
    .join("\n")
}

/// Status line for one session, used by the in-thread `!status` directive.
pub fn render_session_status(session: &Session) -> String {
    let now = current_unix_timestamp();
    [
        format!(
            "{} `{}` in {}",
            status_emoji(session.status),
            session.window,
            session.working_dir
        ),
        format!(
            "status: {}, last activity {}s ago, pending permission: {}",
            session.status.as_str(),
            now.saturating_sub(session.last_activity),
            if session.pending_permission { "yes" } else { "no" }
        ),
        format!(
            "assistant id: {}",
            session.assistant_id.as_deref().unwrap_or("not yet known")
        ),
    ]
    .join("\n")
}

/// Strip a find query down to a safe glob fragment.
pub fn sanitize_find_query(query: &str) -> String {
    query
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        .collect()
}

/// Search `$HOME` for directories matching the query, annotating git
/// checkouts with their branch.
pub async fn find_directories(home: &str, query: &str) -> Vec<String> {
    let sanitized = sanitize_find_query(query);
    if sanitized.is_empty() {
        return Vec::new();
    }

    let pattern = format!("*{sanitized}*");
    let output = Command::new("find")
        .args([
            home,
            "-maxdepth",
            FIND_MAX_DEPTH,
            "-type",
            "d",
            "-name",
            &pattern,
        ])
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(error) => {
            debug!(%error, "find invocation failed");
            return Vec::new();
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(FIND_MAX_RESULTS)
        .map(|dir| match git_branch(Path::new(dir)) {
            Some(branch) => format!("{dir} ({branch})"),
            None => dir.to_string(),
        })
        .collect()
}

/// Branch name from `.git/HEAD`, or a short sha for a detached head.
fn git_branch(dir: &Path) -> Option<String> {
    let head = std::fs::read_to_string(dir.join(".git").join("HEAD")).ok()?;
    let head = head.trim();
    if let Some(reference) = head.strip_prefix("ref: ") {
        let reference = reference.trim();
        return Some(
            reference
                .strip_prefix("refs/heads/")
                .unwrap_or(reference)
                .to_string(),
        );
    }
    head.get(..8).map(str::to_string)
}
