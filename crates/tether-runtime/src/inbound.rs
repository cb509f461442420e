//! Inbound interpretation: working-directory prefixes, in-session
//! directives, and the reaction table.

use std::path::Path;

/// `!…` literals that bypass normal forwarding inside a session thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `!kill`: terminate this thread's session.
    Kill,
    /// `!status`: post this session's info.
    Status,
    /// `!say <text>`: forward `<text>` verbatim, bypassing the option
    /// heuristics.
    Say(String),
}

/// Directives only apply inside session threads; any other `!…` string is
/// treated as an ordinary message.
pub fn parse_directive(text: &str) -> Option<Directive> {
    let trimmed = text.trim();
    if trimmed == "!kill" {
        return Some(Directive::Kill);
    }
    if trimmed == "!status" {
        return Some(Directive::Status);
    }
    if let Some(rest) = trimmed.strip_prefix("!say ") {
        let rest = rest.trim();
        if !rest.is_empty() {
            return Some(Directive::Say(rest.to_string()));
        }
    }
    None
}

/// Effects of a reaction on a thread's root message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionAction {
    /// octagonal-sign / stop-sign / no-entry
    Terminate,
    /// white-check-mark / heavy-check-mark → send `"1"` (no Enter)
    Approve,
    /// x / negative-squared-cross-mark → send Escape
    Reject,
}

pub fn reaction_action(reaction: &str) -> Option<ReactionAction> {
    match reaction {
        "octagonal_sign" | "stop_sign" | "no_entry" => Some(ReactionAction::Terminate),
        "white_check_mark" | "heavy_check_mark" => Some(ReactionAction::Approve),
        "x" | "negative_squared_cross_mark" => Some(ReactionAction::Reject),
        _ => None,
    }
}

/// Split a leading `[<path>]` working-directory prefix off a
/// thread-starting message. Returns `(path, remainder)`.
pub fn split_working_dir_prefix(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('[') {
        return (None, text.trim().to_string());
    }
    let Some(end) = trimmed.find(']') else {
        return (None, text.trim().to_string());
    };
    let path = trimmed[1..end].trim();
    if path.is_empty() {
        return (None, text.trim().to_string());
    }
    let remainder = trimmed[end + 1..].trim().to_string();
    (Some(path.to_string()), remainder)
}

/// Outcome of resolving a requested working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingDirResolution {
    Resolved(String),
    /// The path is absent or not a directory; the caller warns and uses the
    /// default.
    Invalid { requested: String },
}

/// Expand `~` against `home` and require an existing directory.
pub fn resolve_working_dir(requested: &str, home: &str) -> WorkingDirResolution {
    let expanded = expand_home(requested, home);
    if Path::new(&expanded).is_dir() {
        WorkingDirResolution::Resolved(expanded)
    } else {
        WorkingDirResolution::Invalid {
            requested: requested.to_string(),
        }
    }
}

pub fn expand_home(raw: &str, home: &str) -> String {
    if raw == "~" {
        return home.to_string();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return format!("{}/{rest}", home.trim_end_matches('/'));
    }
    raw.to_string()
}
