//! Shared `/tmp` path scheme.
//!
//! Every file the bridge shares with out-of-process hooks lives under a
//! fixed prefix so both sides agree on locations without configuration:
//! the registry and instance lock are namespaced by the instance digest,
//! per-thread files key on the thread id directly.

use std::path::PathBuf;

const TMP_ROOT: &str = "/tmp";

/// Registry file shared by the bridge and the hook binaries.
pub fn registry_path(instance_digest: &str) -> PathBuf {
    PathBuf::from(TMP_ROOT).join(format!("tether-registry-{instance_digest}.json"))
}

/// Advisory lock companion for the registry.
pub fn registry_lock_path(instance_digest: &str) -> PathBuf {
    PathBuf::from(TMP_ROOT).join(format!("tether-registry-{instance_digest}.json.lock"))
}

/// Single-writer guard for one bridge per bot configuration.
pub fn instance_lock_path(instance_digest: &str) -> PathBuf {
    PathBuf::from(TMP_ROOT).join(format!("tether-bridge-{instance_digest}.lock"))
}

/// Pending-hash file the prompt hook reads to suppress echoes.
pub fn pending_path(thread_id: &str) -> PathBuf {
    PathBuf::from(TMP_ROOT).join(format!("tether-pending-{}", sanitize(thread_id)))
}

/// Per-session dedup/cooldown file used by the notify and prompt hooks.
pub fn dedup_path(session_key: &str) -> PathBuf {
    PathBuf::from(TMP_ROOT).join(format!("tether-dedup-{}", sanitize(session_key)))
}

/// Cached DM channel id for a user, learned via `conversations.open`.
pub fn dm_cache_path(user_id: &str) -> PathBuf {
    PathBuf::from(TMP_ROOT).join(format!("tether-dm-{}", sanitize(user_id)))
}

/// Root under which downloaded attachments are stored per thread.
pub fn files_root() -> PathBuf {
    PathBuf::from(TMP_ROOT).join("tether-files")
}

/// Attachment directory for one thread.
pub fn thread_files_dir(thread_id: &str) -> PathBuf {
    files_root().join(sanitize(thread_id))
}

/// Keeps ids usable as single path components. Slack thread timestamps are
/// `\d+\.\d+` so this is normally the identity function.
fn sanitize(raw: &str) -> String {
    let sanitized = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
