//! Pending-hash files: how the prompt hook tells bridge-injected input from
//! input typed locally at the terminal.
//!
//! Immediately before injecting text (or an attachment path) into a window,
//! the bridge writes `md5(trimmed text)` to a per-thread file. When the
//! assistant later reports the submitted prompt, the hook hashes what it saw:
//! a match means the prompt came from chat and must not be echoed back.

use std::path::PathBuf;

use anyhow::Result;

use crate::atomic_io::write_text_atomic;
use crate::hashing::pending_hash;
use crate::paths;

/// Record the hash of text the bridge is about to inject.
pub fn write_pending(thread_id: &str, text: &str) -> Result<PathBuf> {
    let path = paths::pending_path(thread_id);
    write_text_atomic(&path, &pending_hash(text))?;
    Ok(path)
}

pub fn read_pending(thread_id: &str) -> Option<String> {
    let raw = std::fs::read_to_string(paths::pending_path(thread_id)).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn clear_pending(thread_id: &str) {
    let _ = std::fs::remove_file(paths::pending_path(thread_id));
}

/// Compare a prompt against the recorded hash. The file is consumed either
/// way: a mismatch means the record is stale and must not suppress a later
/// prompt.
pub fn consume_if_matches(thread_id: &str, prompt: &str) -> bool {
    let Some(recorded) = read_pending(thread_id) else {
        return false;
    };
    clear_pending(thread_id);
    recorded == pending_hash(prompt)
}
