//! Hash + cooldown dedup for hook posts.
//!
//! The assistant fires some hook events more than once per turn (and resumed
//! sessions may replay them). A per-session file records the hash and time
//! of the last post so identical content inside the cooldown window is
//! dropped.

use std::time::Duration;

use tether_core::{current_unix_timestamp, paths, pending_hash, write_text_atomic};

/// Decide whether `content` should be posted for this session, recording it
/// when the answer is yes. With a zero cooldown only exact immediate
/// repeats are still suppressed by hash.
pub fn should_post(session_key: &str, content: &str, cooldown: Duration) -> bool {
    let path = paths::dedup_path(session_key);
    let hash = pending_hash(content);
    let now = current_unix_timestamp();

    if let Ok(existing) = std::fs::read_to_string(&path) {
        let mut parts = existing.split_whitespace();
        let (Some(recorded_hash), Some(recorded_at)) = (parts.next(), parts.next()) else {
            return record(&path, &hash, now);
        };
        let recorded_at = recorded_at.parse::<u64>().unwrap_or(0);
        if recorded_hash == hash && now.saturating_sub(recorded_at) <= cooldown.as_secs() {
            return false;
        }
    }
    record(&path, &hash, now)
}

pub fn clear(session_key: &str) {
    let _ = std::fs::remove_file(paths::dedup_path(session_key));
}

fn record(path: &std::path::Path, hash: &str, now: u64) -> bool {
    let _ = write_text_atomic(path, &format!("{hash} {now}\n"));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_within_cooldown_is_suppressed() {
        let key = format!("dedup-a-{}", std::process::id());
        clear(&key);

        assert!(should_post(&key, "done", Duration::from_secs(3)));
        assert!(!should_post(&key, "done", Duration::from_secs(3)));
        // Different content posts immediately.
        assert!(should_post(&key, "something else", Duration::from_secs(3)));
        clear(&key);
    }

    #[test]
    fn expired_cooldown_posts_again() {
        let key = format!("dedup-b-{}", std::process::id());
        clear(&key);

        assert!(should_post(&key, "done", Duration::ZERO));
        // Zero cooldown: the recorded timestamp is already outside the
        // window unless the repeat lands in the same second.
        let path = paths::dedup_path(&key);
        let hash = pending_hash("done");
        write_text_atomic(&path, &format!("{hash} 0\n")).expect("age the record");
        assert!(should_post(&key, "done", Duration::from_secs(3)));
        clear(&key);
    }
}
