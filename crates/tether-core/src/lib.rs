//! Foundational utilities shared across tether crates.
//!
//! Provides atomic file-write helpers, unix-time utilities, the content
//! hashes used by the pending/dedup file contracts, the shared `/tmp` path
//! scheme, and the bridge configuration model.

pub mod atomic_io;
pub mod config;
pub mod hashing;
pub mod paths;
pub mod pending;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use config::{BridgeConfig, MultiSessionConfig, Timing};
pub use hashing::{instance_digest, pending_hash};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn time_utils_ms_and_seconds_agree() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "hello bridge").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "hello bridge");
    }

    #[test]
    fn write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "first").expect("write first");
        write_text_atomic(&path, "second").expect("write second");
        assert_eq!(read_to_string(&path).expect("read"), "second");
    }
}
