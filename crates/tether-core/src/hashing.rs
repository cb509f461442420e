//! Content hashes backing the cross-process file contracts.
//!
//! Pending and dedup files carry an md5 of trimmed text; the instance digest
//! that namespaces all shared `/tmp` files is a sha256 prefix over the bot
//! token so two bridges on distinct tokens never collide.

use md5::{Digest as _, Md5};
use sha2::Sha256;

/// Hash used by the pending/dedup file contract: md5 over trimmed text,
/// lowercase hex. Both the bridge and the hooks must trim before hashing or
/// echo suppression silently stops matching.
pub fn pending_hash(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.trim().as_bytes());
    hex_encode(&hasher.finalize())
}

/// First 8 hex chars of sha256 over the bot token. Namespaces the registry,
/// the instance lock, and nothing else; per-thread files key on thread ids.
pub fn instance_digest(bot_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bot_token.as_bytes());
    let digest = hex_encode(&hasher.finalize());
    digest[..8].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
