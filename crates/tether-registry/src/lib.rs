//! Durable thread → session registry shared with out-of-process hooks.
//!
//! The registry is a single JSON file under `/tmp`, mutated under an
//! advisory lock by both the bridge and the hook binaries. The on-disk copy
//! is authoritative; no in-memory session outlives its record.

pub mod locking;
pub mod session;
pub mod store;

pub use session::{
    provisional_index, provisional_name, window_for_assistant, Session, SessionStatus,
    PROVISIONAL_PREFIX, WINDOW_ID_LEN,
};
pub use store::RegistryStore;
