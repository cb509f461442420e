//! File-backed registry store: `load` / `update` / `get` / `put` / `delete`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use tether_core::paths;
use tether_core::write_text_atomic;

use crate::locking::acquire_lock;
use crate::session::Session;

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_LOCK_STALE: Duration = Duration::from_secs(30);

/// Snapshot map keyed by thread id. BTreeMap keeps the file diff-stable.
pub type SessionMap = BTreeMap<String, Session>;

#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_wait: Duration,
    lock_stale: Duration,
}

impl RegistryStore {
    pub fn new(path: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            path,
            lock_path,
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_stale: DEFAULT_LOCK_STALE,
        }
    }

    /// Store at the shared per-instance location used by the hook binaries.
    pub fn for_instance(instance_digest: &str) -> Self {
        Self::new(
            paths::registry_path(instance_digest),
            paths::registry_lock_path(instance_digest),
        )
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read-only snapshot. An absent or corrupt file reads as empty; the
    /// registry is rebuilt organically rather than blocking the bridge.
    pub fn load(&self) -> SessionMap {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return SessionMap::new(),
        };
        serde_json::from_str::<SessionMap>(&raw).unwrap_or_default()
    }

    /// Locked read-modify-write. `apply` must stay pure and fast: no chat or
    /// muxer I/O while the lock is held.
    pub fn update<T>(&self, apply: impl FnOnce(&mut SessionMap) -> T) -> Result<T> {
        let _guard = acquire_lock(&self.lock_path, self.lock_wait, self.lock_stale)
            .with_context(|| format!("registry lock {}", self.lock_path.display()))?;
        let mut sessions = self.load();
        let result = apply(&mut sessions);
        let mut payload = serde_json::to_string_pretty(&sessions)
            .context("failed to serialize session registry")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write registry {}", self.path.display()))?;
        Ok(result)
    }

    pub fn get(&self, thread_id: &str) -> Option<Session> {
        self.load().get(thread_id).cloned()
    }

    pub fn put(&self, session: Session) -> Result<()> {
        self.update(|sessions| {
            sessions.insert(session.thread_id.clone(), session);
        })
    }

    pub fn delete(&self, thread_id: &str) -> Result<Option<Session>> {
        self.update(|sessions| sessions.remove(thread_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    fn test_store(dir: &std::path::Path) -> RegistryStore {
        RegistryStore::new(dir.join("registry.json"), dir.join("registry.json.lock"))
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = test_store(tempdir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = test_store(tempdir.path());
        std::fs::write(store.path(), "{not json").expect("corrupt");
        assert!(store.load().is_empty());
    }

    #[test]
    fn put_get_delete_round_trip() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = test_store(tempdir.path());

        let session = Session::new("1001.0", "D1", "new-1", "/tmp");
        store.put(session).expect("put");

        let loaded = store.get("1001.0").expect("get");
        assert_eq!(loaded.window, "new-1");
        assert_eq!(loaded.status, SessionStatus::Starting);

        let removed = store.delete("1001.0").expect("delete");
        assert!(removed.is_some());
        assert!(store.get("1001.0").is_none());
    }

    #[test]
    fn update_mutates_in_place_and_persists() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = test_store(tempdir.path());
        store
            .put(Session::new("1001.0", "D1", "new-1", "/tmp"))
            .expect("put");

        store
            .update(|sessions| {
                if let Some(session) = sessions.get_mut("1001.0") {
                    session.mark_idle();
                }
            })
            .expect("update");

        let reread = store.get("1001.0").expect("get");
        assert_eq!(reread.status, SessionStatus::Idle);
        assert!(reread.idle_since.is_some());
    }

    #[test]
    fn update_leaves_no_lock_behind() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = test_store(tempdir.path());
        store
            .update(|sessions| {
                sessions.insert(
                    "1001.0".to_string(),
                    Session::new("1001.0", "D1", "new-1", "/tmp"),
                );
            })
            .expect("update");
        assert!(!tempdir.path().join("registry.json.lock").exists());
    }
}
