//! Single-writer guard: one bridge process per bot configuration.
//!
//! The lock file is keyed by the instance digest (sha256 prefix of the bot
//! token), so two bridges on distinct tokens coexist while a second bridge
//! on the same token aborts at startup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use tether_core::paths;

pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the per-instance lock or fail with a diagnostic.
    ///
    /// A lock file whose recorded PID is still alive means another bridge is
    /// running; a stale file (dead PID, unreadable content) is removed.
    pub fn acquire(instance_digest: &str) -> Result<Self> {
        let path = paths::instance_lock_path(instance_digest);

        if let Ok(existing) = fs::read_to_string(&path) {
            match existing.trim().parse::<u32>() {
                Ok(pid) if pid_is_alive(pid) => {
                    bail!(
                        "another bridge (pid {pid}) already holds {}; refusing to start",
                        path.display()
                    );
                }
                _ => {
                    let _ = fs::remove_file(&path);
                }
            }
        }

        fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write instance lock {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Also called from Drop; explicit release lets
    /// the signal handler clean up before exiting.
    pub fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn pid_is_alive(pid: u32) -> bool {
    if Path::new(&format!("/proc/{pid}")).exists() {
        return true;
    }
    // Fallback for hosts without procfs: signal 0 probes liveness.
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
