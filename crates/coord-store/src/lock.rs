//! Exclusive advisory locking for read-modify-write cycles.
//!
//! Each lockable target gets a sibling lock file under `locks/`; the
//! fd-lock write guard is held for the whole closure. The lock file body
//! carries diagnostic JSON so a stuck lock names its holder.
//!
//! Handlers must never hold more than one lock at a time, except the task
//! board's dual-endpoint edge updates, which acquire both locks in
//! canonical id order.

use std::io::{Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StateStore;

/// Diagnostic payload written into a held lock file.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockDiagnostic {
    pub pid: u32,
    pub tool: String,
    pub acquired_at: DateTime<Utc>,
    pub reason: String,
}

impl StateStore {
    /// Run `f` while holding the exclusive lock named `name`.
    ///
    /// Blocks until the lock is free. `tool` and `reason` go into the lock
    /// file for diagnosis; they do not affect semantics.
    pub fn with_lock<T>(
        &self,
        name: &str,
        tool: &str,
        reason: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let lock_path = self.lock_file(name);
        std::fs::create_dir_all(self.locks_dir())
            .with_context(|| format!("failed to create locks dir: {}", self.locks_dir().display()))?;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;

        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = lock
            .write()
            .with_context(|| format!("failed to acquire lock: {}", lock_path.display()))?;

        let diagnostic = LockDiagnostic {
            pid: std::process::id(),
            tool: tool.to_string(),
            acquired_at: Utc::now(),
            reason: reason.to_string(),
        };
        // Best-effort: diagnostics must never fail the guarded operation.
        if let Ok(json) = serde_json::to_string(&diagnostic) {
            let _ = guard.set_len(0);
            let _ = guard.seek(SeekFrom::Start(0));
            let _ = guard.write_all(json.as_bytes());
            let _ = guard.flush();
        }

        f()
    }

    /// Lock name for an inbox target.
    pub fn inbox_lock_name(target_id: &str) -> String {
        format!("inbox-{target_id}")
    }

    /// Lock name for a session record.
    pub fn session_lock_name(session_id: &str) -> String {
        format!("session-{session_id}")
    }

    /// Lock name for a task record.
    pub fn task_lock_name(task_id: &str) -> String {
        format!("task-{task_id}")
    }

    /// Lock name for a team record (queue and members included).
    pub fn team_lock_name(team_name: &str) -> String {
        format!("team-{team_name}")
    }

    /// Lock name for a worker's artifacts.
    pub fn worker_lock_name(task_id: &str) -> String {
        format!("worker-{task_id}")
    }
}
