//! Worker supervision: exit hooks, result reads, startup reconciliation.
//!
//! Finalization order is part of the contract: meta is updated, the pid
//! file removed, and only then does `.done` appear. Once `.done` exists
//! the reported terminal status never changes.

use anyhow::Result;
use coord_core::types::WorkerStatus;
use coord_store::StateStore;
use coord_store::json::{read_tail_lines, write_json_atomic};
use serde::Serialize;
use serde_json::json;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::meta::{self, DoneMarker, WorkerMeta};

/// Default log tail returned by `get_result`.
pub const DEFAULT_TAIL_LINES: usize = 100;

/// Poll cadence for pid-watched (terminal-hosted) workers.
const PID_WATCH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub task_id: String,
    /// `completed` once `.done` exists, else `running` / `unknown`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<WorkerMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<DoneMarker>,
    pub tail: Vec<String>,
}

/// Await a directly-spawned child and finalize its artifacts on exit.
pub fn watch_child(store: StateStore, task_id: String, mut child: Child) {
    tokio::spawn(async move {
        let outcome = match child.wait().await {
            Ok(status) => {
                let worker_status = if status.success() {
                    WorkerStatus::Completed
                } else {
                    WorkerStatus::Failed
                };
                finalize(
                    &store,
                    &task_id,
                    worker_status,
                    status.code(),
                    exit_signal(&status),
                    None,
                )
            }
            Err(err) => {
                warn!(task_id, error = %err, "wait failed for worker child");
                finalize(
                    &store,
                    &task_id,
                    WorkerStatus::Failed,
                    None,
                    None,
                    Some(&format!("wait failed: {err}")),
                )
            }
        };
        if let Err(err) = outcome {
            warn!(task_id, error = %err, "worker finalization failed");
        }
    });
}

/// Poll a pid (terminal-hosted worker) until it disappears, then finalize.
/// The exit code is unknowable from outside the emulator.
pub fn watch_pid(store: StateStore, task_id: String) {
    tokio::spawn(async move {
        // Wait for the wrapper to publish the pid first.
        let mut pid = None;
        for _ in 0..30 {
            pid = meta::read_pid(&store, &task_id);
            if pid.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        let Some(pid) = pid else {
            warn!(task_id, "terminal worker never published a pid");
            if let Err(err) = finalize(
                &store,
                &task_id,
                WorkerStatus::Failed,
                None,
                None,
                Some("worker pid never appeared"),
            ) {
                warn!(task_id, error = %err, "worker finalization failed");
            }
            return;
        };

        loop {
            tokio::time::sleep(PID_WATCH_INTERVAL).await;
            if store.worker_done(&task_id).exists() {
                return; // killed (or finalized) by someone else
            }
            if !coord_process::is_process_alive(pid) {
                break;
            }
        }
        debug!(task_id, pid, "terminal worker exited");
        if let Err(err) = finalize(&store, &task_id, WorkerStatus::Completed, None, None, None) {
            warn!(task_id, error = %err, "worker finalization failed");
        }
    });
}

/// Terminal transition: rewrite meta, drop the pid file, then write the
/// `.done` marker. Idempotent: an existing `.done` wins.
pub fn finalize(
    store: &StateStore,
    task_id: &str,
    status: WorkerStatus,
    exit_code: Option<i32>,
    signal: Option<i32>,
    error: Option<&str>,
) -> Result<()> {
    let lock = StateStore::worker_lock_name(task_id);
    let finalized = store.with_lock(&lock, "worker_finalize", status.as_str(), || {
        if store.worker_done(task_id).exists() {
            return Ok(false);
        }
        let finished = coord_core::time::now_iso();

        if let Some(mut worker_meta) = meta::load_meta(store, task_id)? {
            worker_meta.status = status;
            worker_meta.finished = Some(finished.clone());
            worker_meta.exit_code = exit_code;
            worker_meta.signal = signal;
            worker_meta.error = error.map(str::to_string);
            meta::save_meta(store, &worker_meta)?;
        }

        let pid_path = store.worker_pid(task_id);
        if pid_path.exists() {
            let _ = std::fs::remove_file(&pid_path);
        }

        write_json_atomic(
            &store.worker_done(task_id),
            &DoneMarker {
                status,
                finished,
                error: error.map(str::to_string),
            },
        )?;
        Ok(true)
    })?;

    if finalized {
        store.append_event(
            "WorkerFinished",
            json!({
                "task_id": task_id,
                "status": status.as_str(),
                "exit_code": exit_code,
            }),
        )?;
    }
    Ok(())
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Status plus log tail. `completed` covers every terminal disposition;
/// the meta carries the precise one.
pub fn get_result(store: &StateStore, task_id: &str, tail_lines: usize) -> Result<ResultView> {
    coord_core::ident::validate_ident("task_id", task_id)?;
    let worker_meta = meta::load_meta(store, task_id)?;
    let done = meta::load_done(store, task_id)?;

    if worker_meta.is_none() && done.is_none() {
        return Err(
            coord_core::CoordError::dependency(format!("worker '{task_id}' not found")).into(),
        );
    }

    let status = if done.is_some() {
        "completed"
    } else if meta::is_worker_alive(store, task_id) {
        "running"
    } else {
        "unknown"
    };

    let tail = read_tail_lines(&store.worker_log(task_id), tail_lines)?;
    Ok(ResultView {
        task_id: task_id.to_string(),
        status,
        meta: worker_meta,
        done,
        tail,
    })
}

/// Startup reconciliation: any worker without `.done` whose pid is gone
/// died while the coordinator was down. Mark it failed so `get_result`
/// stops reporting `unknown`.
pub fn reconcile_workers(store: &StateStore) -> Result<Vec<String>> {
    let mut reconciled = Vec::new();
    for task_id in store.worker_ids() {
        if store.worker_done(&task_id).exists() {
            continue;
        }
        if meta::is_worker_alive(store, &task_id) {
            continue;
        }
        finalize(
            store,
            &task_id,
            WorkerStatus::Failed,
            None,
            None,
            Some("worker died while the coordinator was down"),
        )?;
        reconciled.push(task_id);
    }
    Ok(reconciled)
}

#[cfg(test)]
#[path = "supervise_tests.rs"]
mod tests;
