//! Garbage collection of stale artifacts.
//!
//! Runs once at serve startup and on demand. Liveness is probed through a
//! caller-supplied function so the store stays free of OS dependencies; a
//! pid file whose process is alive is never touched.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::StateStore;

#[derive(Debug, Clone, Copy)]
pub struct GcPolicy {
    /// Worker artifacts with `.done` older than this are removed.
    pub worker_max_age_days: u64,
    /// Truncate `activity.jsonl` past this many lines…
    pub activity_max_lines: usize,
    /// …keeping this many.
    pub activity_keep_lines: usize,
    /// Remove session files `closed` for longer than this.
    pub closed_session_max_age_hours: u64,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            worker_max_age_days: 7,
            activity_max_lines: 50_000,
            activity_keep_lines: 20_000,
            closed_session_max_age_hours: 24,
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GcReport {
    pub workers_removed: Vec<String>,
    pub pipelines_removed: Vec<String>,
    pub sessions_removed: Vec<String>,
    pub activity_lines_dropped: usize,
    pub warnings: Vec<String>,
}

impl GcReport {
    pub fn is_noop(&self) -> bool {
        self.workers_removed.is_empty()
            && self.pipelines_removed.is_empty()
            && self.sessions_removed.is_empty()
            && self.activity_lines_dropped == 0
    }
}

impl StateStore {
    /// Sweep stale artifacts. `is_alive` probes a pid.
    pub fn run_gc(&self, policy: &GcPolicy, is_alive: &dyn Fn(u32) -> bool) -> GcReport {
        let mut report = GcReport::default();
        self.gc_workers(policy, is_alive, &mut report);
        self.gc_pipelines(policy, &mut report);
        self.gc_sessions(policy, &mut report);
        self.gc_activity(policy, &mut report);
        if !report.is_noop() {
            tracing::info!(
                workers = report.workers_removed.len(),
                pipelines = report.pipelines_removed.len(),
                sessions = report.sessions_removed.len(),
                activity_lines = report.activity_lines_dropped,
                "gc sweep complete"
            );
        }
        report
    }

    fn gc_workers(&self, policy: &GcPolicy, is_alive: &dyn Fn(u32) -> bool, report: &mut GcReport) {
        let max_age = chrono::Duration::days(policy.worker_max_age_days as i64);
        for task_id in self.worker_ids() {
            let meta = self.worker_meta(&task_id);
            if !self.worker_done(&task_id).exists() {
                continue;
            }
            if !older_than(&meta, max_age) {
                continue;
            }
            // A live pid means the done marker is lying; leave everything.
            if let Some(pid) = read_pid(&self.worker_pid(&task_id)) {
                if is_alive(pid) {
                    report.warnings.push(format!(
                        "worker {task_id}: pid {pid} still alive despite done marker, skipped"
                    ));
                    continue;
                }
            }
            for path in [
                self.worker_pid(&task_id),
                self.worker_log(&task_id),
                self.worker_prompt(&task_id),
                self.worker_done(&task_id),
                meta,
            ] {
                if let Err(err) = remove_if_present(&path) {
                    report.warnings.push(err.to_string());
                }
            }
            report.workers_removed.push(task_id);
        }
    }

    fn gc_pipelines(&self, policy: &GcPolicy, report: &mut GcReport) {
        let max_age = chrono::Duration::days(policy.worker_max_age_days as i64);
        let Ok(entries) = std::fs::read_dir(self.results_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let done = path.join("pipeline.done");
            if !done.exists() || !older_than(&done, max_age) {
                continue;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => report
                    .pipelines_removed
                    .push(entry.file_name().to_string_lossy().into_owned()),
                Err(err) => report
                    .warnings
                    .push(format!("failed to remove {}: {err}", path.display())),
            }
        }
    }

    fn gc_sessions(&self, policy: &GcPolicy, report: &mut GcReport) {
        let max_age = chrono::Duration::hours(policy.closed_session_max_age_hours as i64);
        for session_id in self.session_ids() {
            let path = self.session_file(&session_id);
            let Ok(Some(record)) = crate::json::read_json::<serde_json::Value>(&path) else {
                continue;
            };
            let closed = record.get("status").and_then(|s| s.as_str()) == Some("closed");
            if !closed {
                continue;
            }
            let stale = record
                .get("last_active")
                .and_then(|v| v.as_str())
                .and_then(coord_core::time::parse_iso)
                .is_none_or(|ts| Utc::now() - ts > max_age);
            if !stale {
                continue;
            }
            match remove_if_present(&path) {
                Ok(()) => report.sessions_removed.push(session_id),
                Err(err) => report.warnings.push(err.to_string()),
            }
        }
    }

    fn gc_activity(&self, policy: &GcPolicy, report: &mut GcReport) {
        let path = self.activity_log();
        let Ok(content) = std::fs::read_to_string(&path) else {
            return;
        };
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= policy.activity_max_lines {
            return;
        }
        let keep_from = lines.len() - policy.activity_keep_lines;
        let result = self.with_lock("activity", "gc", "truncate activity log", || {
            let parent = path.parent().context("activity log has no parent")?;
            let mut tmp = tempfile::NamedTempFile::new_in(parent)
                .context("failed to create activity temp file")?;
            for line in &lines[keep_from..] {
                writeln!(tmp, "{line}").context("failed to write activity temp file")?;
            }
            tmp.persist(&path).context("failed to persist activity log")?;
            Ok(())
        });
        match result {
            Ok(()) => report.activity_lines_dropped = keep_from,
            Err(err) => report.warnings.push(format!("activity truncation failed: {err}")),
        }
    }
}

fn older_than(path: &Path, max_age: chrono::Duration) -> bool {
    let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    let Ok(elapsed) = modified.elapsed() else {
        return false;
    };
    chrono::Duration::from_std(elapsed).is_ok_and(|age| age > max_age)
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod tests;
