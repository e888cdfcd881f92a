//! Worker control: kill, resume, upgrade, batch spawn.

use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::{WorkerMode, WorkerStatus};
use coord_store::StateStore;
use serde::Serialize;
use tracing::info;

use crate::meta;
use crate::spawn::{BudgetDefaults, SpawnOutcome, SpawnRequest, spawn_worker};
use crate::supervise;

/// Upper bound on one batch-spawn call.
pub const MAX_BATCH_SPAWN: usize = 10;

/// Log lines folded into resume/upgrade continuation prompts.
const CONTINUATION_TAIL_LINES: usize = 30;

/// Terminate a worker's process group and record `cancelled`. Idempotent:
/// once `.done` exists, repeated kills report the recorded status.
pub async fn kill_worker(store: &StateStore, task_id: &str) -> Result<WorkerStatus> {
    coord_core::ident::validate_ident("task_id", task_id)?;

    if let Some(done) = meta::load_done(store, task_id)? {
        return Ok(done.status);
    }
    if meta::load_meta(store, task_id)?.is_none() {
        return Err(CoordError::dependency(format!("worker '{task_id}' not found")).into());
    }

    // Record the cancellation before signaling: once `.done` exists the
    // exit hook no-ops, so a fast exit cannot race the status to `failed`.
    let pid = meta::read_pid(store, task_id);
    supervise::finalize(store, task_id, WorkerStatus::Cancelled, None, None, None)?;

    if let Some(pid) = pid {
        coord_process::terminate_process_group(pid);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        if coord_process::is_process_alive(pid) {
            coord_process::kill_process_group(pid);
        }
    }

    info!(task_id, "worker killed");
    Ok(WorkerStatus::Cancelled)
}

fn continuation_prompt(store: &StateStore, task_id: &str, note: &str) -> Result<String> {
    let original = std::fs::read_to_string(store.worker_prompt(task_id)).unwrap_or_default();
    let tail = coord_store::json::read_tail_lines(
        &store.worker_log(task_id),
        CONTINUATION_TAIL_LINES,
    )?;

    let mut prompt = format!("Resume task {task_id}. {note}\n\n");
    prompt.push_str("## Original prompt\n");
    prompt.push_str(original.trim_end());
    prompt.push('\n');
    if !tail.is_empty() {
        prompt.push_str("\n## Previous output tail\n");
        prompt.push_str(&tail.join("\n"));
        prompt.push('\n');
    }
    Ok(prompt)
}

/// Spawn a fresh worker continuing a dead one's task, inheriting its
/// directory, runtime, and (unless overridden) mode.
pub async fn resume_worker(
    store: &StateStore,
    task_id: &str,
    mode: Option<WorkerMode>,
    defaults: &BudgetDefaults,
) -> Result<SpawnOutcome> {
    coord_core::ident::validate_ident("task_id", task_id)?;
    let old = meta::load_meta(store, task_id)?
        .ok_or_else(|| CoordError::dependency(format!("worker '{task_id}' not found")))?;
    if meta::is_worker_alive(store, task_id) {
        return Err(CoordError::conflict(format!(
            "worker '{task_id}' is still alive; kill it before resuming"
        ))
        .into());
    }

    let prompt = continuation_prompt(
        store,
        task_id,
        "The previous worker died before finishing; continue from where the output stops.",
    )?;

    let mut request = SpawnRequest::new(old.directory.clone(), prompt);
    request.mode = mode.unwrap_or(old.mode);
    request.runtime = old.runtime.clone();
    request.model = old.model.clone();
    request.agent = old.agent.clone();
    request.team_name = old.team_name.clone();
    request.notify_session_id = old.notify_session_id.clone();
    request.budget_tokens = old.budget_tokens;
    request.resumed_from = Some(task_id.to_string());

    spawn_worker(store, request, defaults).await
}

/// Kill a pipe-mode worker and respawn it interactive, with the log tail
/// folded into the continuation prompt.
pub async fn upgrade_worker(
    store: &StateStore,
    task_id: &str,
    defaults: &BudgetDefaults,
) -> Result<SpawnOutcome> {
    coord_core::ident::validate_ident("task_id", task_id)?;
    let old = meta::load_meta(store, task_id)?
        .ok_or_else(|| CoordError::dependency(format!("worker '{task_id}' not found")))?;
    if old.mode == WorkerMode::Interactive {
        return Err(CoordError::conflict(format!(
            "worker '{task_id}' is already interactive"
        ))
        .into());
    }

    if meta::is_worker_alive(store, task_id) {
        kill_worker(store, task_id).await?;
    }

    let prompt = continuation_prompt(
        store,
        task_id,
        "You are being upgraded from pipe to interactive mode; check your inbox for messages.",
    )?;

    let mut request = SpawnRequest::new(old.directory.clone(), prompt);
    request.mode = WorkerMode::Interactive;
    request.runtime = old.runtime.clone();
    request.model = old.model.clone();
    request.agent = old.agent.clone();
    request.team_name = old.team_name.clone();
    request.notify_session_id = old.notify_session_id.clone();
    request.budget_tokens = old.budget_tokens;
    request.resumed_from = Some(task_id.to_string());

    spawn_worker(store, request, defaults).await
}

/// Per-request outcome of a batch spawn.
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SpawnOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Spawn up to [`MAX_BATCH_SPAWN`] workers. One failure never aborts the
/// rest; each slot reports its own result.
pub async fn spawn_workers(
    store: &StateStore,
    requests: Vec<SpawnRequest>,
    defaults: &BudgetDefaults,
) -> Result<Vec<BatchEntry>> {
    if requests.is_empty() {
        return Err(CoordError::validation("workers", "must not be empty").into());
    }
    if requests.len() > MAX_BATCH_SPAWN {
        return Err(CoordError::validation(
            "workers",
            format!("at most {MAX_BATCH_SPAWN} workers per batch"),
        )
        .into());
    }

    let mut join_set = tokio::task::JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let store = store.clone();
        let defaults = defaults.clone();
        join_set.spawn(async move {
            let result = spawn_worker(&store, request, &defaults).await;
            (index, result)
        });
    }

    let mut entries = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        let (index, result) = joined.map_err(|err| CoordError::runtime(err.to_string()))?;
        match result {
            Ok(outcome) => entries.push(BatchEntry {
                index,
                outcome: Some(outcome),
                error: None,
            }),
            Err(err) => entries.push(BatchEntry {
                index,
                outcome: None,
                error: Some(err.to_string()),
            }),
        }
    }
    entries.sort_by_key(|entry| entry.index);
    Ok(entries)
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
