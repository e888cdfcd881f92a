//! Wake, force-wake, and cooperative-shutdown protocols.
//!
//! The inbox is always the durable channel; keystroke injection and
//! signals are liveness hints layered on top. Force-wake stages never
//! raise: each stage reports its own outcome in the aggregate result.

use std::time::Duration;

use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::{MessagePriority, WorkerLayout, WorkerMode};
use coord_message::Messenger;
use coord_session::{SessionRecord, SessionRegistry};
use coord_store::StateStore;
use coord_worker::spawn::SpawnRequest;
use serde_json::json;
use tracing::{info, warn};

use crate::router::Ctx;

/// Stage budgets and respawn knobs. Fixed 2-second ticks; total wall time
/// is bounded no matter what the target process does.
#[derive(Debug, Clone)]
pub struct ForceWakeOptions {
    pub stage1_budget: Duration,
    pub stage2_budget: Duration,
    pub tick: Duration,
    /// Assistant CLI used for the stage-3 continuation respawn.
    pub respawn_runtime: String,
}

impl Default for ForceWakeOptions {
    fn default() -> Self {
        Self {
            stage1_budget: Duration::from_secs(12),
            stage2_budget: Duration::from_secs(10),
            tick: Duration::from_secs(2),
            respawn_runtime: "claude".to_string(),
        }
    }
}

/// Shutdown timer bounds, seconds.
pub const SHUTDOWN_DEFAULT_TIMEOUT: u64 = 60;
pub const SHUTDOWN_MAX_TIMEOUT: u64 = 300;

/// Plan-file lines folded into a continuation prompt.
const CONTINUATION_PLAN_LINES: usize = 60;
const CONTINUATION_FILES: usize = 30;
const CONTINUATION_OPS: usize = 5;

#[derive(Debug, Clone)]
pub struct PendingShutdown {
    pub target: String,
    pub requested_at: String,
}

/// Injection-only wake attempt. `false` is a normal outcome.
pub fn try_wake(store: &StateStore, session_id: &str, text: &str) -> bool {
    let registry = SessionRegistry::new(store.clone());
    let Ok(Some(record)) = registry.load(session_id) else {
        return false;
    };
    record
        .tty
        .as_deref()
        .is_some_and(|tty| coord_process::inject::inject_text(tty, text))
}

/// Wake: inject keystrokes best-effort, and regardless of the outcome
/// leave exactly one urgent inbox message so the next tool call surfaces
/// it.
pub fn wake_session(store: &StateStore, session_id: &str, text: &str) -> Result<String> {
    let injected = try_wake(store, session_id, text);
    Messenger::new(store.clone()).send(
        "coordinator",
        session_id,
        text,
        MessagePriority::Urgent,
        None,
        false,
    )?;
    Ok(format!(
        "wake {session_id}: injection {}, urgent inbox message queued",
        if injected { "delivered" } else { "not delivered" }
    ))
}

fn activity_changed(
    registry: &SessionRegistry,
    session_id: &str,
    baseline: &str,
) -> bool {
    matches!(
        registry.load(session_id),
        Ok(Some(record)) if record.last_active != baseline
    )
}

async fn await_activity(
    registry: &SessionRegistry,
    session_id: &str,
    baseline: &str,
    budget: Duration,
    tick: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(tick).await;
        if activity_changed(registry, session_id, baseline) {
            return true;
        }
    }
    false
}

/// Continuation prompt for the respawned assistant: everything the frozen
/// session knew that fits in a page.
fn continuation_prompt(record: &SessionRecord, message: &str) -> String {
    let mut prompt = format!(
        "You are resuming the work of a frozen assistant session.\n\
         Session: {} ({})\nBranch: {}\nOperator message: {}\n",
        record.session,
        if record.tab_name.is_empty() { "untitled" } else { &record.tab_name },
        if record.branch.is_empty() { "unknown" } else { &record.branch },
        message,
    );

    if let Some(plan) = record
        .plan_file
        .as_deref()
        .and_then(|path| coord_session::registry::plan_excerpt(path, CONTINUATION_PLAN_LINES))
    {
        prompt.push_str("\n## Plan excerpt\n");
        prompt.push_str(&plan);
        prompt.push('\n');
    }

    let files: Vec<&str> = record
        .files_touched
        .iter()
        .rev()
        .take(CONTINUATION_FILES)
        .map(String::as_str)
        .collect();
    if !files.is_empty() {
        prompt.push_str("\n## Recently touched files\n");
        for file in files.iter().rev() {
            prompt.push_str(file);
            prompt.push('\n');
        }
    }

    let ops: Vec<String> = record
        .recent_ops
        .iter()
        .rev()
        .take(CONTINUATION_OPS)
        .map(|op| {
            format!(
                "{} {}{}",
                op.timestamp,
                op.tool,
                op.file.as_deref().map(|f| format!(" {f}")).unwrap_or_default()
            )
        })
        .collect();
    if !ops.is_empty() {
        prompt.push_str("\n## Last operations\n");
        for op in ops.iter().rev() {
            prompt.push_str(op);
            prompt.push('\n');
        }
    }
    prompt
}

/// Three-stage escalation. Stages 1 and 2 are skipped under `force_kill`.
pub async fn force_wake(
    ctx: &Ctx,
    session_id: &str,
    message: &str,
    force_kill: bool,
    options: ForceWakeOptions,
) -> Result<String> {
    let registry = SessionRegistry::new(ctx.store.clone());
    let record = registry.require(session_id)?;
    let Some(pid) = record.host_pid else {
        return Err(
            CoordError::dependency(format!("session '{session_id}' has no host_pid")).into(),
        );
    };
    let baseline = record.last_active.clone();
    let tty = record.tty.clone().unwrap_or_default();
    let mut report = Vec::new();

    if !force_kill {
        // Stage 1: interrupt + inject, wait for signs of life.
        coord_process::interrupt_process(pid);
        let injected = coord_process::inject::inject_text(&tty, message);
        report.push(format!(
            "stage 1: interrupted pid {pid}, injection {}",
            if injected { "delivered" } else { "not delivered" }
        ));
        if await_activity(&registry, session_id, &baseline, options.stage1_budget, options.tick)
            .await
        {
            report.push("stage 1: session became active, stopping".to_string());
            return Ok(report.join("\n"));
        }

        // Stage 2: clear wedged children, interrupt again.
        let children = coord_process::child_pids(pid);
        for child in &children {
            coord_process::terminate_process_group(*child);
        }
        coord_process::interrupt_process(pid);
        let injected = coord_process::inject::inject_text(&tty, message);
        report.push(format!(
            "stage 2: terminated {} child process(es), re-interrupted, injection {}",
            children.len(),
            if injected { "delivered" } else { "not delivered" }
        ));
        if await_activity(&registry, session_id, &baseline, options.stage2_budget, options.tick)
            .await
        {
            report.push("stage 2: session became active, stopping".to_string());
            return Ok(report.join("\n"));
        }
    }

    // Stage 3: terminate the host and respawn with a continuation prompt.
    coord_process::terminate_process_group(pid);
    tokio::time::sleep(options.tick).await;
    if coord_process::is_process_alive(pid) {
        coord_process::kill_process_group(pid);
    }
    registry.mark_closed(session_id, "force_wake")?;
    report.push(format!("stage 3: terminated pid {pid}, session marked closed"));

    let prompt = continuation_prompt(&record, message);
    let directory = if std::path::Path::new(&record.cwd).is_dir() {
        record.cwd.clone()
    } else {
        std::env::temp_dir().display().to_string()
    };
    let mut request = SpawnRequest::new(directory, prompt);
    request.runtime = options.respawn_runtime.clone();
    request.mode = WorkerMode::Interactive;
    request.layout = WorkerLayout::Tab;
    request.notify_session_id = Some(session_id.to_string());
    match coord_worker::spawn_worker(&ctx.store, request, &ctx.defaults).await {
        Ok(outcome) => report.push(format!(
            "stage 3: continuation worker {} spawned ({})",
            outcome.task_id, outcome.emulator
        )),
        Err(err) => {
            warn!(session_id, error = %err, "continuation respawn failed");
            report.push(format!("stage 3: continuation respawn failed: {err}"));
        }
    }

    ctx.store.append_event(
        "SessionForceWoken",
        json!({"session": session_id, "pid": pid, "force_kill": force_kill}),
    )?;
    Ok(report.join("\n"))
}

/// Cooperative shutdown: urgent request message plus a bounded timer that
/// escalates to a force-kill if nobody responds.
pub async fn request_shutdown(
    ctx: &Ctx,
    target: &str,
    message: &str,
    force_timeout_secs: Option<u64>,
) -> Result<String> {
    let timeout = force_timeout_secs
        .unwrap_or(SHUTDOWN_DEFAULT_TIMEOUT)
        .min(SHUTDOWN_MAX_TIMEOUT)
        .max(1);
    let request_id = ulid::Ulid::new().to_string();

    Messenger::new(ctx.store.clone()).send(
        "coordinator",
        target,
        &format!("[SHUTDOWN_REQUEST:{request_id}] {message}"),
        MessagePriority::Urgent,
        None,
        false,
    )?;

    ctx.pending_shutdowns.lock().await.insert(
        request_id.clone(),
        PendingShutdown {
            target: target.to_string(),
            requested_at: coord_core::time::now_iso(),
        },
    );
    ctx.store.append_event(
        "ShutdownRequested",
        json!({"request_id": request_id, "target": target, "timeout_secs": timeout}),
    )?;

    let timer_ctx = ctx.clone();
    let timer_id = request_id.clone();
    let timer_target = target.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout)).await;
        let expired = timer_ctx.pending_shutdowns.lock().await.remove(&timer_id);
        if expired.is_none() {
            return; // answered in time
        }
        info!(request_id = timer_id, target = timer_target, "shutdown timer expired, forcing");
        force_kill_target(&timer_ctx, &timer_target).await;
        let _ = timer_ctx.store.append_event(
            "ShutdownForced",
            json!({"request_id": timer_id, "target": timer_target}),
        );
    });

    Ok(format!(
        "shutdown request {request_id} sent to {target}; force-kill in {timeout}s without a response"
    ))
}

/// Kill whatever the target names: a worker by task id, else a session by
/// host pid.
async fn force_kill_target(ctx: &Ctx, target: &str) {
    if ctx.store.worker_meta(target).exists() {
        if let Err(err) = coord_worker::kill_worker(&ctx.store, target).await {
            warn!(target, error = %err, "forced worker kill failed");
        }
        return;
    }
    let registry = SessionRegistry::new(ctx.store.clone());
    if let Ok(Some(record)) = registry.load(target) {
        if let Some(pid) = record.host_pid {
            coord_process::terminate_process_group(pid);
        }
        let _ = registry.mark_closed(target, "shutdown_timeout");
    }
}

pub async fn respond_shutdown(
    ctx: &Ctx,
    request_id: &str,
    approve: bool,
    reason: Option<&str>,
) -> Result<String> {
    let entry = ctx.pending_shutdowns.lock().await.remove(request_id);
    let Some(entry) = entry else {
        return Err(CoordError::dependency(format!(
            "shutdown request '{request_id}' is unknown or already resolved"
        ))
        .into());
    };

    ctx.store.append_event(
        "ShutdownResolved",
        json!({
            "request_id": request_id,
            "target": entry.target,
            "approved": approve,
            "reason": reason,
        }),
    )?;

    Ok(if approve {
        format!("shutdown {request_id} approved; target '{}' will exit on its own", entry.target)
    } else {
        format!(
            "shutdown {request_id} rejected by target '{}'{}",
            entry.target,
            reason.map(|r| format!(": {r}")).unwrap_or_default()
        )
    })
}

#[cfg(test)]
#[path = "wake_tests.rs"]
mod tests;
