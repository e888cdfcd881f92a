//! Worker spawning: option resolution, pre-checks, launch, supervision
//! hand-off.

use anyhow::{Context, Result};
use coord_core::CoordError;
use coord_core::types::{
    BudgetPolicy, ContextLevel, PermissionMode, WorkerLayout, WorkerMode, WorkerRole, WorkerStatus,
};
use coord_store::StateStore;
use coord_store::json::write_json_atomic;
use serde_json::json;
use tracing::{info, warn};

use crate::meta::{self, WorkerMeta};
use crate::supervise;

/// Spawn options. Unset fields fall back to role presets, then to
/// environment defaults, then to type defaults.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub directory: String,
    pub prompt: String,
    pub task_id: Option<String>,
    pub files: Vec<String>,
    pub mode: WorkerMode,
    pub runtime: String,
    pub layout: WorkerLayout,
    pub isolate: Option<bool>,
    pub role: Option<WorkerRole>,
    pub permission_mode: Option<PermissionMode>,
    pub require_plan: bool,
    pub context_level: Option<ContextLevel>,
    pub model: Option<String>,
    pub agent: Option<String>,
    pub budget_policy: Option<BudgetPolicy>,
    pub budget_tokens: Option<u64>,
    pub global_budget_policy: Option<BudgetPolicy>,
    pub global_budget_tokens: Option<u64>,
    pub max_active_workers: Option<usize>,
    pub team_name: Option<String>,
    pub worker_name: Option<String>,
    pub notify_session_id: Option<String>,
    pub max_turns: Option<u32>,
    pub context_summary: Option<String>,
    pub resumed_from: Option<String>,
}

impl SpawnRequest {
    pub fn new(directory: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prompt: prompt.into(),
            task_id: None,
            files: Vec::new(),
            mode: WorkerMode::Pipe,
            runtime: "claude".to_string(),
            layout: WorkerLayout::Background,
            isolate: None,
            role: None,
            permission_mode: None,
            require_plan: false,
            context_level: None,
            model: None,
            agent: None,
            budget_policy: None,
            budget_tokens: None,
            global_budget_policy: None,
            global_budget_tokens: None,
            max_active_workers: None,
            team_name: None,
            worker_name: None,
            notify_session_id: None,
            max_turns: None,
            context_summary: None,
            resumed_from: None,
        }
    }
}

/// Fleet-wide budget defaults from the environment.
#[derive(Debug, Clone, Default)]
pub struct BudgetDefaults {
    pub worker_budget_tokens: Option<u64>,
    pub global_policy: Option<BudgetPolicy>,
    pub global_tokens: Option<u64>,
    pub max_active_workers: Option<usize>,
}

impl BudgetDefaults {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }
        Self {
            worker_budget_tokens: parse("COORDINATOR_WORKER_BUDGET_TOKENS"),
            global_policy: std::env::var("COORDINATOR_GLOBAL_BUDGET_POLICY")
                .ok()
                .and_then(|v| BudgetPolicy::parse(&v)),
            global_tokens: parse("COORDINATOR_GLOBAL_BUDGET_TOKENS"),
            max_active_workers: parse("COORDINATOR_MAX_ACTIVE_WORKERS"),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SpawnOutcome {
    pub task_id: String,
    pub pid: u32,
    /// Terminal emulator used, or `background`.
    pub emulator: String,
    pub warnings: Vec<String>,
}

/// Role presets fill permission mode, isolation, and context level when
/// the caller left them unset.
fn apply_role_preset(request: &mut SpawnRequest) {
    let Some(role) = request.role else { return };
    let (permission, isolate, context) = match role {
        WorkerRole::Researcher => (PermissionMode::ReadOnly, false, ContextLevel::Standard),
        WorkerRole::Implementer => (PermissionMode::AcceptEdits, true, ContextLevel::Standard),
        WorkerRole::Reviewer => (PermissionMode::ReadOnly, false, ContextLevel::Full),
        WorkerRole::Planner => (PermissionMode::PlanOnly, false, ContextLevel::Full),
    };
    request.permission_mode.get_or_insert(permission);
    request.isolate.get_or_insert(isolate);
    request.context_level.get_or_insert(context);
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b || basename(a) == basename(b)
}

/// Reject when any requested file is claimed by a currently-alive worker.
fn check_file_conflicts(store: &StateStore, task_id: &str, files: &[String]) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    for other in store.worker_ids() {
        if other == task_id || !meta::is_worker_alive(store, &other) {
            continue;
        }
        let Some(other_meta) = meta::load_meta(store, &other)? else {
            continue;
        };
        let overlapping: Vec<&String> = files
            .iter()
            .filter(|f| other_meta.files.iter().any(|o| paths_overlap(f, o)))
            .collect();
        if let Some(first) = overlapping.first() {
            return Err(CoordError::conflict(format!(
                "file '{first}' already claimed by alive worker '{other}'"
            ))
            .into());
        }
    }
    Ok(())
}

/// Enforce the global token budget and the active-worker cap.
fn check_budgets(
    store: &StateStore,
    request: &SpawnRequest,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let mut alive = 0usize;
    let mut committed: u64 = 0;
    for other in store.worker_ids() {
        if !meta::is_worker_alive(store, &other) {
            continue;
        }
        alive += 1;
        if let Some(other_meta) = meta::load_meta(store, &other)? {
            committed += other_meta.budget_tokens.unwrap_or(0);
        }
    }

    if let Some(max_active) = request.max_active_workers {
        if alive >= max_active {
            return Err(CoordError::policy(
                "max_active_workers",
                format!("{alive} workers alive, cap is {max_active}"),
            )
            .into());
        }
    }

    let policy = request.global_budget_policy.unwrap_or_default();
    if policy == BudgetPolicy::Off {
        return Ok(());
    }
    let Some(global_cap) = request.global_budget_tokens else {
        return Ok(());
    };
    let requested = request.budget_tokens.unwrap_or(0);
    if committed + requested > global_cap {
        let message = format!(
            "committed {committed} + requested {requested} tokens exceeds global cap {global_cap}"
        );
        match policy {
            BudgetPolicy::Enforce => {
                return Err(CoordError::policy("global_budget", message).into());
            }
            BudgetPolicy::Warn => warnings.push(format!("budget warning: {message}")),
            BudgetPolicy::Off => {}
        }
    }
    Ok(())
}

/// Runtime-specific argument shape. Unknown runtimes get the prompt on
/// stdin with no extra flags.
fn runtime_args(runtime: &str, mode: WorkerMode) -> Vec<String> {
    match (runtime, mode) {
        ("claude", WorkerMode::Pipe) => vec!["--print".to_string()],
        ("codex", WorkerMode::Pipe) => vec!["exec".to_string()],
        _ => Vec::new(),
    }
}

/// Prior-context header size caps per level, in bytes.
fn context_cap(level: ContextLevel) -> usize {
    match level {
        ContextLevel::Minimal => 3 * 1024,
        ContextLevel::Standard => 10 * 1024,
        ContextLevel::Full => 30 * 1024,
    }
}

/// Assemble the prior-context header: identity line always, then team
/// context, then (full only) the lead's exported context, truncated to the
/// level's cap.
fn build_context_header(
    store: &StateStore,
    request: &SpawnRequest,
    task_id: &str,
    level: ContextLevel,
) -> String {
    let mut header = format!(
        "## Coordinator context\nWorker {task_id} in {}{}\n",
        request.directory,
        request
            .team_name
            .as_deref()
            .map(|t| format!(" (team {t})"))
            .unwrap_or_default()
    );

    if let Some(team) = request.team_name.as_deref() {
        if level != ContextLevel::Minimal {
            if let Ok(entries) = std::fs::read_dir(store.context_dir(team)) {
                let mut names: Vec<_> = entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension().is_some_and(|ext| ext == "md")
                            && p.file_name().is_some_and(|n| n != "lead-context.md")
                    })
                    .collect();
                names.sort();
                for path in names {
                    if let Ok(body) = std::fs::read_to_string(&path) {
                        header.push_str(&format!(
                            "\n### {}\n{body}\n",
                            path.file_stem().unwrap_or_default().to_string_lossy()
                        ));
                    }
                }
            }
        }
        if level == ContextLevel::Full {
            if let Ok(lead) = std::fs::read_to_string(store.lead_context_file(team)) {
                header.push_str("\n### Lead context\n");
                header.push_str(&lead);
                header.push('\n');
            }
        }
    }

    let cap = context_cap(level);
    if header.len() > cap {
        let mut end = cap;
        while !header.is_char_boundary(end) {
            end -= 1;
        }
        header.truncate(end);
        header.push_str("\n[context truncated]\n");
    }
    header
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Spawn one worker. Validations and pre-checks all happen before any
/// artifact is written.
pub async fn spawn_worker(
    store: &StateStore,
    mut request: SpawnRequest,
    defaults: &BudgetDefaults,
) -> Result<SpawnOutcome> {
    // ── validation, before any lock or write ─────────────────────────
    let task_id = coord_core::ident::resolve_id("task_id", request.task_id.as_deref(), 'W')?;
    coord_core::ident::validate_ident("runtime", &request.runtime)?;
    if let Some(model) = request.model.as_deref() {
        coord_core::ident::validate_model_ident("model", model)?;
    }
    if let Some(agent) = request.agent.as_deref() {
        coord_core::ident::validate_model_ident("agent", agent)?;
    }
    if let Some(team) = request.team_name.as_deref() {
        coord_core::ident::validate_ident("team_name", team)?;
    }
    if let Some(name) = request.worker_name.as_deref() {
        coord_core::ident::validate_ident("worker_name", name)?;
    }
    if request.prompt.trim().is_empty() {
        return Err(CoordError::validation("prompt", "must not be empty").into());
    }

    if request.require_plan {
        request.permission_mode = Some(PermissionMode::PlanOnly);
    }
    apply_role_preset(&mut request);
    if request.budget_tokens.is_none() {
        request.budget_tokens = defaults.worker_budget_tokens;
    }
    if request.global_budget_policy.is_none() {
        request.global_budget_policy = defaults.global_policy;
    }
    if request.global_budget_tokens.is_none() {
        request.global_budget_tokens = defaults.global_tokens;
    }
    if request.max_active_workers.is_none() {
        request.max_active_workers = defaults.max_active_workers;
    }

    let directory = std::path::PathBuf::from(&request.directory);
    if !directory.is_dir() {
        return Err(CoordError::dependency(format!(
            "directory '{}' does not exist",
            request.directory
        ))
        .into());
    }
    let runtime_path = coord_process::resolve_runtime(&request.runtime)?;

    if meta::is_worker_alive(store, &task_id) {
        return Err(CoordError::conflict(format!(
            "worker '{task_id}' is already alive"
        ))
        .into());
    }

    let mut warnings = Vec::new();
    check_file_conflicts(store, &task_id, &request.files)?;
    check_budgets(store, &request, &mut warnings)?;

    // ── isolation ────────────────────────────────────────────────────
    let work_dir = if request.isolate.unwrap_or(false) {
        create_worktree(store, &task_id, &directory)?
    } else {
        directory.clone()
    };

    // ── artifacts (meta and prompt happen-before the pid file) ───────
    let permission_mode = request.permission_mode.unwrap_or_default();
    let context_level = request.context_level.unwrap_or_default();

    let mut prompt_body = build_context_header(store, &request, &task_id, context_level);
    if let Some(summary) = request.context_summary.as_deref() {
        prompt_body.push_str("\n### Lead summary\n");
        prompt_body.push_str(summary);
        prompt_body.push('\n');
    }
    prompt_body.push('\n');
    prompt_body.push_str(&request.prompt);
    prompt_body.push('\n');

    let prompt_path = store.worker_prompt(&task_id);
    std::fs::create_dir_all(store.results_dir()).context("failed to create results dir")?;
    std::fs::write(&prompt_path, &prompt_body)
        .with_context(|| format!("failed to write {}", prompt_path.display()))?;

    // The sidecar is what the external PreToolUse hook enforces; only
    // materialize it when there is something to enforce.
    let budget_policy = request.budget_policy.unwrap_or_default();
    if permission_mode != PermissionMode::AcceptEdits
        || request.max_turns.is_some()
        || budget_policy != BudgetPolicy::Off
    {
        write_json_atomic(
            &store.worker_settings(&task_id),
            &json!({
                "task_id": task_id,
                "permission_mode": permission_mode.as_str(),
                "max_turns": request.max_turns,
                "budget_policy": budget_policy.as_str(),
                "budget_tokens": request.budget_tokens,
            }),
        )?;
    }

    let worker_meta = WorkerMeta {
        task_id: task_id.clone(),
        directory: work_dir.display().to_string(),
        prompt_excerpt: meta::prompt_excerpt(&request.prompt),
        model: request.model.clone(),
        agent: request.agent.clone(),
        files: request.files.clone(),
        spawned: coord_core::time::now_iso(),
        status: WorkerStatus::Running,
        mode: request.mode,
        runtime: request.runtime.clone(),
        layout: request.layout,
        permission_mode,
        context_level,
        role: request.role,
        isolate: request.isolate.unwrap_or(false),
        budget_tokens: request.budget_tokens,
        max_turns: request.max_turns,
        team_name: request.team_name.clone(),
        worker_name: request.worker_name.clone(),
        notify_session_id: request.notify_session_id.clone(),
        emulator: None,
        resumed_from: request.resumed_from.clone(),
        finished: None,
        exit_code: None,
        signal: None,
        error: None,
    };
    meta::save_meta(store, &worker_meta)?;

    // ── launch ───────────────────────────────────────────────────────
    let args = runtime_args(&request.runtime, request.mode);
    let env = worker_env(store, &request, &task_id);

    let (pid, emulator) = match request.layout {
        WorkerLayout::Background => {
            spawn_background(store, &task_id, &runtime_path, &args, &work_dir, &env).await?
        }
        WorkerLayout::Tab | WorkerLayout::Split => {
            match spawn_in_terminal(store, &task_id, &runtime_path, &args, &work_dir, &request)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    warnings.push(format!("terminal launch failed ({err}), running in background"));
                    spawn_background(store, &task_id, &runtime_path, &args, &work_dir, &env).await?
                }
            }
        }
    };

    let mut finalized = worker_meta;
    finalized.emulator = Some(emulator.clone());
    meta::save_meta(store, &finalized)?;

    store.append_event(
        "WorkerSpawned",
        json!({
            "task_id": task_id,
            "pid": pid,
            "runtime": request.runtime,
            "mode": request.mode.as_str(),
            "team": request.team_name,
        }),
    )?;
    info!(task_id, pid, emulator, "worker spawned");

    Ok(SpawnOutcome {
        task_id,
        pid,
        emulator,
        warnings,
    })
}

fn worker_env(store: &StateStore, request: &SpawnRequest, task_id: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("COORD_TASK_ID".to_string(), task_id.to_string()),
        (
            "COORD_STATE_ROOT".to_string(),
            store.root().display().to_string(),
        ),
    ];
    if let Some(team) = request.team_name.as_deref() {
        env.push(("COORD_TEAM_NAME".to_string(), team.to_string()));
    }
    if let Some(session) = request.notify_session_id.as_deref() {
        env.push(("COORD_NOTIFY_SESSION".to_string(), session.to_string()));
    }
    if let Some(model) = request.model.as_deref() {
        env.push(("COORD_MODEL".to_string(), model.to_string()));
    }
    env
}

async fn spawn_background(
    store: &StateStore,
    task_id: &str,
    runtime_path: &std::path::Path,
    args: &[String],
    work_dir: &std::path::Path,
    env: &[(String, String)],
) -> Result<(u32, String)> {
    let spawned = coord_process::spawn_detached(
        &runtime_path.display().to_string(),
        args,
        work_dir,
        &store.worker_log(task_id),
        Some(&store.worker_prompt(task_id)),
        env,
    )
    .await;

    let spawned = match spawned {
        Ok(spawned) => spawned,
        Err(err) => {
            supervise::finalize(
                store,
                task_id,
                WorkerStatus::Failed,
                None,
                None,
                Some(&format!("spawn failed: {err}")),
            )?;
            return Err(err);
        }
    };

    std::fs::write(store.worker_pid(task_id), spawned.pid.to_string())
        .context("failed to write pid file")?;

    supervise::watch_child(store.clone(), task_id.to_string(), spawned.child);
    Ok((spawned.pid, "background".to_string()))
}

async fn spawn_in_terminal(
    store: &StateStore,
    task_id: &str,
    runtime_path: &std::path::Path,
    args: &[String],
    work_dir: &std::path::Path,
    request: &SpawnRequest,
) -> Result<(u32, String)> {
    let pid_path = store.worker_pid(task_id);
    let prompt_path = store.worker_prompt(task_id);
    let log_path = store.worker_log(task_id);

    let mut exec = shell_quote(&runtime_path.display().to_string());
    for arg in args {
        exec.push(' ');
        exec.push_str(&shell_quote(arg));
    }
    // The wrapper writes its own pid before exec so supervision can probe
    // it; interactive workers get the prompt as an argument, pipe workers
    // stream it from the prompt file and tee output into the log.
    let command = match request.mode {
        WorkerMode::Interactive => format!(
            "echo $$ > {pid}; exec {exec} \"$(cat {prompt})\"",
            pid = shell_quote(&pid_path.display().to_string()),
            prompt = shell_quote(&prompt_path.display().to_string()),
        ),
        WorkerMode::Pipe => format!(
            "echo $$ > {pid}; {exec} < {prompt} 2>&1 | tee -a {log}",
            pid = shell_quote(&pid_path.display().to_string()),
            prompt = shell_quote(&prompt_path.display().to_string()),
            log = shell_quote(&log_path.display().to_string()),
        ),
    };

    let emulator = coord_process::terminal::open_terminal(&command, work_dir, request.layout)?;

    // The wrapper races us to the pid file; give it a moment.
    let mut pid = 0u32;
    for _ in 0..20 {
        if let Some(found) = meta::read_pid(store, task_id) {
            pid = found;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    if pid == 0 {
        warn!(task_id, "terminal worker pid not observed yet");
    }
    supervise::watch_pid(store.clone(), task_id.to_string());
    Ok((pid, emulator))
}

/// `git worktree add` a disposable checkout for an isolated worker.
fn create_worktree(
    store: &StateStore,
    task_id: &str,
    directory: &std::path::Path,
) -> Result<std::path::PathBuf> {
    let worktrees = store.root().join("worktrees");
    std::fs::create_dir_all(&worktrees).context("failed to create worktrees dir")?;
    let worktree = worktrees.join(task_id);

    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(directory)
        .args(["worktree", "add", "--detach"])
        .arg(&worktree)
        .output()
        .context("failed to run git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoordError::dependency(format!(
            "git worktree add failed for '{}': {}",
            directory.display(),
            stderr.trim()
        ))
        .into());
    }
    Ok(worktree)
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
