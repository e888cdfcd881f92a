//! Queued-task dispatch: deterministic scoring, assignment, rebalancing.
//!
//! Scoring is a fixed weighted sum; given the same state it always picks
//! the same member. Weights are constants, not configuration.

use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::TaskPriority;
use coord_store::StateStore;
use coord_task::board::{CreateTask, TaskBoard, UpdateTask};
use coord_task::task::TaskStatus;
use coord_worker::meta as worker_meta;
use coord_worker::spawn::{BudgetDefaults, SpawnOutcome, SpawnRequest};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::team::{DispatchSpec, Member, QueuedTask, Team, Teams};

/// Scoring weights, in score units per §"assigner" of the team contract.
pub const W_ROLE: f64 = 3.0;
pub const W_AVAIL: f64 = 2.0;
pub const W_AFFINITY: f64 = 1.5;
pub const W_PRESENCE: f64 = 1.0;
pub const W_COST: f64 = 1.0;

/// A member at or above this many open tasks scores zero availability.
const AVAILABILITY_CAP: usize = 2;

/// Rebalance never proposes more than this many queue entries per call.
pub const MAX_REBALANCE: usize = 50;

#[derive(Debug, Serialize)]
pub struct MemberScore {
    pub member: String,
    pub score: f64,
    pub open_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct AssignmentOutcome {
    pub task_id: String,
    pub assignee: String,
    pub worker: SpawnOutcome,
    pub scores: Vec<MemberScore>,
}

/// Queue a task for later dispatch: a board task scoped to the team plus
/// a queue entry capturing the dispatch payload.
#[derive(Debug, Clone, Default)]
pub struct QueueTaskParams {
    pub subject: String,
    pub prompt: String,
    pub directory: String,
    pub task_id: Option<String>,
    pub priority: Option<TaskPriority>,
    pub role_hint: Option<String>,
    pub load_affinity: Option<String>,
    pub files: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub model: Option<String>,
    pub agent: Option<String>,
    pub runtime: Option<String>,
    pub actor: String,
}

pub fn queue_task(store: &StateStore, team_name: &str, params: QueueTaskParams) -> Result<String> {
    let teams = Teams::new(store.clone());
    let team_name = coord_core::ident::normalize_team_name(team_name)?;
    teams.require(&team_name)?;
    if params.prompt.trim().is_empty() {
        return Err(CoordError::validation("prompt", "must not be empty").into());
    }
    if params.directory.trim().is_empty() {
        return Err(CoordError::validation("directory", "must not be empty").into());
    }

    let board = TaskBoard::new(store.clone());
    let mut metadata = serde_json::Map::new();
    if let Some(affinity) = &params.load_affinity {
        metadata.insert("load_affinity".to_string(), json!(affinity));
    }
    let task = board.create(CreateTask {
        subject: params.subject.clone(),
        task_id: params.task_id.clone(),
        priority: params.priority,
        files: params.files.clone(),
        team_name: Some(team_name.clone()),
        metadata: Some(metadata),
        acceptance_criteria: params.acceptance_criteria.clone(),
        actor: params.actor.clone(),
        ..Default::default()
    })?;

    teams.push_queue(
        &team_name,
        QueuedTask {
            task_id: task.task_id.clone(),
            priority: task.priority,
            role_hint: params.role_hint,
            load_affinity: params.load_affinity,
            files: params.files,
            acceptance_criteria: params.acceptance_criteria,
            dispatch: DispatchSpec {
                prompt: params.prompt,
                directory: params.directory,
                model: params.model,
                agent: params.agent,
                runtime: params.runtime,
            },
            queued_at: coord_core::time::now_iso(),
        },
    )?;
    Ok(task.task_id)
}

/// Open (claimed or in-progress) tasks currently on a member.
fn open_task_count(board: &TaskBoard, team_name: &str, member: &str) -> usize {
    let (rows, _) = board.list(None, Some(member), Some(team_name));
    rows.iter()
        .filter(|row| matches!(row.status, TaskStatus::Claimed | TaskStatus::InProgress))
        .count()
}

fn role_match(member_role: &str, role_hint: Option<&str>) -> f64 {
    match role_hint {
        None => 0.5,
        Some(hint) if hint == member_role => 1.0,
        Some(_) => 0.0,
    }
}

fn availability(open_tasks: usize) -> f64 {
    match open_tasks {
        0 => 1.0,
        1 => 0.5,
        n if n >= AVAILABILITY_CAP => 0.0,
        _ => 0.0,
    }
}

/// 1.0 when the member has completed a task with the same affinity tag.
fn affinity(board: &TaskBoard, team_name: &str, member: &str, tag: Option<&str>) -> f64 {
    let Some(tag) = tag else { return 0.0 };
    let (rows, _) = board.list(Some(TaskStatus::Completed), Some(member), Some(team_name));
    for row in rows {
        if let Ok(Some(task)) = board.load(&row.task_id) {
            if task.metadata.get("load_affinity").and_then(|v| v.as_str()) == Some(tag) {
                return 1.0;
            }
        }
    }
    0.0
}

fn presence_score(presence: Option<&str>) -> f64 {
    match presence {
        None | Some("available") | Some("busy") => 1.0,
        Some(_) => 0.0,
    }
}

/// Fraction of the team's global budget held by this member's alive
/// workers. Zero when no cap is configured.
fn running_budget_fraction(store: &StateStore, team: &Team, member: &str) -> f64 {
    let Some(global) = team.policy.global_budget_tokens.filter(|g| *g > 0) else {
        return 0.0;
    };
    let mut held: u64 = 0;
    for worker_id in store.worker_ids() {
        if !worker_meta::is_worker_alive(store, &worker_id) {
            continue;
        }
        let Ok(Some(meta)) = worker_meta::load_meta(store, &worker_id) else {
            continue;
        };
        if meta.worker_name.as_deref() == Some(member)
            && meta.team_name.as_deref() == Some(team.team_name.as_str())
        {
            held += meta.budget_tokens.unwrap_or(0);
        }
    }
    (held as f64 / global as f64).min(1.0)
}

fn score_member(
    store: &StateStore,
    board: &TaskBoard,
    team: &Team,
    member: &Member,
    entry: &QueuedTask,
) -> MemberScore {
    let open_tasks = open_task_count(board, &team.team_name, &member.name);
    let score = W_ROLE * role_match(&member.role, entry.role_hint.as_deref())
        + W_AVAIL * availability(open_tasks)
        + W_AFFINITY * affinity(board, &team.team_name, &member.name, entry.load_affinity.as_deref())
        + W_PRESENCE * presence_score(member.presence.as_deref())
        - W_COST * running_budget_fraction(store, team, &member.name);
    MemberScore {
        member: member.name.clone(),
        score,
        open_tasks,
    }
}

/// Pick the best member for `entry`. Ties break on lowest open-task
/// count, then lexicographic name.
fn pick_member(scores: &[MemberScore]) -> Option<&MemberScore> {
    scores.iter().min_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.open_tasks.cmp(&b.open_tasks))
            .then_with(|| a.member.cmp(&b.member))
    })
}

/// Queue entries in dispatch order whose board task is still pending and
/// unblocked. Stale entries (task gone or already running) are skipped.
fn eligible_entries(board: &TaskBoard, team: &Team) -> Vec<QueuedTask> {
    let mut entries: Vec<QueuedTask> = team
        .queue
        .iter()
        .filter(|entry| {
            matches!(
                board.load(&entry.task_id),
                Ok(Some(task)) if task.status == TaskStatus::Pending
            )
        })
        .cloned()
        .collect();
    entries.sort_by(|a, b| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then_with(|| a.queued_at.cmp(&b.queued_at))
    });
    entries
}

/// Build the worker spawn request for a queue entry: policy defaults
/// merged under the entry's own dispatch fields.
fn build_spawn_request(team: &Team, entry: &QueuedTask, assignee: &str) -> SpawnRequest {
    let policy = &team.policy;
    let mut request = SpawnRequest::new(entry.dispatch.directory.clone(), entry.dispatch.prompt.clone());
    if let Some(runtime) = entry
        .dispatch
        .runtime
        .clone()
        .or_else(|| policy.default_runtime.clone())
    {
        request.runtime = runtime;
    }
    request.mode = policy.default_mode.unwrap_or_default();
    request.permission_mode = policy.permission_mode;
    request.require_plan = policy.require_plan;
    request.context_level = policy.default_context_level;
    request.isolate = Some(policy.default_isolate);
    request.budget_policy = policy.budget_policy;
    request.budget_tokens = policy.budget_tokens;
    request.global_budget_policy = policy.global_budget_policy;
    request.global_budget_tokens = policy.global_budget_tokens;
    request.max_active_workers = policy.max_active_workers;
    request.model = entry.dispatch.model.clone();
    request.agent = entry.dispatch.agent.clone();
    request.files = entry.files.clone();
    request.team_name = Some(team.team_name.clone());
    request.worker_name = Some(assignee.to_string());
    request
}

/// Assign the next eligible queued task: score, claim, spawn, dequeue.
pub async fn assign_next(
    store: &StateStore,
    team_name: &str,
    explicit_assignee: Option<&str>,
    defaults: &BudgetDefaults,
) -> Result<AssignmentOutcome> {
    let teams = Teams::new(store.clone());
    let board = TaskBoard::new(store.clone());
    let team_name = coord_core::ident::normalize_team_name(team_name)?;
    let team = teams.require(&team_name)?;
    if team.members.is_empty() && explicit_assignee.is_none() {
        return Err(CoordError::dependency(format!("team '{team_name}' has no members")).into());
    }

    let Some(entry) = eligible_entries(&board, &team).into_iter().next() else {
        return Err(CoordError::dependency(format!(
            "team '{team_name}' has no eligible queued tasks"
        ))
        .into());
    };

    let mut scores: Vec<MemberScore> = team
        .members
        .iter()
        .map(|member| score_member(store, &board, &team, member, &entry))
        .collect();
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.open_tasks.cmp(&b.open_tasks))
            .then_with(|| a.member.cmp(&b.member))
    });

    let assignee = match explicit_assignee {
        Some(assignee) => {
            coord_core::ident::validate_ident("assignee", assignee)?;
            assignee.to_string()
        }
        None => pick_member(&scores)
            .map(|s| s.member.clone())
            .ok_or_else(|| CoordError::dependency("no scorable members"))?,
    };

    // Claim first so a racing assigner cannot double-dispatch the entry.
    board.update(
        &entry.task_id,
        UpdateTask {
            status: Some(TaskStatus::Claimed),
            assignee: Some(assignee.clone()),
            note: Some("dispatched by team assigner".to_string()),
            actor: format!("team:{team_name}"),
            ..Default::default()
        },
    )?;

    let request = build_spawn_request(&team, &entry, &assignee);
    let worker = match coord_worker::spawn::spawn_worker(store, request, defaults).await {
        Ok(worker) => worker,
        Err(err) => {
            warn!(task_id = entry.task_id, error = %err, "dispatch spawn failed, unclaiming");
            let _ = board.update(
                &entry.task_id,
                UpdateTask {
                    status: Some(TaskStatus::Pending),
                    assignee: Some(String::new()),
                    note: Some(format!("dispatch failed: {err}")),
                    actor: format!("team:{team_name}"),
                    ..Default::default()
                },
            );
            return Err(err);
        }
    };

    teams.mutate(&team_name, "coord_team_assign_next", |team| {
        team.queue.retain(|q| q.task_id != entry.task_id);
        if let Some(member) = team.members.iter_mut().find(|m| m.name == assignee) {
            member.task_id = Some(entry.task_id.clone());
        }
        Ok(())
    })?;

    store.append_event(
        "TeamTaskDispatched",
        json!({
            "team": team_name,
            "task_id": entry.task_id,
            "assignee": assignee,
            "worker": worker.task_id,
        }),
    )?;
    info!(team = team_name, task_id = entry.task_id, assignee, "queued task dispatched");

    Ok(AssignmentOutcome {
        task_id: entry.task_id,
        assignee,
        worker,
        scores,
    })
}

#[derive(Debug, Serialize)]
pub struct RebalanceProposal {
    pub task_id: String,
    pub current_assignee: String,
    pub proposed_assignee: String,
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct RebalanceReport {
    pub proposals: Vec<RebalanceProposal>,
    /// In-progress tasks are never auto-moved; these need a human handoff.
    pub recommendations: Vec<String>,
}

/// Re-score queued tasks and (optionally) apply better assignments.
/// Tasks already in progress are only ever recommended for handoff.
pub fn rebalance(
    store: &StateStore,
    team_name: &str,
    limit: Option<usize>,
    apply: bool,
) -> Result<RebalanceReport> {
    let teams = Teams::new(store.clone());
    let board = TaskBoard::new(store.clone());
    let team_name = coord_core::ident::normalize_team_name(team_name)?;
    let team = teams.require(&team_name)?;

    let limit = limit.unwrap_or(MAX_REBALANCE).min(MAX_REBALANCE);
    let mut proposals = Vec::new();
    let mut recommendations = Vec::new();

    for entry in team.queue.iter().take(limit) {
        let Ok(Some(task)) = board.load(&entry.task_id) else {
            continue;
        };
        if task.status == TaskStatus::InProgress {
            recommendations.push(format!(
                "task '{}' is in progress under '{}'; use reassign for a handoff",
                task.task_id, task.assignee
            ));
            continue;
        }
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Claimed) {
            continue;
        }

        let scores: Vec<MemberScore> = team
            .members
            .iter()
            .map(|member| score_member(store, &board, &team, member, entry))
            .collect();
        let Some(best) = pick_member(&scores) else {
            continue;
        };
        if best.member == task.assignee {
            continue;
        }

        let applied = if apply {
            board
                .update(
                    &task.task_id,
                    UpdateTask {
                        assignee: Some(best.member.clone()),
                        note: Some("rebalanced".to_string()),
                        actor: format!("team:{team_name}"),
                        ..Default::default()
                    },
                )
                .is_ok()
        } else {
            false
        };

        proposals.push(RebalanceProposal {
            task_id: task.task_id,
            current_assignee: task.assignee,
            proposed_assignee: best.member.clone(),
            applied,
        });
    }

    Ok(RebalanceReport {
        proposals,
        recommendations,
    })
}

/// One text block: members with presence and load, queue depth, top
/// blockers, and the active policy.
pub fn status_compact(store: &StateStore, team_name: &str) -> Result<String> {
    let teams = Teams::new(store.clone());
    let board = TaskBoard::new(store.clone());
    let team_name = coord_core::ident::normalize_team_name(team_name)?;
    let team = teams.require(&team_name)?;

    let mut out = format!("team {team_name}");
    if let Some(project) = &team.project {
        out.push_str(&format!(" ({project})"));
    }
    out.push('\n');

    out.push_str(&format!("members ({}):\n", team.members.len()));
    for member in &team.members {
        let open = open_task_count(&board, &team_name, &member.name);
        out.push_str(&format!(
            "  {} [{}] {} open={}{}\n",
            member.name,
            member.role,
            member.presence.as_deref().unwrap_or("available"),
            open,
            member
                .task_id
                .as_deref()
                .map(|t| format!(" task={t}"))
                .unwrap_or_default()
        ));
    }

    out.push_str(&format!("queue depth: {}\n", team.queue.len()));

    let (rows, _) = board.list(None, None, Some(&team_name));
    let blocked: Vec<&coord_task::board::TaskRow> =
        rows.iter().filter(|row| !row.ready).take(5).collect();
    if !blocked.is_empty() {
        out.push_str("top blockers:\n");
        for row in blocked {
            out.push_str(&format!(
                "  {} <- [{}]\n",
                row.task_id,
                row.blocked_by.join(", ")
            ));
        }
    }

    let policy = &team.policy;
    out.push_str("policy:");
    if let Some(mode) = policy.default_mode {
        out.push_str(&format!(" mode={mode}"));
    }
    if let Some(permission) = policy.permission_mode {
        out.push_str(&format!(" permission={permission}"));
    }
    if policy.require_plan {
        out.push_str(" require_plan");
    }
    if let Some(tokens) = policy.budget_tokens {
        out.push_str(&format!(" budget={tokens}"));
    }
    if let Some(max) = policy.max_active_workers {
        out.push_str(&format!(" max_active={max}"));
    }
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
