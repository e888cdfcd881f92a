//! Task board operations.
//!
//! Every status transition happens inside the task's file lock. Edge
//! mutations touch two task files and take both locks in canonical id
//! order so concurrent edge updates cannot deadlock.

use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::TaskPriority;
use coord_store::StateStore;
use coord_store::json::{read_json, write_json_atomic};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::graph;
use crate::task::{AcceptanceCriterion, AuditEntry, Task, TaskStatus};

#[derive(Debug, Clone)]
pub struct TaskBoard {
    store: StateStore,
}

#[derive(Debug, Default, Clone)]
pub struct CreateTask {
    pub subject: String,
    pub description: Option<String>,
    pub task_id: Option<String>,
    pub assignee: Option<String>,
    pub priority: Option<TaskPriority>,
    pub files: Vec<String>,
    pub blocked_by: Vec<String>,
    pub team_name: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub approval_required: bool,
    pub acceptance_criteria: Vec<String>,
    pub actor: String,
}

#[derive(Debug, Default, Clone)]
pub struct UpdateTask {
    pub status: Option<TaskStatus>,
    pub subject: Option<String>,
    pub description: Option<String>,
    /// `Some("")` unassigns.
    pub assignee: Option<String>,
    pub priority: Option<TaskPriority>,
    pub files: Option<Vec<String>>,
    pub blocked_by: Option<Vec<String>>,
    /// Merge semantics: a `null` value deletes the key.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub acceptance_criteria: Option<Vec<AcceptanceCriterion>>,
    pub note: Option<String>,
    pub actor: String,
}

/// Board listing row, sorted by priority then recency.
#[derive(Debug, Serialize)]
pub struct TaskRow {
    pub task_id: String,
    pub subject: String,
    pub status: TaskStatus,
    pub assignee: String,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// No unmet blockers.
    pub ready: bool,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
}

/// Quality-gate view for one task.
#[derive(Debug, Serialize)]
pub struct QualityGates {
    pub task_id: String,
    pub criteria: Vec<AcceptanceCriterion>,
    pub satisfied: usize,
    pub total: usize,
    /// Completion is blocked while any criterion is unsatisfied.
    pub completion_blocked: bool,
}

/// Audit trail plus referenced handoff snapshots.
#[derive(Debug, Serialize)]
pub struct AuditView {
    pub task_id: String,
    pub audit: Vec<AuditEntry>,
    pub handoffs: Vec<serde_json::Value>,
}

impl TaskBoard {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn load(&self, task_id: &str) -> Result<Option<Task>> {
        read_json(&self.store.task_file(task_id))
    }

    pub fn require(&self, task_id: &str) -> Result<Task> {
        self.load(task_id)?
            .ok_or_else(|| CoordError::dependency(format!("task '{task_id}' not found")).into())
    }

    // ── create ───────────────────────────────────────────────────────

    pub fn create(&self, spec: CreateTask) -> Result<Task> {
        if spec.subject.trim().is_empty() {
            return Err(CoordError::validation("subject", "must not be empty").into());
        }
        let task_id = coord_core::ident::resolve_id("task_id", spec.task_id.as_deref(), 'T')?;
        for blocker in &spec.blocked_by {
            coord_core::ident::validate_ident("blocked_by", blocker)?;
            if self.load(blocker)?.is_none() {
                return Err(
                    CoordError::dependency(format!("blocker task '{blocker}' not found")).into(),
                );
            }
        }

        let now = coord_core::time::now_iso();
        let mut task = Task {
            task_id: task_id.clone(),
            subject: spec.subject.clone(),
            description: spec.description.unwrap_or_default(),
            status: TaskStatus::Pending,
            assignee: spec.assignee.unwrap_or_default(),
            team_name: spec.team_name.clone(),
            priority: spec.priority.unwrap_or_default(),
            files: spec.files.clone(),
            blocked_by: Vec::new(),
            blocks: Vec::new(),
            metadata: spec.metadata.unwrap_or_default(),
            created_at: now.clone(),
            updated_at: now,
            audit: Vec::new(),
            approval_required: spec.approval_required,
            approved_by: None,
            approved_at: None,
            acceptance_criteria: spec
                .acceptance_criteria
                .iter()
                .map(|text| AcceptanceCriterion {
                    text: text.clone(),
                    satisfied: false,
                })
                .collect(),
        };
        task.push_audit(None, TaskStatus::Pending.as_str(), &spec.actor, None);
        if spec.approval_required {
            task.status = TaskStatus::AwaitingApproval;
            task.push_audit(
                Some(TaskStatus::Pending),
                TaskStatus::AwaitingApproval.as_str(),
                &spec.actor,
                Some("plan approval required".to_string()),
            );
        }

        let path = self.store.task_file(&task_id);
        self.store.with_lock(
            &StateStore::task_lock_name(&task_id),
            "coord_create_task",
            "create",
            || {
                if path.exists() {
                    return Err(
                        CoordError::conflict(format!("task '{task_id}' already exists")).into(),
                    );
                }
                write_json_atomic(&path, &task)
            },
        )?;

        for blocker in &spec.blocked_by {
            self.add_edge(&task_id, blocker)?;
        }

        self.store
            .append_event("TaskCreated", json!({"task_id": task_id, "actor": spec.actor}))?;
        self.require(&task_id)
    }

    // ── edges ────────────────────────────────────────────────────────

    fn with_pair_lock<T>(
        &self,
        a: &str,
        b: &str,
        tool: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.store
            .with_lock(&StateStore::task_lock_name(lo), tool, "edge update", || {
                if lo == hi {
                    f()
                } else {
                    self.store
                        .with_lock(&StateStore::task_lock_name(hi), tool, "edge update", f)
                }
            })
    }

    /// Add `task blocked_by blocker`, maintaining the inverse edge. The
    /// cycle check re-runs inside the pair lock.
    fn add_edge(&self, task_id: &str, blocker_id: &str) -> Result<()> {
        self.with_pair_lock(task_id, blocker_id, "coord_update_task", || {
            if graph::would_create_cycle(&self.store, task_id, blocker_id)? {
                return Err(CoordError::conflict(format!(
                    "adding blocker '{blocker_id}' to '{task_id}' would create a cycle"
                ))
                .into());
            }
            let mut task = self.require(task_id)?;
            let mut blocker = self.require(blocker_id)?;
            if !task.blocked_by.contains(&blocker_id.to_string()) {
                task.blocked_by.push(blocker_id.to_string());
                task.updated_at = coord_core::time::now_iso();
                write_json_atomic(&self.store.task_file(task_id), &task)?;
            }
            if !blocker.blocks.contains(&task_id.to_string()) {
                blocker.blocks.push(task_id.to_string());
                write_json_atomic(&self.store.task_file(blocker_id), &blocker)?;
            }
            Ok(())
        })
    }

    fn remove_edge(&self, task_id: &str, blocker_id: &str) -> Result<()> {
        self.with_pair_lock(task_id, blocker_id, "coord_update_task", || {
            if let Some(mut task) = self.load(task_id)? {
                task.blocked_by.retain(|b| b != blocker_id);
                task.updated_at = coord_core::time::now_iso();
                write_json_atomic(&self.store.task_file(task_id), &task)?;
            }
            if let Some(mut blocker) = self.load(blocker_id)? {
                blocker.blocks.retain(|b| b != task_id);
                write_json_atomic(&self.store.task_file(blocker_id), &blocker)?;
            }
            Ok(())
        })
    }

    // ── update ───────────────────────────────────────────────────────

    pub fn update(&self, task_id: &str, changes: UpdateTask) -> Result<Task> {
        coord_core::ident::validate_ident("task_id", task_id)?;

        // Edge changes are validated up front, applied after the field
        // update; both ends exist before any lock is taken.
        let edge_plan = match &changes.blocked_by {
            Some(new_blockers) => {
                let current = self.require(task_id)?;
                for blocker in new_blockers {
                    coord_core::ident::validate_ident("blocked_by", blocker)?;
                    if self.load(blocker)?.is_none() {
                        return Err(CoordError::dependency(format!(
                            "blocker task '{blocker}' not found"
                        ))
                        .into());
                    }
                    if !current.blocked_by.contains(blocker)
                        && graph::would_create_cycle(&self.store, task_id, blocker)?
                    {
                        return Err(CoordError::conflict(format!(
                            "adding blocker '{blocker}' to '{task_id}' would create a cycle"
                        ))
                        .into());
                    }
                }
                let added: Vec<String> = new_blockers
                    .iter()
                    .filter(|b| !current.blocked_by.contains(b))
                    .cloned()
                    .collect();
                let removed: Vec<String> = current
                    .blocked_by
                    .iter()
                    .filter(|b| !new_blockers.contains(b))
                    .cloned()
                    .collect();
                Some((added, removed))
            }
            None => None,
        };

        let mut status_change: Option<(TaskStatus, TaskStatus)> = None;
        let mut reassignment: Option<(String, String)> = None;

        let task = self.store.with_lock(
            &StateStore::task_lock_name(task_id),
            "coord_update_task",
            "update",
            || {
                let mut task = self.require(task_id)?;

                if let Some(to) = changes.status {
                    if to != task.status {
                        let from = task.status;
                        from.transition(to).map_err(CoordError::conflict)?;
                        self.check_entry_gates(&task, to)?;
                        task.status = to;
                        task.push_audit(Some(from), to.as_str(), &changes.actor, changes.note.clone());
                        status_change = Some((from, to));
                    }
                }

                if let Some(subject) = &changes.subject {
                    if subject.trim().is_empty() {
                        return Err(CoordError::validation("subject", "must not be empty").into());
                    }
                    task.subject = subject.clone();
                }
                if let Some(description) = &changes.description {
                    task.description = description.clone();
                }
                if let Some(priority) = changes.priority {
                    task.priority = priority;
                }
                if let Some(files) = &changes.files {
                    task.files = files.clone();
                }
                if let Some(criteria) = &changes.acceptance_criteria {
                    task.acceptance_criteria = criteria.clone();
                }
                if let Some(metadata) = &changes.metadata {
                    for (key, value) in metadata {
                        if value.is_null() {
                            task.metadata.remove(key);
                        } else {
                            task.metadata.insert(key.clone(), value.clone());
                        }
                    }
                }
                if let Some(assignee) = &changes.assignee {
                    if *assignee != task.assignee {
                        if task.status == TaskStatus::InProgress {
                            reassignment = Some((task.assignee.clone(), assignee.clone()));
                        }
                        task.assignee = assignee.clone();
                    }
                }

                task.updated_at = coord_core::time::now_iso();
                write_json_atomic(&self.store.task_file(task_id), &task)?;
                Ok(task)
            },
        )?;

        if let Some((from_assignee, to_assignee)) = reassignment {
            self.write_handoff(task_id, &from_assignee, &to_assignee, None, None, &changes.actor)?;
        }
        if let Some((added, removed)) = edge_plan {
            for blocker in &added {
                self.add_edge(task_id, blocker)?;
            }
            for blocker in &removed {
                self.remove_edge(task_id, blocker)?;
            }
        }
        if let Some((from, to)) = status_change {
            self.store.append_event(
                "TaskStatusChanged",
                json!({
                    "task_id": task_id,
                    "from": from.as_str(),
                    "to": to.as_str(),
                    "actor": changes.actor,
                }),
            )?;
            info!(task_id, from = from.as_str(), to = to.as_str(), "task transition");
        }

        self.require(task_id)
    }

    /// Gates that depend on more than the (from, to) pair: blockers must
    /// be settled before work starts, approval must precede claiming, and
    /// completion requires every acceptance criterion satisfied.
    fn check_entry_gates(&self, task: &Task, to: TaskStatus) -> Result<()> {
        if matches!(to, TaskStatus::Claimed | TaskStatus::InProgress) {
            let (met, unmet) = graph::blockers_met(&self.store, task);
            if !met {
                return Err(CoordError::conflict(format!(
                    "task '{}' is blocked by unfinished tasks: {}",
                    task.task_id,
                    unmet.join(", ")
                ))
                .into());
            }
            if task.approval_required && task.approved_by.is_none() {
                return Err(CoordError::conflict(format!(
                    "task '{}' requires plan approval before work starts",
                    task.task_id
                ))
                .into());
            }
        }
        if to == TaskStatus::Completed {
            let unsatisfied = task.unsatisfied_criteria();
            if !unsatisfied.is_empty() {
                let texts: Vec<&str> = unsatisfied.iter().map(|c| c.text.as_str()).collect();
                return Err(CoordError::conflict(format!(
                    "task '{}' has unsatisfied acceptance criteria: {}",
                    task.task_id,
                    texts.join("; ")
                ))
                .into());
            }
        }
        Ok(())
    }

    // ── listing ──────────────────────────────────────────────────────

    pub fn list(
        &self,
        status: Option<TaskStatus>,
        assignee: Option<&str>,
        team_name: Option<&str>,
    ) -> (Vec<TaskRow>, Vec<String>) {
        let mut rows = Vec::new();
        let mut warnings = Vec::new();
        for task_id in self.store.task_ids() {
            let task = match self.load(&task_id) {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(err) => {
                    warnings.push(format!("task '{task_id}' skipped: {err}"));
                    continue;
                }
            };
            if let Some(status) = status {
                if task.status != status {
                    continue;
                }
            }
            if let Some(assignee) = assignee {
                if task.assignee != assignee {
                    continue;
                }
            }
            if let Some(team) = team_name {
                if task.team_name.as_deref() != Some(team) {
                    continue;
                }
            }
            let (ready, _) = graph::blockers_met(&self.store, &task);
            rows.push(TaskRow {
                task_id: task.task_id.clone(),
                subject: task.subject.clone(),
                status: task.status,
                assignee: task.assignee.clone(),
                priority: task.priority,
                team_name: task.team_name.clone(),
                ready,
                updated_at: task.updated_at.clone(),
                blocked_by: task.blocked_by.clone(),
            });
        }
        rows.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        (rows, warnings)
    }

    // ── reassignment and audit ───────────────────────────────────────

    /// Hand a task to a new assignee. Legal only while in progress;
    /// writes the handoff snapshot referenced by the audit trail.
    pub fn reassign(
        &self,
        task_id: &str,
        new_assignee: &str,
        reason: Option<&str>,
        progress_context: Option<&str>,
        actor: &str,
    ) -> Result<Task> {
        coord_core::ident::validate_ident("task_id", task_id)?;
        coord_core::ident::validate_ident("new_assignee", new_assignee)?;

        let mut from_assignee = String::new();
        self.store.with_lock(
            &StateStore::task_lock_name(task_id),
            "coord_reassign_task",
            "handoff",
            || {
                let mut task = self.require(task_id)?;
                if task.status != TaskStatus::InProgress {
                    return Err(CoordError::conflict(format!(
                        "task '{task_id}' is {}, reassignment requires in_progress",
                        task.status
                    ))
                    .into());
                }
                from_assignee = task.assignee.clone();
                task.assignee = new_assignee.to_string();
                task.updated_at = coord_core::time::now_iso();
                task.audit.push(AuditEntry {
                    ts: coord_core::time::now_iso(),
                    from: None,
                    to: "reassigned".to_string(),
                    actor: actor.to_string(),
                    note: reason.map(str::to_string),
                    details: Some(json!({
                        "from_assignee": from_assignee,
                        "to_assignee": new_assignee,
                    })),
                });
                write_json_atomic(&self.store.task_file(task_id), &task)
            },
        )?;

        self.write_handoff(task_id, &from_assignee, new_assignee, reason, progress_context, actor)?;
        self.store.append_event(
            "TaskReassigned",
            json!({"task_id": task_id, "from": from_assignee, "to": new_assignee}),
        )?;
        self.require(task_id)
    }

    fn write_handoff(
        &self,
        task_id: &str,
        from: &str,
        to: &str,
        reason: Option<&str>,
        progress_context: Option<&str>,
        actor: &str,
    ) -> Result<()> {
        let ts = coord_core::time::now();
        write_json_atomic(
            &self.store.handoff_file(task_id, ts.timestamp_millis()),
            &json!({
                "ts": coord_core::time::to_iso(ts),
                "task_id": task_id,
                "from": from,
                "to": to,
                "reason": reason,
                "progress_context": progress_context,
                "actor": actor,
            }),
        )
    }

    pub fn audit_view(&self, task_id: &str) -> Result<AuditView> {
        let task = self.require(task_id)?;
        let mut handoffs = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.store.handoffs_dir()) {
            let prefix = format!("{task_id}-");
            let mut paths: Vec<_> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().starts_with(&prefix))
                        .unwrap_or(false)
                })
                .collect();
            paths.sort();
            for path in paths {
                if let Ok(Some(snapshot)) = read_json::<serde_json::Value>(&path) {
                    handoffs.push(snapshot);
                }
            }
        }
        Ok(AuditView {
            task_id: task.task_id,
            audit: task.audit,
            handoffs,
        })
    }

    // ── quality gates and approval ───────────────────────────────────

    pub fn quality_gates(&self, task_id: &str) -> Result<QualityGates> {
        let task = self.require(task_id)?;
        let total = task.acceptance_criteria.len();
        let satisfied = task.acceptance_criteria.iter().filter(|c| c.satisfied).count();
        Ok(QualityGates {
            task_id: task.task_id,
            completion_blocked: satisfied < total,
            criteria: task.acceptance_criteria,
            satisfied,
            total,
        })
    }

    pub fn approve_plan(&self, task_id: &str, approver: &str) -> Result<Task> {
        coord_core::ident::validate_ident("task_id", task_id)?;
        self.store.with_lock(
            &StateStore::task_lock_name(task_id),
            "coord_approve_plan",
            "approve",
            || {
                let mut task = self.require(task_id)?;
                if task.status != TaskStatus::AwaitingApproval {
                    return Err(CoordError::conflict(format!(
                        "task '{task_id}' is {}, not awaiting approval",
                        task.status
                    ))
                    .into());
                }
                task.status = TaskStatus::Pending;
                task.approved_by = Some(approver.to_string());
                task.approved_at = Some(coord_core::time::now_iso());
                task.push_audit(
                    Some(TaskStatus::AwaitingApproval),
                    TaskStatus::Pending.as_str(),
                    approver,
                    Some("plan approved".to_string()),
                );
                task.updated_at = coord_core::time::now_iso();
                write_json_atomic(&self.store.task_file(task_id), &task)
            },
        )?;
        self.store.append_event(
            "TaskStatusChanged",
            json!({"task_id": task_id, "from": "awaiting_approval", "to": "pending", "actor": approver}),
        )?;
        self.require(task_id)
    }

    /// Rejection keeps the task gated; the feedback lands in the audit.
    pub fn reject_plan(&self, task_id: &str, feedback: &str, actor: &str) -> Result<Task> {
        coord_core::ident::validate_ident("task_id", task_id)?;
        self.store.with_lock(
            &StateStore::task_lock_name(task_id),
            "coord_reject_plan",
            "reject",
            || {
                let mut task = self.require(task_id)?;
                if task.status != TaskStatus::AwaitingApproval {
                    return Err(CoordError::conflict(format!(
                        "task '{task_id}' is {}, not awaiting approval",
                        task.status
                    ))
                    .into());
                }
                task.push_audit(
                    Some(TaskStatus::AwaitingApproval),
                    TaskStatus::AwaitingApproval.as_str(),
                    actor,
                    Some(format!("plan rejected: {feedback}")),
                );
                task.updated_at = coord_core::time::now_iso();
                write_json_atomic(&self.store.task_file(task_id), &task)
            },
        )?;
        self.require(task_id)
    }
}

#[cfg(test)]
#[path = "board_tests.rs"]
mod tests;
