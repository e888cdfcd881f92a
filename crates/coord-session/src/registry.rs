//! Read and hint-mutate the session registry.

use anyhow::Result;
use chrono::Utc;
use coord_core::CoordError;
use coord_store::StateStore;
use coord_store::json::{read_json, write_json_atomic};
use serde::Serialize;

use crate::record::{DerivedStatus, SessionRecord};

/// Compact row returned by `list_sessions`, most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub project: String,
    pub status: DerivedStatus,
    pub tab_name: String,
    pub current_task: String,
    pub last_active: String,
    pub has_messages: bool,
}

/// Full record plus derived context for `get_session`.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub record: SessionRecord,
    pub status: DerivedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_excerpt: Option<String>,
    pub inbox_depth: usize,
}

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    store: StateStore,
}

/// Lines of the plan file surfaced by `get_session`.
const PLAN_EXCERPT_LINES: usize = 20;

impl SessionRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Load one session record. `Ok(None)` when absent, `Err` when corrupt.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        read_json(&self.store.session_file(session_id))
    }

    /// Load a record or fail with a dependency error naming the session.
    pub fn require(&self, session_id: &str) -> Result<SessionRecord> {
        self.load(session_id)?
            .ok_or_else(|| CoordError::dependency(format!("session '{session_id}' not found")).into())
    }

    /// Every parseable session, with derived status applied. Corrupt
    /// records are skipped and reported as warnings, never as failures.
    pub fn list(
        &self,
        include_closed: bool,
        project: Option<&str>,
    ) -> (Vec<SessionSummary>, Vec<String>) {
        let now = Utc::now();
        let mut rows = Vec::new();
        let mut warnings = Vec::new();

        for session_id in self.store.session_ids() {
            let record = match self.load(&session_id) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    warnings.push(format!("session '{session_id}' skipped: {err}"));
                    continue;
                }
            };
            let status = record.derived_status(now);
            if !include_closed && status == DerivedStatus::Closed {
                continue;
            }
            if let Some(project) = project {
                if record.project != project {
                    continue;
                }
            }
            rows.push(SessionSummary {
                session: if record.session.is_empty() {
                    session_id
                } else {
                    record.session.clone()
                },
                project: record.project,
                status,
                tab_name: record.tab_name,
                current_task: record.current_task,
                last_active: record.last_active,
                has_messages: record.has_messages,
            });
        }

        rows.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        (rows, warnings)
    }

    /// Full record plus plan excerpt and inbox depth.
    pub fn get(&self, session_id: &str) -> Result<SessionDetail> {
        let record = self.require(session_id)?;
        let status = record.derived_status(Utc::now());

        let plan_excerpt = record
            .plan_file
            .as_deref()
            .and_then(|path| plan_excerpt(path, PLAN_EXCERPT_LINES));

        let inbox_depth = inbox_depth(&self.store, session_id);

        Ok(SessionDetail {
            record,
            status,
            plan_excerpt,
            inbox_depth,
        })
    }

    /// Declare what a session is working on.
    pub fn register_work(
        &self,
        session_id: &str,
        task: &str,
        files: Option<Vec<String>>,
    ) -> Result<()> {
        self.mutate(session_id, "coord_register_work", |record| {
            record.current_task = task.to_string();
            if let Some(files) = files {
                record.current_files = files;
            }
            record.work_registered = Some(coord_core::time::now_iso());
        })
    }

    /// Flip the inbox hint bit. Missing sessions are fine: messages may
    /// target ids that never registered.
    pub fn set_has_messages(&self, session_id: &str, value: bool) -> Result<()> {
        let path = self.store.session_file(session_id);
        let lock = StateStore::session_lock_name(session_id);
        self.store.with_lock(&lock, "inbox_hint", "update has_messages", || {
            let Some(mut record) = read_json::<SessionRecord>(&path).unwrap_or(None) else {
                return Ok(());
            };
            record.has_messages = value;
            write_json_atomic(&path, &record)
        })
    }

    /// Mark a session closed (force-wake stage 3).
    pub fn mark_closed(&self, session_id: &str, killed_by: &str) -> Result<()> {
        self.mutate(session_id, "coord_force_wake", |record| {
            record.status = "closed".to_string();
            record.killed_by = Some(killed_by.to_string());
        })
    }

    fn mutate(
        &self,
        session_id: &str,
        tool: &str,
        f: impl FnOnce(&mut SessionRecord),
    ) -> Result<()> {
        let path = self.store.session_file(session_id);
        let lock = StateStore::session_lock_name(session_id);
        self.store.with_lock(&lock, tool, "update session record", || {
            let mut record = read_json::<SessionRecord>(&path)?.ok_or_else(|| {
                CoordError::dependency(format!("session '{session_id}' not found"))
            })?;
            f(&mut record);
            write_json_atomic(&path, &record)
        })
    }

    /// Resolve a human-supplied name: exact id, then id prefix, then
    /// case-insensitive tab-name substring. Ambiguity lists candidates.
    pub fn resolve(&self, name: &str) -> Result<SessionRecord> {
        let (rows, _) = self.list(true, None);

        if let Some(row) = rows.iter().find(|r| r.session == name) {
            return self.require(&row.session.clone());
        }

        let prefix: Vec<&SessionSummary> =
            rows.iter().filter(|r| r.session.starts_with(name)).collect();
        let named: Vec<&SessionSummary> = rows
            .iter()
            .filter(|r| r.tab_name.to_lowercase().contains(&name.to_lowercase()))
            .collect();

        let matches: Vec<&SessionSummary> = if !prefix.is_empty() { prefix } else { named };
        match matches.as_slice() {
            [] => Err(CoordError::dependency(format!("no session matching '{name}'")).into()),
            [one] => self.require(&one.session.clone()),
            many => {
                let candidates: Vec<String> = many
                    .iter()
                    .map(|r| format!("{} ({})", r.session, r.tab_name))
                    .collect();
                Err(CoordError::conflict(format!(
                    "'{name}' is ambiguous; candidates: {}",
                    candidates.join(", ")
                ))
                .into())
            }
        }
    }
}

/// First `max_lines` lines of a plan file, if readable.
pub fn plan_excerpt(path: &str, max_lines: usize) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|content| content.lines().take(max_lines).collect::<Vec<_>>().join("\n"))
}

/// Number of messages waiting in a target's inbox.
pub fn inbox_depth(store: &StateStore, target_id: &str) -> usize {
    coord_store::json::read_jsonl_tail::<serde_json::Value>(&store.inbox_file(target_id), 10_000)
        .map(|read| read.entries.len())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
