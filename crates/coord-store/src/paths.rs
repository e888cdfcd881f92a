//! Typed accessors for the on-disk layout.
//!
//! Callers never join paths by hand; ids are validated before they get
//! here, so every accessor is a pure mapping from id to location.

use std::path::PathBuf;

use crate::StateStore;

impl StateStore {
    // ── top-level streams ────────────────────────────────────────────

    pub fn activity_log(&self) -> PathBuf {
        self.root().join("activity.jsonl")
    }

    /// Coordinator event log. The name is part of the on-disk contract.
    pub fn events_log(&self) -> PathBuf {
        self.root().join("queue.jsonl")
    }

    pub fn conflicts_log(&self) -> PathBuf {
        self.root().join("conflicts.jsonl")
    }

    // ── sessions ─────────────────────────────────────────────────────

    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.root().join(format!("session-{session_id}.json"))
    }

    /// Session ids present on disk, from `session-<id>.json` file names.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.root()) else {
            return ids;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name
                .strip_prefix("session-")
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        ids
    }

    // ── inboxes ──────────────────────────────────────────────────────

    pub fn inbox_dir(&self) -> PathBuf {
        self.root().join("inbox")
    }

    pub fn inbox_file(&self, target_id: &str) -> PathBuf {
        self.inbox_dir().join(format!("{target_id}.jsonl"))
    }

    // ── worker artifacts ─────────────────────────────────────────────

    pub fn results_dir(&self) -> PathBuf {
        self.root().join("results")
    }

    pub fn worker_meta(&self, task_id: &str) -> PathBuf {
        self.results_dir().join(format!("{task_id}.meta.json"))
    }

    pub fn worker_done(&self, task_id: &str) -> PathBuf {
        self.results_dir().join(format!("{task_id}.meta.json.done"))
    }

    pub fn worker_pid(&self, task_id: &str) -> PathBuf {
        self.results_dir().join(format!("{task_id}.pid"))
    }

    pub fn worker_log(&self, task_id: &str) -> PathBuf {
        self.results_dir().join(format!("{task_id}.txt"))
    }

    pub fn worker_prompt(&self, task_id: &str) -> PathBuf {
        self.results_dir().join(format!("{task_id}.prompt"))
    }

    /// Permission-mode sidecar config consumed by the external PreToolUse
    /// hook. Only materialized when the mode needs enforcing.
    pub fn worker_settings(&self, task_id: &str) -> PathBuf {
        self.results_dir().join(format!("{task_id}.settings.json"))
    }

    /// Task ids of every worker with a meta file on disk.
    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.results_dir()) else {
            return ids;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".meta.json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        ids
    }

    // ── pipelines ────────────────────────────────────────────────────

    pub fn pipeline_dir(&self, pipeline_id: &str) -> PathBuf {
        self.results_dir().join(pipeline_id)
    }

    pub fn pipeline_meta(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("pipeline.meta.json")
    }

    pub fn pipeline_log(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("pipeline.log")
    }

    pub fn pipeline_done(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("pipeline.done")
    }

    pub fn pipeline_step_prompt(&self, pipeline_id: &str, step: usize, slug: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id)
            .join(format!("{step}-{slug}.prompt"))
    }

    pub fn pipeline_step_log(&self, pipeline_id: &str, step: usize, slug: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id)
            .join(format!("{step}-{slug}.txt"))
    }

    // ── tasks ────────────────────────────────────────────────────────

    pub fn tasks_dir(&self) -> PathBuf {
        self.root().join("tasks")
    }

    pub fn task_file(&self, task_id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{task_id}.json"))
    }

    pub fn handoffs_dir(&self) -> PathBuf {
        self.tasks_dir().join("handoffs")
    }

    pub fn handoff_file(&self, task_id: &str, ts_millis: i64) -> PathBuf {
        self.handoffs_dir()
            .join(format!("{task_id}-{ts_millis}.json"))
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.tasks_dir()) else {
            return ids;
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        ids
    }

    // ── teams ────────────────────────────────────────────────────────

    pub fn teams_dir(&self) -> PathBuf {
        self.root().join("teams")
    }

    pub fn team_file(&self, team_name: &str) -> PathBuf {
        self.teams_dir().join(format!("{team_name}.json"))
    }

    pub fn team_announcements(&self, team_name: &str) -> PathBuf {
        self.teams_dir()
            .join(format!("{team_name}.announcements.jsonl"))
    }

    pub fn team_announcement_cursors(&self, team_name: &str) -> PathBuf {
        self.teams_dir()
            .join(format!("{team_name}.announcement-cursors.json"))
    }

    pub fn team_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.teams_dir()) else {
            return names;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".announcements.jsonl") || name.ends_with(".announcement-cursors.json")
            {
                continue;
            }
            if let Some(team) = name.strip_suffix(".json") {
                names.push(team.to_string());
            }
        }
        names.sort();
        names
    }

    // ── context store ────────────────────────────────────────────────

    pub fn context_root(&self) -> PathBuf {
        self.root().join("context")
    }

    pub fn context_dir(&self, team_name: &str) -> PathBuf {
        self.context_root().join(team_name)
    }

    pub fn context_file(&self, team_name: &str, key: &str) -> PathBuf {
        self.context_dir(team_name).join(format!("{key}.md"))
    }

    pub fn lead_context_file(&self, team_name: &str) -> PathBuf {
        self.context_dir(team_name).join("lead-context.md")
    }

    // ── locks ────────────────────────────────────────────────────────

    pub fn locks_dir(&self) -> PathBuf {
        self.root().join("locks")
    }

    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.lock"))
    }
}
