//! Worker meta and done-marker documents.

use anyhow::Result;
use coord_core::types::{
    ContextLevel, PermissionMode, WorkerLayout, WorkerMode, WorkerRole, WorkerStatus,
};
use coord_store::StateStore;
use coord_store::json::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};

/// Characters of the prompt kept in `prompt_excerpt`.
pub const PROMPT_EXCERPT_CHARS: usize = 200;

/// `<task_id>.meta.json`. Written once at spawn, mutated only on the
/// terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMeta {
    pub task_id: String,
    pub directory: String,
    pub prompt_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    pub spawned: String,
    pub status: WorkerStatus,
    pub mode: WorkerMode,
    pub runtime: String,
    #[serde(default)]
    pub layout: WorkerLayout,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub context_level: ContextLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<WorkerRole>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub isolate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_session_id: Option<String>,
    /// Terminal emulator that hosts the worker, or `background`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,

    // Terminal transition fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `<task_id>.meta.json.done`, written exactly once when the child exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneMarker {
    pub status: WorkerStatus,
    pub finished: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn prompt_excerpt(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_EXCERPT_CHARS {
        prompt.to_string()
    } else {
        prompt.chars().take(PROMPT_EXCERPT_CHARS).collect()
    }
}

pub fn load_meta(store: &StateStore, task_id: &str) -> Result<Option<WorkerMeta>> {
    read_json(&store.worker_meta(task_id))
}

pub fn save_meta(store: &StateStore, meta: &WorkerMeta) -> Result<()> {
    write_json_atomic(&store.worker_meta(&meta.task_id), meta)
}

pub fn load_done(store: &StateStore, task_id: &str) -> Result<Option<DoneMarker>> {
    read_json(&store.worker_done(task_id))
}

pub fn read_pid(store: &StateStore, task_id: &str) -> Option<u32> {
    std::fs::read_to_string(store.worker_pid(task_id))
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}

/// Alive iff the pid file exists and the pid answers the liveness probe.
pub fn is_worker_alive(store: &StateStore, task_id: &str) -> bool {
    read_pid(store, task_id).is_some_and(coord_process::is_process_alive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_excerpt_truncates_by_chars() {
        assert_eq!(prompt_excerpt("short"), "short");
        let long: String = "é".repeat(300);
        assert_eq!(prompt_excerpt(&long).chars().count(), PROMPT_EXCERPT_CHARS);
    }

    #[test]
    fn meta_round_trip_omits_unset_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(temp.path()).expect("open");

        let meta = WorkerMeta {
            task_id: "W1".to_string(),
            directory: "/tmp/demo".to_string(),
            prompt_excerpt: "do work".to_string(),
            model: None,
            agent: None,
            files: Vec::new(),
            spawned: coord_core::time::now_iso(),
            status: WorkerStatus::Running,
            mode: WorkerMode::Pipe,
            runtime: "claude".to_string(),
            layout: WorkerLayout::Background,
            permission_mode: PermissionMode::AcceptEdits,
            context_level: ContextLevel::Standard,
            role: None,
            isolate: false,
            budget_tokens: None,
            max_turns: None,
            team_name: None,
            worker_name: None,
            notify_session_id: None,
            emulator: None,
            resumed_from: None,
            finished: None,
            exit_code: None,
            signal: None,
            error: None,
        };
        save_meta(&store, &meta).expect("save");

        let raw = std::fs::read_to_string(store.worker_meta("W1")).unwrap();
        assert!(!raw.contains("exit_code"));
        assert!(!raw.contains("files"));

        let loaded = load_meta(&store, "W1").expect("load").expect("present");
        assert_eq!(loaded.task_id, "W1");
        assert_eq!(loaded.status, WorkerStatus::Running);
    }

    #[test]
    fn alive_requires_pid_file_and_live_process() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(temp.path()).expect("open");

        assert!(!is_worker_alive(&store, "W1"), "no pid file");

        std::fs::write(store.worker_pid("W1"), std::process::id().to_string()).unwrap();
        assert!(is_worker_alive(&store, "W1"), "our own pid is alive");

        std::fs::write(store.worker_pid("W1"), "3999999").unwrap();
        assert!(!is_worker_alive(&store, "W1"), "dead pid");

        std::fs::write(store.worker_pid("W1"), "not a pid").unwrap();
        assert!(!is_worker_alive(&store, "W1"), "garbage pid file");
    }
}
