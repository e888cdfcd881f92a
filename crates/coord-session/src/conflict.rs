//! Cross-session file-conflict detection.
//!
//! Two signals: what live sessions have declared or recently touched, and
//! a time-bounded replay of the activity log. Matching is by full path or
//! by basename, since sessions in different worktrees see different
//! prefixes for the same file.

use anyhow::Result;
use chrono::Utc;
use coord_store::StateStore;
use coord_store::activity::ActivityEntry;
use serde::Serialize;
use serde_json::json;

use crate::record::DerivedStatus;
use crate::registry::SessionRegistry;

/// Activity-log replay bounds.
const REPLAY_ENTRIES: usize = 100;
const REPLAY_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize)]
pub struct ConflictHit {
    pub session: String,
    pub overlapping_files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictReport {
    pub conflicts: Vec<ConflictHit>,
    /// Recent `Edit`/`Write` activity touching the requested files.
    pub recent_edits: Vec<ActivityEntry>,
    pub safe: bool,
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn matches(requested: &str, theirs: &str) -> bool {
    requested == theirs || basename(requested) == basename(theirs)
}

/// Check `files` against every other live session, then replay the
/// activity tail. An empty report means "safe". The check is logged to
/// `conflicts.jsonl` either way.
pub fn detect_conflicts(
    store: &StateStore,
    session_id: &str,
    files: &[String],
) -> Result<ConflictReport> {
    let registry = SessionRegistry::new(store.clone());
    let now = Utc::now();
    let mut conflicts = Vec::new();

    for other_id in store.session_ids() {
        if other_id == session_id {
            continue;
        }
        let Ok(Some(record)) = registry.load(&other_id) else {
            continue;
        };
        if record.derived_status(now) == DerivedStatus::Closed {
            continue;
        }
        let theirs = record.all_known_files();
        let overlapping: Vec<String> = files
            .iter()
            .filter(|requested| theirs.iter().any(|t| matches(requested, t)))
            .cloned()
            .collect();
        if !overlapping.is_empty() {
            conflicts.push(ConflictHit {
                session: other_id,
                overlapping_files: overlapping,
            });
        }
    }

    let recent_edits: Vec<ActivityEntry> = store
        .recent_activity(REPLAY_ENTRIES, REPLAY_WINDOW_SECS)?
        .into_iter()
        .filter(|entry| entry.session != session_id)
        .filter(|entry| matches!(entry.tool.as_str(), "Edit" | "Write"))
        .filter(|entry| {
            entry
                .path
                .as_deref()
                .is_some_and(|path| files.iter().any(|f| matches(f, path)))
        })
        .collect();

    let report = ConflictReport {
        safe: conflicts.is_empty() && recent_edits.is_empty(),
        conflicts,
        recent_edits,
    };

    let log_entry = json!({
        "ts": coord_core::time::now_iso(),
        "session": session_id,
        "files": files,
        "conflicts": report.conflicts,
    });
    store.with_lock("conflicts", "coord_detect_conflicts", "append check", || {
        coord_store::json::append_jsonl(&store.conflicts_log(), &log_entry)
    })?;
    if !report.safe {
        store.append_event(
            "ConflictDetected",
            json!({
                "session": session_id,
                "files": files,
                "conflict_sessions": report.conflicts.iter().map(|c| c.session.clone()).collect::<Vec<_>>(),
            }),
        )?;
    }

    Ok(report)
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
