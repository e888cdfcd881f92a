//! Global activity log (`activity.jsonl`).
//!
//! External hooks append tool-use entries here; the coordinator only reads
//! a time-bounded tail for conflict replay, and truncates during GC.
//! Appends race across writers, so readers re-sort on `ts` before applying
//! any time window.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::json::{append_jsonl, read_jsonl_tail};
use crate::StateStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub ts: String,
    pub session: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ActivityEntry {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        coord_core::time::parse_iso(&self.ts)
    }
}

impl StateStore {
    pub fn append_activity(&self, entry: &ActivityEntry) -> Result<()> {
        self.with_lock("activity", "activity", "append", || {
            append_jsonl(&self.activity_log(), entry)
        })
    }

    /// Last `limit` entries no older than `window_secs`, sorted by `ts`.
    pub fn recent_activity(&self, limit: usize, window_secs: i64) -> Result<Vec<ActivityEntry>> {
        let read = read_jsonl_tail::<ActivityEntry>(&self.activity_log(), limit)?;
        let cutoff = Utc::now() - chrono::Duration::seconds(window_secs);

        let mut entries: Vec<ActivityEntry> = read
            .entries
            .into_iter()
            .filter(|e| e.timestamp().is_some_and(|ts| ts >= cutoff))
            .collect();
        entries.sort_by(|a, b| a.ts.cmp(&b.ts));
        Ok(entries)
    }
}
