//! Session record as persisted in `session-<id>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seconds of inactivity before an `active` session reads as `idle`.
pub const ACTIVE_WITHIN_SECS: i64 = 180;
/// Seconds of inactivity before an `idle` session reads as `stale`.
pub const IDLE_WITHIN_SECS: i64 = 600;

/// One entry of the recent-operations ring buffer (hook-maintained).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentOp {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// The full session document. Every field defaults so partially-written
/// hook output still parses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default)]
    pub tab_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<u32>,
    /// Stored status. Only `closed` and `stale` are authoritative; the
    /// rest is derived from `last_active` at read time.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub started: String,
    #[serde(default)]
    pub last_active: String,
    #[serde(default)]
    pub tool_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub current_files: Vec<String>,
    #[serde(default)]
    pub current_task: String,
    #[serde(default)]
    pub recent_ops: Vec<RecentOp>,
    #[serde(default)]
    pub has_messages: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_registered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Active,
    Idle,
    Stale,
    Closed,
    Unknown,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Stale => "stale",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionRecord {
    /// Classify by `last_active` age. The stored field is consulted only
    /// to force `closed` / `stale`.
    pub fn derived_status(&self, now: DateTime<Utc>) -> DerivedStatus {
        match self.status.as_str() {
            "closed" => return DerivedStatus::Closed,
            "stale" => return DerivedStatus::Stale,
            _ => {}
        }
        match coord_core::time::age_seconds(&self.last_active, now) {
            Some(age) if age < ACTIVE_WITHIN_SECS => DerivedStatus::Active,
            Some(age) if age < IDLE_WITHIN_SECS => DerivedStatus::Idle,
            Some(_) => DerivedStatus::Stale,
            None => DerivedStatus::Unknown,
        }
    }

    /// Declared plus recently-touched files, deduplicated, order kept.
    pub fn all_known_files(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        let mut files = Vec::new();
        for file in self.current_files.iter().chain(self.files_touched.iter()) {
            if seen.insert(file.clone()) {
                files.push(file.clone());
            }
        }
        files
    }
}
