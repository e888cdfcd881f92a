//! Sticky team announcements with per-consumer ack cursors.
//!
//! Unlike inbox messages, announcements survive consumption: every
//! consumer re-surfaces the ones it has not acknowledged on each inbox
//! check. Ids are monotonically increasing within a team.

use std::collections::BTreeMap;

use anyhow::Result;
use coord_core::types::MessagePriority;
use coord_store::StateStore;
use coord_store::json::{append_jsonl, read_json_or_default, read_jsonl_tail, write_json_atomic};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub id: u64,
    pub ts: String,
    pub from: String,
    pub content: String,
    #[serde(default)]
    pub priority: MessagePriority,
}

/// `consumer name -> highest acknowledged announcement id`.
type Cursors = BTreeMap<String, u64>;

fn announce_lock(team: &str) -> String {
    format!("announce-{team}")
}

/// Append a sticky announcement, assigning the next id in the team.
pub fn post_announcement(
    store: &StateStore,
    team: &str,
    from: &str,
    content: &str,
    priority: MessagePriority,
) -> Result<u64> {
    let path = store.team_announcements(team);
    store.with_lock(&announce_lock(team), "coord_announce", "append", || {
        let read = read_jsonl_tail::<Announcement>(&path, 1)?;
        let id = read.entries.last().map(|a| a.id + 1).unwrap_or(1);
        append_jsonl(
            &path,
            &Announcement {
                id,
                ts: coord_core::time::now_iso(),
                from: from.to_string(),
                content: content.to_string(),
                priority,
            },
        )?;
        Ok(id)
    })
}

/// Announcements `consumer` has not yet acknowledged, oldest first.
pub fn unacked_announcements(
    store: &StateStore,
    team: &str,
    consumer: &str,
) -> Result<Vec<Announcement>> {
    let cursors: Cursors = read_json_or_default(&store.team_announcement_cursors(team));
    let acked = cursors.get(consumer).copied().unwrap_or(0);
    let read = read_jsonl_tail::<Announcement>(
        &store.team_announcements(team),
        coord_store::json::MAX_JSONL_ENTRIES,
    )?;
    Ok(read.entries.into_iter().filter(|a| a.id > acked).collect())
}

/// Advance `consumer`'s cursor to `up_to` (never backwards).
pub fn ack_announcements(store: &StateStore, team: &str, consumer: &str, up_to: u64) -> Result<()> {
    let path = store.team_announcement_cursors(team);
    store.with_lock(&announce_lock(team), "coord_check_inbox", "ack", || {
        let mut cursors: Cursors = read_json_or_default(&path);
        let entry = cursors.entry(consumer.to_string()).or_insert(0);
        if up_to > *entry {
            *entry = up_to;
        }
        write_json_atomic(&path, &cursors)
    })
}

/// Teams whose member list references `session_id`. Team files are read
/// structurally so this crate stays independent of the team schema.
pub fn teams_of_session(store: &StateStore, session_id: &str) -> Vec<String> {
    let mut teams = Vec::new();
    for team in store.team_names() {
        let value: serde_json::Value = read_json_or_default(&store.team_file(&team));
        let is_member = value
            .get("members")
            .and_then(|m| m.as_array())
            .is_some_and(|members| {
                members.iter().any(|member| {
                    member.get("session_id").and_then(|s| s.as_str()) == Some(session_id)
                        || member.get("name").and_then(|s| s.as_str()) == Some(session_id)
                })
            });
        if is_member {
            teams.push(team);
        }
    }
    teams
}
