//! Durable per-target inboxes.

use anyhow::{Context, Result};
use coord_core::CoordError;
use coord_core::types::MessagePriority;
use coord_session::registry::SessionRegistry;
use coord_session::record::DerivedStatus;
use coord_store::StateStore;
use coord_store::json::{append_jsonl, read_jsonl_tail};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::announce::{ack_announcements, teams_of_session, unacked_announcements, Announcement};
use crate::rate_limit::RateLimit;

/// One inbox line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub ts: String,
    pub from: String,
    #[serde(default)]
    pub priority: MessagePriority,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Broadcast hint only; durable announcements live in the sticky store.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub announcement: bool,
}

/// Result of a consume-and-clear inbox read.
#[derive(Debug, Serialize)]
pub struct CheckedInbox {
    pub messages: Vec<InboxMessage>,
    /// Sticky announcements not yet acknowledged by this consumer.
    pub announcements: Vec<Announcement>,
    pub warnings: Vec<String>,
}

/// Per-recipient outcome map for a broadcast. Intentionally non-atomic
/// across recipients.
#[derive(Debug, Default, Serialize)]
pub struct BroadcastOutcome {
    pub sent: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// One message of a reconstructed thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadEntry {
    pub ts: String,
    pub from: String,
    pub to: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Messenger {
    store: StateStore,
    rate_limit: RateLimit,
}

impl Messenger {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            rate_limit: RateLimit::default(),
        }
    }

    pub fn with_rate_limit(store: StateStore, rate_limit: RateLimit) -> Self {
        Self { store, rate_limit }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Append one message to `to`'s inbox and set the recipient's hint
    /// bit. Sending to an id with no session record still works; only the
    /// hint update is skipped.
    pub fn send(
        &self,
        from: &str,
        to: &str,
        content: &str,
        priority: MessagePriority,
        thread_id: Option<&str>,
        announcement: bool,
    ) -> Result<()> {
        coord_core::ident::validate_ident("to", to)?;
        self.rate_limit.check(&self.store, from)?;

        let message = InboxMessage {
            ts: coord_core::time::now_iso(),
            from: from.to_string(),
            priority,
            content: content.to_string(),
            thread_id: thread_id.map(str::to_string),
            announcement,
        };

        let path = self.store.inbox_file(to);
        let lock = StateStore::inbox_lock_name(to);
        self.store
            .with_lock(&lock, "coord_send_message", "append message", || {
                append_jsonl(&path, &message)
            })?;

        SessionRegistry::new(self.store.clone()).set_has_messages(to, true)?;
        // Content rides along in the event so threads survive the
        // consume-and-clear inbox read.
        self.store.append_event(
            "MessageSent",
            json!({
                "from": from,
                "to": to,
                "priority": priority.as_str(),
                "content": content,
                "thread_id": thread_id,
            }),
        )?;
        Ok(())
    }

    /// Chronological history of a thread, reconstructed from the event
    /// log. Inboxes are consume-and-clear, so events are the retained
    /// copy.
    pub fn thread_history(&self, thread_id: &str) -> Result<Vec<ThreadEntry>> {
        coord_core::ident::validate_ident("thread_id", thread_id)?;
        let events = self
            .store
            .recent_events(coord_store::json::MAX_JSONL_ENTRIES)?;
        let mut entries: Vec<ThreadEntry> = events
            .entries
            .iter()
            .filter(|e| e.event == "MessageSent")
            .filter(|e| e.field_str("thread_id") == Some(thread_id))
            .map(|e| ThreadEntry {
                ts: e.ts.clone(),
                from: e.field_str("from").unwrap_or_default().to_string(),
                to: e.field_str("to").unwrap_or_default().to_string(),
                content: e.field_str("content").unwrap_or_default().to_string(),
            })
            .collect();
        entries.sort_by(|a, b| a.ts.cmp(&b.ts));
        Ok(entries)
    }

    /// Atomically read-and-truncate an inbox, clear the hint bit, and
    /// surface unacked sticky announcements from every team the session
    /// belongs to (acking them in the same call).
    pub fn check_inbox(&self, session_id: &str) -> Result<CheckedInbox> {
        coord_core::ident::validate_ident("session", session_id)?;
        let path = self.store.inbox_file(session_id);
        let lock = StateStore::inbox_lock_name(session_id);

        let (messages, warnings) = self.store.with_lock(
            &lock,
            "coord_check_inbox",
            "read and truncate",
            || {
                let read =
                    read_jsonl_tail::<InboxMessage>(&path, coord_store::json::MAX_JSONL_ENTRIES)?;
                if path.exists() {
                    std::fs::File::create(&path)
                        .with_context(|| format!("failed to truncate {}", path.display()))?;
                }
                Ok((read.entries, read.warnings))
            },
        )?;

        SessionRegistry::new(self.store.clone()).set_has_messages(session_id, false)?;
        self.store
            .append_event("InboxChecked", json!({"session": session_id, "count": messages.len()}))?;

        let mut announcements = Vec::new();
        for team in teams_of_session(&self.store, session_id) {
            let pending = unacked_announcements(&self.store, &team, session_id)?;
            if let Some(last) = pending.last() {
                ack_announcements(&self.store, &team, session_id, last.id)?;
            }
            announcements.extend(pending);
        }

        Ok(CheckedInbox {
            messages,
            announcements,
            warnings,
        })
    }

    /// Send to every live session. Failures are per-recipient; the
    /// aggregate enumerates both sides and never raises.
    pub fn broadcast(
        &self,
        from: &str,
        content: &str,
        priority: MessagePriority,
        announcement: bool,
    ) -> Result<BroadcastOutcome> {
        let registry = SessionRegistry::new(self.store.clone());
        let (rows, _) = registry.list(false, None);

        let mut outcome = BroadcastOutcome::default();
        for row in rows {
            if row.session == from {
                continue;
            }
            if !matches!(row.status, DerivedStatus::Active | DerivedStatus::Idle) {
                continue;
            }
            match self.send(from, &row.session, content, priority, None, announcement) {
                Ok(()) => outcome.sent.push(row.session),
                Err(err) => {
                    warn!(to = %row.session, error = %err, "broadcast delivery failed");
                    outcome.failed.push((row.session, err.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// Depth of a target's inbox without consuming it.
    pub fn depth(&self, target_id: &str) -> usize {
        coord_session::registry::inbox_depth(&self.store, target_id)
    }

    /// Pending (unconsumed) messages without clearing, for dashboards.
    pub fn peek(&self, target_id: &str) -> Result<Vec<InboxMessage>> {
        let read = read_jsonl_tail::<InboxMessage>(
            &self.store.inbox_file(target_id),
            coord_store::json::MAX_JSONL_ENTRIES,
        )?;
        Ok(read.entries)
    }
}

#[cfg(test)]
#[path = "inbox_tests.rs"]
mod tests;
