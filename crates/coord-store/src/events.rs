//! Coordinator event log (`queue.jsonl`).
//!
//! Every mutating handler appends one typed record. The log is the only
//! cross-restart memory for rate limiting and the delivery-receipts
//! dashboard, so appends happen after the mutation they describe.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::json::{JsonlRead, append_jsonl, read_jsonl_tail};
use crate::StateStore;

/// One event record. `fields` is event-specific payload, flattened into the
/// JSON object next to `ts` and `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: String,
    pub event: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl EventRecord {
    pub fn new(event: &str, fields: serde_json::Value) -> Self {
        let fields = match fields {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            ts: coord_core::time::now_iso(),
            event: event.to_string(),
            fields,
        }
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}

impl StateStore {
    /// Append an event under the event-log lock.
    pub fn append_event(&self, event: &str, fields: serde_json::Value) -> Result<()> {
        let record = EventRecord::new(event, fields);
        self.with_lock("events", event, "append event", || {
            append_jsonl(&self.events_log(), &record)
        })
    }

    /// Trailing slice of the event log, oldest first.
    pub fn recent_events(&self, max_entries: usize) -> Result<JsonlRead<EventRecord>> {
        read_jsonl_tail(&self.events_log(), max_entries)
    }
}
