//! Per-sender send rate limiting.
//!
//! Counted from `MessageSent` events in the durable event log, so the
//! window survives coordinator restarts and needs no in-process state.
//! The window itself is a policy knob; 30 messages per 60 seconds is the
//! documented default, not a protocol constant.

use chrono::Utc;
use coord_core::CoordError;
use coord_store::StateStore;

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_per_window: usize,
    pub window_secs: i64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_per_window: 30,
            window_secs: 60,
        }
    }
}

impl RateLimit {
    /// Soft-fail when `sender` has already sent `max_per_window` messages
    /// inside the window. The input is not consumed on failure.
    pub fn check(&self, store: &StateStore, sender: &str) -> Result<(), CoordError> {
        if self.max_per_window == 0 {
            return Ok(());
        }
        let cutoff = Utc::now() - chrono::Duration::seconds(self.window_secs);

        let read = store
            .recent_events(coord_store::json::MAX_JSONL_ENTRIES)
            .map_err(|err| CoordError::runtime(format!("event log unreadable: {err}")))?;

        let recent_sends = read
            .entries
            .iter()
            .filter(|e| e.event == "MessageSent")
            .filter(|e| e.field_str("from") == Some(sender))
            .filter(|e| {
                coord_core::time::parse_iso(&e.ts).is_some_and(|ts| ts >= cutoff)
            })
            .count();

        if recent_sends >= self.max_per_window {
            return Err(CoordError::conflict(format!(
                "RATE_LIMITED: '{sender}' sent {recent_sends} messages in the last \
                 {}s (limit {})",
                self.window_secs, self.max_per_window
            )));
        }
        Ok(())
    }
}
