//! Messaging fabric: durable per-target inboxes, rate limiting, sticky
//! announcements, and SLA tracking.
//!
//! An inbox is an append-only JSONL file consumed atomically via
//! read-and-truncate. The event log is the cross-restart memory: rate
//! limits and the receipts dashboard are both computed from it rather than
//! from anything held in memory.

pub mod announce;
pub mod inbox;
pub mod rate_limit;
pub mod sla;

pub use announce::{Announcement, ack_announcements, post_announcement, unacked_announcements};
pub use inbox::{BroadcastOutcome, CheckedInbox, InboxMessage, Messenger, ThreadEntry};
pub use rate_limit::RateLimit;
pub use sla::{ReceiptsDashboard, sla_for, run_sla_check};
