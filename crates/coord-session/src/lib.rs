//! Session registry and cross-session conflict detection.
//!
//! Session files are written by external hooks; the coordinator reads them
//! for signal and mutates only its hint fields (`has_messages`,
//! `current_task`, `current_files`, close markers). Counters and ring
//! buffers are advisory and never corrected from here.

pub mod conflict;
pub mod record;
pub mod registry;

pub use conflict::{ConflictHit, ConflictReport, detect_conflicts};
pub use record::{DerivedStatus, RecentOp, SessionRecord};
pub use registry::{SessionDetail, SessionRegistry, SessionSummary};
