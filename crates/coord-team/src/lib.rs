//! Teams: policy defaults, member affinity, a queued task pool, and the
//! deterministic load-aware assigner. Also the per-team shared context
//! store that seeds newly spawned workers.

pub mod context;
pub mod dispatch;
pub mod team;

pub use context::{export_context, read_context, write_context};
pub use dispatch::{AssignmentOutcome, RebalanceReport, assign_next, rebalance, status_compact};
pub use team::{Member, QueuedTask, Team, TeamPolicy, TeamSpec, Teams};
