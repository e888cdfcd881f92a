//! Enums shared across the coordinator surface.
//!
//! Each enum mirrors the wire strings tool calls use; `parse` is the
//! schema-validation entry point and returns `None` for unknown values so
//! the router can name the offending field.

use serde::{Deserialize, Serialize};

/// Message priority. SLA thresholds hang off this (see the messaging crate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl MessagePriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Task priority, highest first when sorting the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Sort key: higher value sorts first on the board.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Terminal disposition of a worker plus the live `running` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How a worker consumes its prompt and whether its inbox hook may surface
/// messages mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    #[default]
    Pipe,
    Interactive,
}

impl WorkerMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pipe" => Some(Self::Pipe),
            "interactive" => Some(Self::Interactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Interactive => "interactive",
        }
    }
}

/// Where the worker's terminal surface lives, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLayout {
    Tab,
    Split,
    #[default]
    Background,
}

impl WorkerLayout {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tab" => Some(Self::Tab),
            "split" => Some(Self::Split),
            "background" => Some(Self::Background),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tab => "tab",
            Self::Split => "split",
            Self::Background => "background",
        }
    }
}

/// Role presets applied to spawn options when fields are not explicitly set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Researcher,
    Implementer,
    Reviewer,
    Planner,
}

impl WorkerRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "researcher" => Some(Self::Researcher),
            "implementer" => Some(Self::Implementer),
            "reviewer" => Some(Self::Reviewer),
            "planner" => Some(Self::Planner),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
            Self::Planner => "planner",
        }
    }
}

/// Permission mode recorded in worker meta and materialized into the
/// sidecar hook config. Enforcement is the external hook's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    AcceptEdits,
    PlanOnly,
    ReadOnly,
    EditOnly,
}

impl PermissionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "acceptEdits" => Some(Self::AcceptEdits),
            "planOnly" => Some(Self::PlanOnly),
            "readOnly" => Some(Self::ReadOnly),
            "editOnly" => Some(Self::EditOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptEdits => "acceptEdits",
            Self::PlanOnly => "planOnly",
            Self::ReadOnly => "readOnly",
            Self::EditOnly => "editOnly",
        }
    }
}

/// How much prior context is prepended to a worker's prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    Minimal,
    #[default]
    Standard,
    Full,
}

impl ContextLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minimal" => Some(Self::Minimal),
            "standard" => Some(Self::Standard),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Full => "full",
        }
    }
}

/// Budget enforcement posture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    #[default]
    Off,
    Warn,
    Enforce,
}

impl BudgetPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "warn" => Some(Self::Warn),
            "enforce" => Some(Self::Enforce),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Warn => "warn",
            Self::Enforce => "enforce",
        }
    }
}

macro_rules! impl_display_via_as_str {
    ($($ty:ty),* $(,)?) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_via_as_str!(
    MessagePriority,
    TaskPriority,
    WorkerStatus,
    WorkerMode,
    WorkerLayout,
    WorkerRole,
    PermissionMode,
    ContextLevel,
    BudgetPolicy,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_variant() {
        for p in ["low", "normal", "high", "urgent"] {
            assert_eq!(MessagePriority::parse(p).unwrap().as_str(), p);
        }
        for p in ["low", "normal", "high", "critical"] {
            assert_eq!(TaskPriority::parse(p).unwrap().as_str(), p);
        }
        for p in ["pipe", "interactive"] {
            assert_eq!(WorkerMode::parse(p).unwrap().as_str(), p);
        }
        for p in ["tab", "split", "background"] {
            assert_eq!(WorkerLayout::parse(p).unwrap().as_str(), p);
        }
        for p in ["researcher", "implementer", "reviewer", "planner"] {
            assert_eq!(WorkerRole::parse(p).unwrap().as_str(), p);
        }
        for p in ["acceptEdits", "planOnly", "readOnly", "editOnly"] {
            assert_eq!(PermissionMode::parse(p).unwrap().as_str(), p);
        }
        for p in ["minimal", "standard", "full"] {
            assert_eq!(ContextLevel::parse(p).unwrap().as_str(), p);
        }
        for p in ["off", "warn", "enforce"] {
            assert_eq!(BudgetPolicy::parse(p).unwrap().as_str(), p);
        }
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(MessagePriority::parse("URGENT").is_none());
        assert!(WorkerMode::parse("batch").is_none());
        assert!(PermissionMode::parse("accept_edits").is_none());
    }

    #[test]
    fn task_priority_ranks_ascending() {
        assert!(TaskPriority::Critical.rank() > TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() > TaskPriority::Normal.rank());
        assert!(TaskPriority::Normal.rank() > TaskPriority::Low.rank());
    }

    #[test]
    fn worker_status_terminality() {
        assert!(!WorkerStatus::Running.is_terminal());
        assert!(WorkerStatus::Completed.is_terminal());
        assert!(WorkerStatus::Cancelled.is_terminal());
    }

    #[test]
    fn serde_uses_wire_casing() {
        let json = serde_json::to_string(&PermissionMode::AcceptEdits).unwrap();
        assert_eq!(json, "\"acceptEdits\"");
        let json = serde_json::to_string(&TaskPriority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
