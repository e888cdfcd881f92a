//! Task document and status state machine.

use coord_core::types::TaskPriority;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Claimed,
    InProgress,
    Blocked,
    AwaitingApproval,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Structural legality of a transition. Blocker and approval gates are
    /// checked separately by the board, which can see the whole graph.
    ///
    /// ```text
    ///   pending ── claim ─▶ claimed ── start ─▶ in_progress ── complete ─▶ completed
    ///      │                                        │
    ///      │                                        ├─ block ─▶ blocked ─ unblock ─▶ in_progress
    ///      ├─ approval ─▶ awaiting_approval ─ approve ─▶ pending
    ///      └─ cancel ─▶ cancelled
    /// ```
    pub fn transition(&self, to: TaskStatus) -> Result<TaskStatus, String> {
        use TaskStatus::*;
        let allowed = match (self, to) {
            (Pending, Claimed | InProgress | AwaitingApproval | Cancelled) => true,
            (Claimed, InProgress | Pending | Cancelled) => true,
            (InProgress, Completed | Blocked | Cancelled) => true,
            (Blocked, InProgress | Cancelled) => true,
            (AwaitingApproval, Pending | Cancelled) => true,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(format!(
                "illegal transition {} -> {}",
                self.as_str(),
                to.as_str()
            ))
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit trail entry; appended on every state change, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub text: String,
    #[serde(default)]
    pub satisfied: bool,
}

/// `tasks/<task_id>.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Empty string means unassigned.
    #[serde(default)]
    pub assignee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
}

impl Task {
    pub fn push_audit(
        &mut self,
        from: Option<TaskStatus>,
        to: &str,
        actor: &str,
        note: Option<String>,
    ) {
        self.audit.push(AuditEntry {
            ts: coord_core::time::now_iso(),
            from: from.map(|s| s.as_str().to_string()),
            to: to.to_string(),
            actor: actor.to_string(),
            note,
            details: None,
        });
    }

    pub fn unsatisfied_criteria(&self) -> Vec<&AcceptanceCriterion> {
        self.acceptance_criteria
            .iter()
            .filter(|c| !c.satisfied)
            .collect()
    }
}
