//! Team records: members, policy defaults, queued tasks, presets.

use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::{BudgetPolicy, ContextLevel, PermissionMode, TaskPriority, WorkerMode};
use coord_store::StateStore;
use coord_store::json::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Task currently dispatched to this member, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<String>,
}

/// Defaults applied to workers the team spawns. Every field is optional;
/// per-call options always win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub require_plan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<WorkerMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_context_level: Option<ContextLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_policy: Option<BudgetPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_budget_policy: Option<BudgetPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_budget_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_active_workers: Option<usize>,
    #[serde(default)]
    pub default_isolate: bool,
}

/// Dispatch payload captured when a task is queued.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSpec {
    pub prompt: String,
    pub directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_affinity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    pub dispatch: DispatchSpec,
    #[serde(default)]
    pub queued_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Team {
    pub team_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub policy: TeamPolicy,
    #[serde(default)]
    pub queue: Vec<QueuedTask>,
    /// `simple` or `advanced`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_overhead_mode: Option<String>,
    /// `native`, `coordinator`, or `hybrid` (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_path: Option<String>,
}

/// Upsert input for `create_team`.
#[derive(Debug, Clone, Default)]
pub struct TeamSpec {
    pub team_name: String,
    pub project: Option<String>,
    pub description: Option<String>,
    pub preset: Option<String>,
    pub execution_path: Option<String>,
    pub low_overhead_mode: Option<String>,
    pub policy: Option<TeamPolicy>,
    pub members: Vec<Member>,
}

/// Fill unset policy fields from a named preset.
fn apply_preset(policy: &mut TeamPolicy, preset: &str) -> Result<()> {
    match preset {
        "simple" => {
            policy.default_mode.get_or_insert(WorkerMode::Pipe);
            policy.permission_mode.get_or_insert(PermissionMode::AcceptEdits);
            policy
                .default_context_level
                .get_or_insert(ContextLevel::Minimal);
        }
        "strict" => {
            policy.require_plan = true;
            policy.permission_mode.get_or_insert(PermissionMode::PlanOnly);
            policy.budget_policy.get_or_insert(BudgetPolicy::Enforce);
            policy
                .global_budget_policy
                .get_or_insert(BudgetPolicy::Enforce);
            policy.max_active_workers.get_or_insert(4);
            policy.default_isolate = true;
        }
        "native-first" => {
            policy.default_mode.get_or_insert(WorkerMode::Interactive);
            policy
                .default_context_level
                .get_or_insert(ContextLevel::Full);
        }
        other => {
            return Err(CoordError::validation(
                "preset",
                format!("unknown preset '{other}' (simple, strict, native-first)"),
            )
            .into());
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Teams {
    store: StateStore,
}

impl Teams {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn load(&self, team_name: &str) -> Result<Option<Team>> {
        read_json(&self.store.team_file(team_name))
    }

    pub fn require(&self, team_name: &str) -> Result<Team> {
        self.load(team_name)?
            .ok_or_else(|| CoordError::dependency(format!("team '{team_name}' not found")).into())
    }

    /// Upsert a team. Members merge by name; preset fills policy gaps.
    pub fn create_or_update(&self, spec: TeamSpec) -> Result<Team> {
        let team_name = coord_core::ident::normalize_team_name(&spec.team_name)?;
        for member in &spec.members {
            coord_core::ident::validate_ident("member.name", &member.name)?;
        }
        if let Some(mode) = spec.low_overhead_mode.as_deref() {
            if !matches!(mode, "simple" | "advanced") {
                return Err(CoordError::validation(
                    "low_overhead_mode",
                    "must be 'simple' or 'advanced'",
                )
                .into());
            }
        }
        if let Some(path) = spec.execution_path.as_deref() {
            if !matches!(path, "native" | "coordinator" | "hybrid") {
                return Err(CoordError::validation(
                    "execution_path",
                    "must be 'native', 'coordinator', or 'hybrid'",
                )
                .into());
            }
        }

        self.mutate(&team_name, "coord_create_team", |team| {
            team.team_name = team_name.clone();
            if spec.project.is_some() {
                team.project = spec.project.clone();
            }
            if spec.description.is_some() {
                team.description = spec.description.clone();
            }
            if spec.execution_path.is_some() {
                team.execution_path = spec.execution_path.clone();
            }
            if spec.low_overhead_mode.is_some() {
                team.low_overhead_mode = spec.low_overhead_mode.clone();
            }
            if let Some(policy) = &spec.policy {
                team.policy = policy.clone();
            }
            if let Some(preset) = spec.preset.as_deref() {
                apply_preset(&mut team.policy, preset)?;
            }
            for incoming in &spec.members {
                match team.members.iter_mut().find(|m| m.name == incoming.name) {
                    Some(existing) => {
                        existing.role = incoming.role.clone();
                        if incoming.session_id.is_some() {
                            existing.session_id = incoming.session_id.clone();
                        }
                        if incoming.presence.is_some() {
                            existing.presence = incoming.presence.clone();
                        }
                    }
                    None => team.members.push(incoming.clone()),
                }
            }
            Ok(())
        })
    }

    /// Append a queue entry.
    pub fn push_queue(&self, team_name: &str, entry: QueuedTask) -> Result<Team> {
        self.mutate(team_name, "coord_team_queue_task", |team| {
            team.queue.push(entry.clone());
            Ok(())
        })
    }

    /// Read-modify-write a team under its lock, creating it if absent.
    pub fn mutate(
        &self,
        team_name: &str,
        tool: &str,
        f: impl FnOnce(&mut Team) -> Result<()>,
    ) -> Result<Team> {
        let path = self.store.team_file(team_name);
        let lock = StateStore::team_lock_name(team_name);
        self.store.with_lock(&lock, tool, "team update", || {
            let mut team: Team = read_json(&path)?.unwrap_or_default();
            if team.team_name.is_empty() {
                team.team_name = team_name.to_string();
            }
            f(&mut team)?;
            write_json_atomic(&path, &team)?;
            Ok(team)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Teams) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(temp.path().join("state")).expect("open");
        (temp, Teams::new(store))
    }

    fn member(name: &str, role: &str) -> Member {
        Member {
            name: name.to_string(),
            role: role.to_string(),
            session_id: None,
            task_id: None,
            presence: None,
        }
    }

    #[test]
    fn create_lowercases_name_and_upserts_members() {
        let (_temp, teams) = setup();
        teams
            .create_or_update(TeamSpec {
                team_name: "Alpha".to_string(),
                members: vec![member("alice", "implementer")],
                ..Default::default()
            })
            .expect("create");

        let team = teams.require("alpha").expect("load");
        assert_eq!(team.team_name, "alpha");
        assert_eq!(team.members.len(), 1);

        // Second call merges by member name.
        let team = teams
            .create_or_update(TeamSpec {
                team_name: "alpha".to_string(),
                members: vec![member("alice", "reviewer"), member("bob", "researcher")],
                ..Default::default()
            })
            .expect("upsert");
        assert_eq!(team.members.len(), 2);
        assert_eq!(team.members[0].role, "reviewer");
    }

    #[test]
    fn presets_fill_only_unset_policy_fields() {
        let (_temp, teams) = setup();
        let team = teams
            .create_or_update(TeamSpec {
                team_name: "strictteam".to_string(),
                preset: Some("strict".to_string()),
                policy: Some(TeamPolicy {
                    max_active_workers: Some(9),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .expect("create");

        assert!(team.policy.require_plan);
        assert_eq!(team.policy.max_active_workers, Some(9), "explicit beats preset");
        assert_eq!(team.policy.budget_policy, Some(BudgetPolicy::Enforce));
        assert!(team.policy.default_isolate);
    }

    #[test]
    fn unknown_preset_is_validation_error() {
        let (_temp, teams) = setup();
        let err = teams
            .create_or_update(TeamSpec {
                team_name: "x".to_string(),
                preset: Some("bogus".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        let coord = err.downcast_ref::<CoordError>().unwrap();
        assert_eq!(coord.code(), coord_core::ErrorCode::ValidationError);
    }

    #[test]
    fn invalid_execution_path_rejected() {
        let (_temp, teams) = setup();
        let err = teams
            .create_or_update(TeamSpec {
                team_name: "x".to_string(),
                execution_path: Some("teleport".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("execution_path"));
    }

    #[test]
    fn queue_entries_append_in_order() {
        let (_temp, teams) = setup();
        teams
            .create_or_update(TeamSpec {
                team_name: "core".to_string(),
                ..Default::default()
            })
            .unwrap();
        for id in ["T1", "T2"] {
            teams
                .push_queue(
                    "core",
                    QueuedTask {
                        task_id: id.to_string(),
                        priority: TaskPriority::Normal,
                        role_hint: None,
                        load_affinity: None,
                        files: Vec::new(),
                        acceptance_criteria: Vec::new(),
                        dispatch: DispatchSpec {
                            prompt: "p".to_string(),
                            directory: "/tmp".to_string(),
                            ..Default::default()
                        },
                        queued_at: coord_core::time::now_iso(),
                    },
                )
                .unwrap();
        }
        let team = teams.require("core").unwrap();
        let ids: Vec<_> = team.queue.iter().map(|q| q.task_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
    }
}
