use super::*;
use coord_core::ErrorCode;

fn setup() -> (tempfile::TempDir, TaskBoard) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("state")).expect("open");
    (temp, TaskBoard::new(store))
}

fn code_of(err: &anyhow::Error) -> ErrorCode {
    err.downcast_ref::<CoordError>()
        .unwrap_or_else(|| panic!("untyped error: {err}"))
        .code()
}

fn create(board: &TaskBoard, id: &str, subject: &str) -> Task {
    board
        .create(CreateTask {
            subject: subject.to_string(),
            task_id: Some(id.to_string()),
            actor: "test".to_string(),
            ..Default::default()
        })
        .expect("create task")
}

fn set_status(board: &TaskBoard, id: &str, status: TaskStatus) -> Result<Task> {
    board.update(
        id,
        UpdateTask {
            status: Some(status),
            actor: "test".to_string(),
            ..Default::default()
        },
    )
}

#[test]
fn create_initializes_audit_and_pending_status() {
    let (_temp, board) = setup();
    let task = create(&board, "TA", "subject A");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.audit.len(), 1);
    assert_eq!(task.audit[0].to, "pending");
    assert!(task.audit[0].from.is_none());
}

#[test]
fn create_rejects_empty_subject_and_duplicate_id() {
    let (_temp, board) = setup();
    let err = board
        .create(CreateTask {
            subject: "  ".to_string(),
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::ValidationError);

    create(&board, "TA", "subject");
    let err = board
        .create(CreateTask {
            subject: "again".to_string(),
            task_id: Some("TA".to_string()),
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);
}

#[test]
fn blocked_by_maintains_inverse_blocks_edge() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    let tb = board
        .create(CreateTask {
            subject: "B".to_string(),
            task_id: Some("TB".to_string()),
            blocked_by: vec!["TA".to_string()],
            actor: "test".to_string(),
            ..Default::default()
        })
        .expect("create TB");
    assert_eq!(tb.blocked_by, vec!["TA"]);

    let ta = board.require("TA").unwrap();
    assert_eq!(ta.blocks, vec!["TB"]);
}

#[test]
fn create_with_unknown_blocker_is_dependency_error() {
    let (_temp, board) = setup();
    let err = board
        .create(CreateTask {
            subject: "B".to_string(),
            blocked_by: vec!["ghost".to_string()],
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::DependencyError);
}

#[test]
fn scenario_task_dependencies() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    board
        .create(CreateTask {
            subject: "B".to_string(),
            task_id: Some("TB".to_string()),
            blocked_by: vec!["TA".to_string()],
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();

    // Starting TB while TA is pending: conflict naming the blocker.
    let err = set_status(&board, "TB", TaskStatus::InProgress).unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);
    assert!(err.to_string().contains("TA"));

    set_status(&board, "TA", TaskStatus::InProgress).unwrap();
    set_status(&board, "TA", TaskStatus::Completed).unwrap();

    let tb = set_status(&board, "TB", TaskStatus::InProgress).expect("unblocked");
    assert_eq!(tb.status, TaskStatus::InProgress);
    let last = tb.audit.last().unwrap();
    assert_eq!(last.from.as_deref(), Some("pending"));
    assert_eq!(last.to, "in_progress");
}

#[test]
fn cancelled_blockers_do_not_block() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    board
        .create(CreateTask {
            subject: "B".to_string(),
            task_id: Some("TB".to_string()),
            blocked_by: vec!["TA".to_string()],
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();

    set_status(&board, "TA", TaskStatus::Cancelled).unwrap();
    set_status(&board, "TB", TaskStatus::InProgress).expect("cancelled blocker ignored");
}

#[test]
fn cycle_rejected_on_update() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    board
        .create(CreateTask {
            subject: "B".to_string(),
            task_id: Some("TB".to_string()),
            blocked_by: vec!["TA".to_string()],
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();

    let err = board
        .update(
            "TA",
            UpdateTask {
                blocked_by: Some(vec!["TB".to_string()]),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);
    assert!(err.to_string().contains("cycle"));

    // The graph is unchanged.
    assert!(board.require("TA").unwrap().blocked_by.is_empty());
}

#[test]
fn blocked_by_replacement_updates_both_sides() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    create(&board, "TB", "B");
    create(&board, "TC", "C");

    board
        .update(
            "TC",
            UpdateTask {
                blocked_by: Some(vec!["TA".to_string()]),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    board
        .update(
            "TC",
            UpdateTask {
                blocked_by: Some(vec!["TB".to_string()]),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(board.require("TA").unwrap().blocks.is_empty());
    assert_eq!(board.require("TB").unwrap().blocks, vec!["TC"]);
    assert_eq!(board.require("TC").unwrap().blocked_by, vec!["TB"]);
}

#[test]
fn metadata_merge_deletes_null_keys() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");

    let mut metadata = serde_json::Map::new();
    metadata.insert("k".to_string(), serde_json::json!("v"));
    metadata.insert("keep".to_string(), serde_json::json!(1));
    board
        .update(
            "TA",
            UpdateTask {
                metadata: Some(metadata),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    let mut deletion = serde_json::Map::new();
    deletion.insert("k".to_string(), serde_json::Value::Null);
    let task = board
        .update(
            "TA",
            UpdateTask {
                metadata: Some(deletion),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(!task.metadata.contains_key("k"));
    assert_eq!(task.metadata.get("keep"), Some(&serde_json::json!(1)));
}

#[test]
fn illegal_transition_is_conflict() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    let err = set_status(&board, "TA", TaskStatus::Completed).unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);
}

#[test]
fn list_sorts_by_priority_then_recency_with_ready_flag() {
    let (_temp, board) = setup();
    board
        .create(CreateTask {
            subject: "low".to_string(),
            task_id: Some("TL".to_string()),
            priority: Some(coord_core::types::TaskPriority::Low),
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();
    board
        .create(CreateTask {
            subject: "critical".to_string(),
            task_id: Some("TC".to_string()),
            priority: Some(coord_core::types::TaskPriority::Critical),
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();
    board
        .create(CreateTask {
            subject: "gated".to_string(),
            task_id: Some("TG".to_string()),
            blocked_by: vec!["TL".to_string()],
            priority: Some(coord_core::types::TaskPriority::High),
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();

    let (rows, warnings) = board.list(None, None, None);
    assert!(warnings.is_empty());
    let ids: Vec<_> = rows.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["TC", "TG", "TL"]);

    let gated = rows.iter().find(|r| r.task_id == "TG").unwrap();
    assert!(!gated.ready);
    let free = rows.iter().find(|r| r.task_id == "TC").unwrap();
    assert!(free.ready);
}

#[test]
fn list_filters() {
    let (_temp, board) = setup();
    board
        .create(CreateTask {
            subject: "a".to_string(),
            task_id: Some("TA".to_string()),
            assignee: Some("alice".to_string()),
            team_name: Some("core".to_string()),
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();
    create(&board, "TB", "b");

    let (rows, _) = board.list(None, Some("alice"), None);
    assert_eq!(rows.len(), 1);
    let (rows, _) = board.list(None, None, Some("core"));
    assert_eq!(rows.len(), 1);
    let (rows, _) = board.list(Some(TaskStatus::Pending), None, None);
    assert_eq!(rows.len(), 2);
}

#[test]
fn reassign_requires_in_progress_and_writes_handoff() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");

    let err = board
        .reassign("TA", "bob", Some("vacation"), None, "lead")
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);

    board
        .update(
            "TA",
            UpdateTask {
                status: Some(TaskStatus::InProgress),
                assignee: Some("alice".to_string()),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    let task = board
        .reassign("TA", "bob", Some("vacation"), Some("half done"), "lead")
        .expect("reassign");
    assert_eq!(task.assignee, "bob");

    let view = board.audit_view("TA").unwrap();
    assert_eq!(view.handoffs.len(), 1);
    assert_eq!(view.handoffs[0]["from"], "alice");
    assert_eq!(view.handoffs[0]["to"], "bob");
    assert_eq!(view.handoffs[0]["progress_context"], "half done");
    assert!(view.audit.iter().any(|entry| entry.to == "reassigned"));
}

#[test]
fn quality_gates_block_completion_until_satisfied() {
    let (_temp, board) = setup();
    board
        .create(CreateTask {
            subject: "gated".to_string(),
            task_id: Some("TA".to_string()),
            acceptance_criteria: vec!["tests pass".to_string(), "docs updated".to_string()],
            actor: "test".to_string(),
            ..Default::default()
        })
        .unwrap();
    set_status(&board, "TA", TaskStatus::InProgress).unwrap();

    let gates = board.quality_gates("TA").unwrap();
    assert!(gates.completion_blocked);
    assert_eq!(gates.total, 2);

    let err = set_status(&board, "TA", TaskStatus::Completed).unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);
    assert!(err.to_string().contains("tests pass"));

    board
        .update(
            "TA",
            UpdateTask {
                acceptance_criteria: Some(vec![
                    AcceptanceCriterion { text: "tests pass".to_string(), satisfied: true },
                    AcceptanceCriterion { text: "docs updated".to_string(), satisfied: true },
                ]),
                actor: "test".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    set_status(&board, "TA", TaskStatus::Completed).expect("gates satisfied");
}

#[test]
fn approval_gate_flow() {
    let (_temp, board) = setup();
    let task = board
        .create(CreateTask {
            subject: "needs plan".to_string(),
            task_id: Some("TA".to_string()),
            approval_required: true,
            actor: "worker".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(task.status, TaskStatus::AwaitingApproval);

    // Rejection records feedback and keeps the gate shut.
    let task = board.reject_plan("TA", "scope too wide", "lead").unwrap();
    assert_eq!(task.status, TaskStatus::AwaitingApproval);
    assert!(task
        .audit
        .iter()
        .any(|e| e.note.as_deref() == Some("plan rejected: scope too wide")));

    let task = board.approve_plan("TA", "lead").unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.approved_by.as_deref(), Some("lead"));

    set_status(&board, "TA", TaskStatus::InProgress).expect("approved tasks can start");
}

#[test]
fn audit_entries_match_state_machine() {
    let (_temp, board) = setup();
    create(&board, "TA", "A");
    set_status(&board, "TA", TaskStatus::Claimed).unwrap();
    set_status(&board, "TA", TaskStatus::InProgress).unwrap();
    set_status(&board, "TA", TaskStatus::Blocked).unwrap();
    set_status(&board, "TA", TaskStatus::InProgress).unwrap();
    let task = set_status(&board, "TA", TaskStatus::Completed).unwrap();

    for window in task.audit.windows(2) {
        let (prev, next) = (&window[0], &window[1]);
        if let (Some(from), to) = (next.from.as_deref(), next.to.as_str()) {
            assert_eq!(prev.to, from, "audit chain must be contiguous");
            let from = TaskStatus::parse(from).unwrap();
            let to = TaskStatus::parse(to).unwrap();
            assert!(from.transition(to).is_ok(), "{from} -> {to} must be legal");
        }
    }
}

#[test]
fn unknown_task_is_dependency_error() {
    let (_temp, board) = setup();
    let err = board.require("ghost").unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::DependencyError);
}
