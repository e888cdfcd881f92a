use super::*;
use coord_core::types::{
    ContextLevel, PermissionMode, WorkerLayout, WorkerMode, WorkerRole, WorkerStatus,
};

fn setup() -> (tempfile::TempDir, StateStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("state")).expect("open");
    (temp, store)
}

fn plant_meta(store: &StateStore, task_id: &str) {
    let worker_meta = WorkerMeta {
        task_id: task_id.to_string(),
        directory: "/tmp".to_string(),
        prompt_excerpt: "x".to_string(),
        model: None,
        agent: None,
        files: Vec::new(),
        spawned: coord_core::time::now_iso(),
        status: WorkerStatus::Running,
        mode: WorkerMode::Pipe,
        runtime: "claude".to_string(),
        layout: WorkerLayout::Background,
        permission_mode: PermissionMode::AcceptEdits,
        context_level: ContextLevel::Standard,
        role: None::<WorkerRole>,
        isolate: false,
        budget_tokens: None,
        max_turns: None,
        team_name: None,
        worker_name: None,
        notify_session_id: None,
        emulator: None,
        resumed_from: None,
        finished: None,
        exit_code: None,
        signal: None,
        error: None,
    };
    crate::meta::save_meta(store, &worker_meta).unwrap();
}

#[test]
fn finalize_orders_meta_pid_done() {
    let (_temp, store) = setup();
    plant_meta(&store, "W1");
    std::fs::write(store.worker_pid("W1"), "12345").unwrap();

    finalize(&store, "W1", WorkerStatus::Completed, Some(0), None, None).unwrap();

    assert!(!store.worker_pid("W1").exists());
    let done = crate::meta::load_done(&store, "W1").unwrap().unwrap();
    assert_eq!(done.status, WorkerStatus::Completed);
    let meta = crate::meta::load_meta(&store, "W1").unwrap().unwrap();
    assert_eq!(meta.exit_code, Some(0));
    assert!(meta.finished.is_some());
}

#[test]
fn done_marker_is_monotonic() {
    let (_temp, store) = setup();
    plant_meta(&store, "W1");

    finalize(&store, "W1", WorkerStatus::Cancelled, None, None, None).unwrap();
    // A late exit hook must not overwrite the terminal status.
    finalize(&store, "W1", WorkerStatus::Completed, Some(0), None, None).unwrap();

    let done = crate::meta::load_done(&store, "W1").unwrap().unwrap();
    assert_eq!(done.status, WorkerStatus::Cancelled);
}

#[test]
fn get_result_status_ladder() {
    let (_temp, store) = setup();
    plant_meta(&store, "W1");

    // Meta alone, no pid: unknown.
    let view = get_result(&store, "W1", 10).unwrap();
    assert_eq!(view.status, "unknown");

    // Alive pid: running.
    std::fs::write(store.worker_pid("W1"), std::process::id().to_string()).unwrap();
    let view = get_result(&store, "W1", 10).unwrap();
    assert_eq!(view.status, "running");

    // Done marker wins regardless of pid state.
    finalize(&store, "W1", WorkerStatus::Failed, Some(2), None, None).unwrap();
    let view = get_result(&store, "W1", 10).unwrap();
    assert_eq!(view.status, "completed");
    assert_eq!(view.done.unwrap().status, WorkerStatus::Failed);
}

#[test]
fn get_result_includes_log_tail() {
    let (_temp, store) = setup();
    plant_meta(&store, "W1");
    let body: String = (0..20).map(|i| format!("line {i}\n")).collect();
    std::fs::write(store.worker_log("W1"), body).unwrap();

    let view = get_result(&store, "W1", 5).unwrap();
    assert_eq!(view.tail.len(), 5);
    assert_eq!(view.tail[4], "line 19");
}

#[test]
fn get_result_unknown_worker_is_dependency_error() {
    let (_temp, store) = setup();
    let err = get_result(&store, "W404", 10).unwrap_err();
    let coord = err.downcast_ref::<coord_core::CoordError>().unwrap();
    assert_eq!(coord.code(), coord_core::ErrorCode::DependencyError);
}

#[test]
fn reconcile_marks_orphans_failed() {
    let (_temp, store) = setup();
    // Orphan: meta, dead pid, no done.
    plant_meta(&store, "W1");
    std::fs::write(store.worker_pid("W1"), "3999999").unwrap();
    // Alive: must be untouched.
    plant_meta(&store, "W2");
    std::fs::write(store.worker_pid("W2"), std::process::id().to_string()).unwrap();
    // Finished: already has done.
    plant_meta(&store, "W3");
    finalize(&store, "W3", WorkerStatus::Completed, Some(0), None, None).unwrap();

    let reconciled = reconcile_workers(&store).unwrap();
    assert_eq!(reconciled, vec!["W1"]);

    let done = crate::meta::load_done(&store, "W1").unwrap().unwrap();
    assert_eq!(done.status, WorkerStatus::Failed);
    assert!(crate::meta::load_done(&store, "W2").unwrap().is_none());
}

#[tokio::test]
async fn watch_child_records_exit_code() {
    let (temp, store) = setup();
    plant_meta(&store, "W1");

    let spawned = coord_process::spawn_detached(
        "sh",
        &["-c".to_string(), "exit 3".to_string()],
        temp.path(),
        &store.worker_log("W1"),
        None,
        &[],
    )
    .await
    .unwrap();
    std::fs::write(store.worker_pid("W1"), spawned.pid.to_string()).unwrap();
    watch_child(store.clone(), "W1".to_string(), spawned.child);

    for _ in 0..100 {
        if store.worker_done("W1").exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    let meta = crate::meta::load_meta(&store, "W1").unwrap().unwrap();
    assert_eq!(meta.status, WorkerStatus::Failed);
    assert_eq!(meta.exit_code, Some(3));
}
