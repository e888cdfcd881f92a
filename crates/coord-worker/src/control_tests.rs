use super::*;
use crate::spawn::SpawnOutcome;
use coord_core::ErrorCode;
use coord_core::types::WorkerStatus;
use coord_store::StateStore;

fn setup() -> (tempfile::TempDir, StateStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("state")).expect("open");
    (temp, store)
}

fn code_of(err: &anyhow::Error) -> ErrorCode {
    err.downcast_ref::<CoordError>()
        .unwrap_or_else(|| panic!("untyped error: {err}"))
        .code()
}

async fn spawn_sleeper(temp: &tempfile::TempDir, store: &StateStore, task_id: &str) -> SpawnOutcome {
    // `sh` executes its stdin, so the prompt is the worker's script.
    let mut request = SpawnRequest::new(temp.path().display().to_string(), "sleep 30");
    request.runtime = "sh".to_string();
    request.task_id = Some(task_id.to_string());
    spawn_worker(store, request, &BudgetDefaults::default())
        .await
        .expect("spawn sleeper")
}

async fn spawn_finished(temp: &tempfile::TempDir, store: &StateStore, task_id: &str) {
    let mut request = SpawnRequest::new(temp.path().display().to_string(), "echo done");
    request.runtime = "sh".to_string();
    request.task_id = Some(task_id.to_string());
    spawn_worker(store, request, &BudgetDefaults::default())
        .await
        .expect("spawn");
    for _ in 0..100 {
        if store.worker_done(task_id).exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("worker {task_id} never finished");
}

#[tokio::test]
async fn kill_records_cancelled_and_is_idempotent() {
    let (temp, store) = setup();
    let outcome = spawn_sleeper(&temp, &store, "W1").await;
    assert!(coord_process::is_process_alive(outcome.pid));

    let status = kill_worker(&store, "W1").await.expect("kill");
    assert_eq!(status, WorkerStatus::Cancelled);

    let view = supervise::get_result(&store, "W1", 10).expect("result");
    assert_eq!(view.status, "completed");
    assert_eq!(view.meta.unwrap().status, WorkerStatus::Cancelled);
    assert!(!store.worker_pid("W1").exists());

    // Second kill: same answer, no error.
    assert_eq!(kill_worker(&store, "W1").await.expect("rekill"), WorkerStatus::Cancelled);
}

#[tokio::test]
async fn kill_unknown_worker_is_dependency_error() {
    let (_temp, store) = setup();
    let err = kill_worker(&store, "W404").await.unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::DependencyError);
}

#[tokio::test]
async fn resume_builds_continuation_and_links_back() {
    let (temp, store) = setup();
    spawn_finished(&temp, &store, "W1").await;

    let outcome = resume_worker(&store, "W1", None, &BudgetDefaults::default())
        .await
        .expect("resume");
    assert_ne!(outcome.task_id, "W1");

    let new_meta = meta::load_meta(&store, &outcome.task_id).unwrap().unwrap();
    assert_eq!(new_meta.resumed_from.as_deref(), Some("W1"));
    assert_eq!(new_meta.runtime, "sh");

    let prompt = std::fs::read_to_string(store.worker_prompt(&outcome.task_id)).unwrap();
    assert!(prompt.contains("Resume task W1"));
    assert!(prompt.contains("## Original prompt"));
    assert!(prompt.contains("## Previous output tail"));

    kill_worker(&store, &outcome.task_id).await.ok();
}

#[tokio::test]
async fn resume_alive_worker_is_conflict() {
    let (temp, store) = setup();
    spawn_sleeper(&temp, &store, "W1").await;

    let err = resume_worker(&store, "W1", None, &BudgetDefaults::default())
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);

    kill_worker(&store, "W1").await.unwrap();
}

#[tokio::test]
async fn upgrade_switches_pipe_to_interactive() {
    let (temp, store) = setup();
    spawn_sleeper(&temp, &store, "W1").await;

    let outcome = upgrade_worker(&store, "W1", &BudgetDefaults::default())
        .await
        .expect("upgrade");

    // The old worker was killed, the new one is interactive.
    let old = meta::load_done(&store, "W1").unwrap().unwrap();
    assert_eq!(old.status, WorkerStatus::Cancelled);
    let new_meta = meta::load_meta(&store, &outcome.task_id).unwrap().unwrap();
    assert_eq!(new_meta.mode, coord_core::types::WorkerMode::Interactive);
    assert_eq!(new_meta.resumed_from.as_deref(), Some("W1"));

    kill_worker(&store, &outcome.task_id).await.ok();
}

#[tokio::test]
async fn upgrade_interactive_worker_is_conflict() {
    let (temp, store) = setup();
    let mut request = SpawnRequest::new(temp.path().display().to_string(), "sleep 30");
    request.runtime = "sh".to_string();
    request.task_id = Some("W1".to_string());
    request.mode = coord_core::types::WorkerMode::Interactive;
    spawn_worker(&store, request, &BudgetDefaults::default())
        .await
        .expect("spawn");

    let err = upgrade_worker(&store, "W1", &BudgetDefaults::default())
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::Conflict);

    kill_worker(&store, "W1").await.unwrap();
}

#[tokio::test]
async fn batch_spawn_isolates_failures() {
    let (temp, store) = setup();
    let good = |id: &str| {
        let mut request = SpawnRequest::new(temp.path().display().to_string(), "echo ok");
        request.runtime = "sh".to_string();
        request.task_id = Some(id.to_string());
        request
    };
    let mut bad = good("WBAD");
    bad.directory = temp.path().join("missing").display().to_string();

    let entries = spawn_workers(&store, vec![good("WA"), bad, good("WB")], &BudgetDefaults::default())
        .await
        .expect("batch");

    assert_eq!(entries.len(), 3);
    assert!(entries[0].outcome.is_some());
    assert!(entries[1].error.as_deref().unwrap().contains("does not exist"));
    assert!(entries[2].outcome.is_some());
}

#[tokio::test]
async fn batch_limits_are_validated() {
    let (temp, store) = setup();
    let err = spawn_workers(&store, Vec::new(), &BudgetDefaults::default())
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::ValidationError);

    let requests: Vec<SpawnRequest> = (0..11)
        .map(|_| SpawnRequest::new(temp.path().display().to_string(), "x"))
        .collect();
    let err = spawn_workers(&store, requests, &BudgetDefaults::default())
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), ErrorCode::ValidationError);
}
