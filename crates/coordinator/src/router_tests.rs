use super::*;
use coord_session::SessionRecord;
use coord_store::json::write_json_atomic;
use serde_json::json;

fn setup() -> (tempfile::TempDir, Router) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("state")).expect("open");
    (temp, Router::new(store))
}

fn write_session(router: &Router, id: &str, f: impl FnOnce(&mut SessionRecord)) {
    let mut record = SessionRecord {
        session: id.to_string(),
        last_active: coord_core::time::now_iso(),
        ..Default::default()
    };
    f(&mut record);
    write_json_atomic(&router.ctx().store.session_file(id), &record).expect("write session");
}

async fn call(router: &Router, tool: &str, arguments: serde_json::Value) -> Result<Reply, CoordError> {
    router.dispatch(tool, &arguments).await
}

#[tokio::test]
async fn unknown_tool_is_validation_error() {
    let (_temp, router) = setup();
    let err = call(&router, "coord_frobnicate", json!({})).await.unwrap_err();
    assert_eq!(err.code(), coord_core::ErrorCode::ValidationError);
    assert!(err.to_string().contains("coord_frobnicate"));
}

#[tokio::test]
async fn missing_required_field_names_the_field() {
    let (_temp, router) = setup();
    let err = call(&router, "coord_send_message", json!({"from": "lead"}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), coord_core::ErrorCode::ValidationError);
    assert!(err.to_string().contains("to"));
}

#[tokio::test]
async fn scenario_basic_messaging() {
    let (_temp, router) = setup();
    write_session(&router, "abc12345", |_| {});

    call(&router, "coord_create_team", json!({"team_name": "alpha"}))
        .await
        .expect("create team");

    call(
        &router,
        "coord_send_message",
        json!({"from": "lead", "to": "abc12345", "content": "hello", "priority": "normal"}),
    )
    .await
    .expect("send");

    let reply = call(&router, "coord_check_inbox", json!({"session": "abc12345"}))
        .await
        .expect("check");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["content"], "hello");
    assert_eq!(body["messages"][0]["from"], "lead");
    assert_eq!(body["messages"][0]["priority"], "normal");

    let reply = call(&router, "coord_check_inbox", json!({"session": "abc12345"}))
        .await
        .expect("second check");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_worker_spawn_and_kill() {
    let (temp, router) = setup();

    call(
        &router,
        "coord_spawn_worker",
        json!({
            "directory": temp.path().display().to_string(),
            "prompt": "sleep 30",
            "task_id": "W1",
            "mode": "pipe",
            "runtime": "sh",
        }),
    )
    .await
    .expect("spawn");

    let reply = call(&router, "coord_get_result", json!({"task_id": "W1"}))
        .await
        .expect("result");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["status"], "running");

    let reply = call(&router, "coord_kill_worker", json!({"task_id": "W1"}))
        .await
        .expect("kill");
    assert!(reply.text.contains("cancelled"));

    let reply = call(&router, "coord_get_result", json!({"task_id": "W1"}))
        .await
        .expect("result after kill");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["meta"]["status"], "cancelled");
    assert_eq!(body["done"]["status"], "cancelled");
}

#[tokio::test]
async fn scenario_task_dependencies_via_tools() {
    let (_temp, router) = setup();

    call(&router, "coord_create_task", json!({"subject": "A", "task_id": "TA"}))
        .await
        .expect("create A");
    call(
        &router,
        "coord_create_task",
        json!({"subject": "B", "task_id": "TB", "blocked_by": ["TA"]}),
    )
    .await
    .expect("create B");

    let err = call(
        &router,
        "coord_update_task",
        json!({"task_id": "TB", "status": "in_progress"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), coord_core::ErrorCode::Conflict);

    call(&router, "coord_update_task", json!({"task_id": "TA", "status": "in_progress"}))
        .await
        .expect("start A");
    call(&router, "coord_update_task", json!({"task_id": "TA", "status": "completed"}))
        .await
        .expect("complete A");

    let reply = call(
        &router,
        "coord_update_task",
        json!({"task_id": "TB", "status": "in_progress"}),
    )
    .await
    .expect("start B");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["status"], "in_progress");
    let audit = body["audit"].as_array().unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last["from"], "pending");
    assert_eq!(last["to"], "in_progress");
}

#[tokio::test]
async fn scenario_conflict_detection() {
    let (_temp, router) = setup();
    write_session(&router, "S1", |record| {
        record.files_touched = vec!["/repo/a.ts".to_string(), "/repo/b.ts".to_string()];
    });
    write_session(&router, "S2", |_| {});

    let reply = call(
        &router,
        "coord_detect_conflicts",
        json!({"session": "S2", "files": ["/repo/a.ts", "/repo/c.ts"]}),
    )
    .await
    .expect("detect");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["conflicts"].as_array().unwrap().len(), 1);
    assert_eq!(body["conflicts"][0]["session"], "S1");
    assert_eq!(body["conflicts"][0]["overlapping_files"][0], "/repo/a.ts");
}

#[tokio::test]
async fn unsafe_ids_rejected_at_the_boundary() {
    let (_temp, router) = setup();
    for (tool, args) in [
        ("coord_get_session", json!({"session": "../escape"})),
        ("coord_get_task", json!({"task_id": "a/b"})),
        ("coord_get_result", json!({"task_id": "x y"})),
        ("coord_check_inbox", json!({"session": "..".to_string()})),
    ] {
        let err = call(&router, tool, args).await.unwrap_err();
        assert_eq!(err.code(), coord_core::ErrorCode::ValidationError, "{tool}");
    }
}

#[tokio::test]
async fn zero_step_pipeline_is_validation_error() {
    let (temp, router) = setup();
    let err = call(
        &router,
        "coord_run_pipeline",
        json!({"directory": temp.path().display().to_string(), "steps": []}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), coord_core::ErrorCode::ValidationError);
}

#[tokio::test]
async fn list_sessions_surfaces_torn_records_as_warnings() {
    let (_temp, router) = setup();
    write_session(&router, "good1", |_| {});
    std::fs::write(
        router.ctx().store.session_file("torn1"),
        "{\"session\": \"torn",
    )
    .unwrap();

    let reply = call(&router, "coord_list_sessions", json!({})).await.expect("list");
    let rows: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(reply.warnings.len(), 1);
    assert!(reply.warnings[0].contains("torn1"));
}

#[tokio::test]
#[serial_test::serial]
async fn envelope_wraps_success_and_failure() {
    let (_temp, router) = setup();
    write_session(&router, "abc12345", |_| {});

    // SAFETY: serialized test; nothing else reads this env concurrently.
    unsafe { std::env::set_var(crate::envelope::ENVELOPE_ENV, "1") };

    let text = router
        .handle(
            "coord_send_message",
            &json!({"from": "lead", "to": "abc12345", "content": "hi"}),
        )
        .await;
    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["ok"], true);
    assert!(body["data"]["text"].as_str().unwrap().contains("abc12345"));
    assert_eq!(body["meta"]["tool"], "coord_send_message");
    assert!(body["meta"]["requestId"].as_str().unwrap().len() > 10);

    let text = router.handle("coord_get_task", &json!({"task_id": "ghost"})).await;
    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "DEPENDENCY_ERROR");

    unsafe { std::env::remove_var(crate::envelope::ENVELOPE_ENV) };
}

#[tokio::test]
#[serial_test::serial]
async fn plain_mode_renders_code_prefixed_errors() {
    let (_temp, router) = setup();
    // SAFETY: serialized test.
    unsafe { std::env::remove_var(crate::envelope::ENVELOPE_ENV) };

    let text = router.handle("coord_get_task", &json!({"task_id": "ghost"})).await;
    assert!(text.starts_with("DEPENDENCY_ERROR:"));
    assert!(text.contains("ghost"));
}

#[tokio::test]
#[serial_test::serial]
async fn deprecated_cost_tools_route_with_trailer() {
    let (_temp, router) = setup();
    // SAFETY: serialized test.
    unsafe { std::env::set_var(crate::handlers::admin::USAGE_HELPER_ENV, "echo") };

    let reply = call(&router, "coord_cost_report", json!({})).await.expect("routed");
    assert!(reply.text.contains("--window summary"));
    assert!(reply.text.contains("deprecated=true"));
    assert!(reply.text.contains("canonical_tool=coord_usage_report"));

    unsafe { std::env::remove_var(crate::handlers::admin::USAGE_HELPER_ENV) };
}

#[tokio::test]
async fn usage_report_without_helper_is_dependency_error() {
    let (_temp, router) = setup();
    let err = call(&router, "coord_usage_report", json!({})).await.unwrap_err();
    assert_eq!(err.code(), coord_core::ErrorCode::DependencyError);
}

#[tokio::test]
async fn status_tool_renders_summary() {
    let (_temp, router) = setup();
    write_session(&router, "abc12345", |record| {
        record.current_task = "shipping".to_string();
    });

    let reply = call(&router, "coord_status", json!({})).await.expect("status");
    assert!(reply.text.contains("sessions (1):"));
    assert!(reply.text.contains("shipping"));
    assert!(reply.text.contains("alive workers (0):"));
}

#[tokio::test]
async fn gc_tool_reports() {
    let (_temp, router) = setup();
    let reply = call(&router, "coord_gc", json!({})).await.expect("gc");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert!(body["workers_removed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn send_directive_delivers_durably_even_without_tty() {
    let (_temp, router) = setup();
    write_session(&router, "abc12345", |_| {});

    let reply = call(
        &router,
        "coord_send_directive",
        json!({"from": "lead", "to": "abc12345", "content": "review now"}),
    )
    .await
    .expect("directive");
    assert!(reply.text.contains("best-effort"));

    let reply = call(&router, "coord_check_inbox", json!({"session": "abc12345"}))
        .await
        .expect("check");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["messages"][0]["priority"], "urgent");
}

#[tokio::test]
async fn scenario_team_assignment_through_tools() {
    let (temp, router) = setup();

    call(
        &router,
        "coord_create_team",
        json!({
            "team_name": "core",
            "members": [
                {"name": "alice", "role": "implementer"},
                {"name": "bob", "role": "reviewer"},
            ],
            "policy": {"default_mode": "pipe", "budget_tokens": 60000, "default_runtime": "cat"},
        }),
    )
    .await
    .expect("create team");

    call(
        &router,
        "coord_team_queue_task",
        json!({
            "team_name": "core",
            "subject": "ship x",
            "prompt": "build and ship x",
            "role_hint": "implementer",
            "dispatch": {"directory": temp.path().display().to_string()},
        }),
    )
    .await
    .expect("queue");

    let reply = call(&router, "coord_team_assign_next", json!({"team_name": "core"}))
        .await
        .expect("assign");
    let body: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
    assert_eq!(body["assignee"], "alice");

    let reply = call(&router, "coord_team_status", json!({"team_name": "core"}))
        .await
        .expect("status");
    assert!(reply.text.contains("queue depth: 0"));
}
