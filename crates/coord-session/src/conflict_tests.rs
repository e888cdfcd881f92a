use super::*;
use crate::record::SessionRecord;
use coord_store::json::write_json_atomic;

fn setup() -> (tempfile::TempDir, StateStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("state")).expect("open");
    (temp, store)
}

fn write_session(store: &StateStore, id: &str, f: impl FnOnce(&mut SessionRecord)) {
    let mut record = SessionRecord {
        session: id.to_string(),
        last_active: coord_core::time::now_iso(),
        ..Default::default()
    };
    f(&mut record);
    write_json_atomic(&store.session_file(id), &record).expect("write session");
}

fn files(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

#[test]
fn detects_full_path_overlap() {
    let (_temp, store) = setup();
    write_session(&store, "S1", |r| {
        r.files_touched = files(&["/repo/a.ts", "/repo/b.ts"]);
    });

    let report = detect_conflicts(&store, "S2", &files(&["/repo/a.ts", "/repo/c.ts"])).unwrap();
    assert!(!report.safe);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].session, "S1");
    assert_eq!(report.conflicts[0].overlapping_files, vec!["/repo/a.ts"]);
}

#[test]
fn detects_basename_overlap_across_worktrees() {
    let (_temp, store) = setup();
    write_session(&store, "S1", |r| {
        r.current_files = files(&["/worktree-1/src/main.rs"]);
    });

    let report = detect_conflicts(&store, "S2", &files(&["/worktree-2/src/main.rs"])).unwrap();
    assert_eq!(report.conflicts.len(), 1);
}

#[test]
fn own_session_and_closed_sessions_are_ignored() {
    let (_temp, store) = setup();
    write_session(&store, "S1", |r| {
        r.files_touched = files(&["/repo/a.ts"]);
    });
    write_session(&store, "S3", |r| {
        r.status = "closed".to_string();
        r.files_touched = files(&["/repo/c.ts"]);
    });

    let report = detect_conflicts(&store, "S1", &files(&["/repo/a.ts", "/repo/c.ts"])).unwrap();
    assert!(report.safe, "own claims and closed sessions must not conflict");
}

#[test]
fn replays_recent_edit_activity() {
    let (_temp, store) = setup();
    store
        .append_activity(&coord_store::activity::ActivityEntry {
            ts: coord_core::time::now_iso(),
            session: "S1".to_string(),
            tool: "Edit".to_string(),
            path: Some("/repo/a.ts".to_string()),
        })
        .unwrap();
    store
        .append_activity(&coord_store::activity::ActivityEntry {
            ts: coord_core::time::now_iso(),
            session: "S1".to_string(),
            tool: "Read".to_string(),
            path: Some("/repo/a.ts".to_string()),
        })
        .unwrap();

    let report = detect_conflicts(&store, "S2", &files(&["/repo/a.ts"])).unwrap();
    assert!(!report.safe);
    assert_eq!(report.recent_edits.len(), 1, "Read activity must not count");
    assert_eq!(report.recent_edits[0].tool, "Edit");
}

#[test]
fn safe_check_still_logs_to_conflicts_jsonl() {
    let (_temp, store) = setup();
    let report = detect_conflicts(&store, "S2", &files(&["/repo/a.ts"])).unwrap();
    assert!(report.safe);

    let log = std::fs::read_to_string(store.conflicts_log()).unwrap();
    assert!(log.contains("\"session\": \"S2\"") || log.contains("\"session\":\"S2\""));

    // No ConflictDetected event for a safe check.
    let events = store.recent_events(10).unwrap();
    assert!(events.entries.is_empty());
}

#[test]
fn conflict_emits_event() {
    let (_temp, store) = setup();
    write_session(&store, "S1", |r| {
        r.files_touched = files(&["/repo/a.ts"]);
    });

    detect_conflicts(&store, "S2", &files(&["/repo/a.ts"])).unwrap();
    let events = store.recent_events(10).unwrap();
    assert_eq!(events.entries.len(), 1);
    assert_eq!(events.entries[0].event, "ConflictDetected");
}
