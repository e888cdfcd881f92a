//! Dependency-graph checks over the implicit `blocked_by` edges.
//!
//! The graph is never materialized: each task file stores its own
//! blockers. Adding edge "task blocked_by blocker" creates a cycle iff
//! `blocker` can already reach `task` through blocked_by chains, so the
//! check is a DFS from the proposed blocker.

use std::collections::BTreeSet;

use anyhow::Result;
use coord_store::StateStore;

use crate::task::Task;

fn load(store: &StateStore, task_id: &str) -> Option<Task> {
    coord_store::json::read_json(&store.task_file(task_id)).ok().flatten()
}

/// Would adding `blocker` to `task_id`'s blockers create a cycle?
pub fn would_create_cycle(store: &StateStore, task_id: &str, blocker: &str) -> Result<bool> {
    if task_id == blocker {
        return Ok(true);
    }

    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut stack = vec![blocker.to_string()];
    while let Some(current) = stack.pop() {
        if current == task_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(task) = load(store, &current) {
            stack.extend(task.blocked_by.iter().cloned());
        }
    }
    Ok(false)
}

/// True when every blocker of `task` is completed, or cancelled (a
/// cancelled blocker does not count). Missing blocker files count as
/// unmet so a torn graph fails closed.
pub fn blockers_met(store: &StateStore, task: &Task) -> (bool, Vec<String>) {
    let mut unmet = Vec::new();
    for blocker_id in &task.blocked_by {
        match load(store, blocker_id) {
            Some(blocker) if blocker.status.is_terminal() => {}
            _ => unmet.push(blocker_id.clone()),
        }
    }
    (unmet.is_empty(), unmet)
}
