use anyhow::Result;
use chrono::Utc;
use coord_process::aux::{AuxLimits, run_helper};
use coord_session::SessionRegistry;
use coord_store::StateStore;
use coord_store::gc::GcPolicy;
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

/// Environment variable naming the usage/cost helper executable.
pub const USAGE_HELPER_ENV: &str = "COORDINATOR_USAGE_HELPER";

pub async fn gc(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let _ = Args::new(arguments)?;
    let report = ctx
        .store
        .run_gc(&GcPolicy::default(), &coord_process::is_process_alive);
    let warnings = report.warnings.clone();
    Ok(Reply::json(&report)?.with_warnings(warnings))
}

pub async fn status(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let _ = Args::new(arguments)?;
    Ok(Reply::new(status_text(&ctx.store)?))
}

/// Human-readable one-screen summary, shared with `coord status`.
pub fn status_text(store: &StateStore) -> Result<String> {
    let registry = SessionRegistry::new(store.clone());
    let (sessions, warnings) = registry.list(false, None);

    let mut out = String::new();
    out.push_str(&format!("sessions ({}):\n", sessions.len()));
    for row in &sessions {
        out.push_str(&format!(
            "  {} [{}] {}{}\n",
            row.session,
            row.status,
            if row.current_task.is_empty() { "-" } else { &row.current_task },
            if row.has_messages { " [mail]" } else { "" },
        ));
    }

    let mut alive = Vec::new();
    for worker_id in store.worker_ids() {
        if coord_worker::meta::is_worker_alive(store, &worker_id) {
            let age = coord_worker::meta::load_meta(store, &worker_id)
                .ok()
                .flatten()
                .and_then(|meta| coord_core::time::age_seconds(&meta.spawned, Utc::now()))
                .map(|secs| format!("{secs}s"))
                .unwrap_or_else(|| "?".to_string());
            alive.push(format!("  {worker_id} (up {age})"));
        }
    }
    out.push_str(&format!("alive workers ({}):\n", alive.len()));
    for line in alive {
        out.push_str(&line);
        out.push('\n');
    }

    let teams = store.team_names();
    out.push_str(&format!("teams ({}):\n", teams.len()));
    for team in teams {
        if let Ok(block) = coord_team::status_compact(store, &team) {
            for line in block.lines() {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for warning in warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    Ok(out)
}

/// Shell out to the external usage/cost helper. The coordinator never
/// parses its output; stdout is the result.
pub async fn usage_report(_ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let window = args.opt_ident("window")?.unwrap_or("summary");

    let helper = std::env::var(USAGE_HELPER_ENV).map_err(|_| {
        coord_core::CoordError::dependency(format!(
            "no usage helper configured; set {USAGE_HELPER_ENV} to the helper executable"
        ))
    })?;

    let argv = vec![helper, "--window".to_string(), window.to_string()];
    let output = run_helper(&argv, AuxLimits::default()).await?;
    Ok(Reply::new(output))
}
