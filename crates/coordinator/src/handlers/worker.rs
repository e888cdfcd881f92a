use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::{
    BudgetPolicy, ContextLevel, PermissionMode, WorkerLayout, WorkerMode, WorkerRole,
};
use coord_worker::spawn::SpawnRequest;
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

/// Decode the full spawn option set shared by spawn and batch spawn.
fn decode_spawn_request(args: &Args<'_>) -> Result<SpawnRequest, CoordError> {
    let directory = args.require_str("directory")?;
    let prompt = args.require_str("prompt")?;

    let mut request = SpawnRequest::new(directory, prompt);
    request.task_id = args.opt_ident("task_id")?.map(str::to_string);
    request.files = args.opt_str_vec("files")?;
    if let Some(mode) = args.opt_enum("mode", WorkerMode::parse)? {
        request.mode = mode;
    }
    if let Some(runtime) = args.opt_ident("runtime")? {
        request.runtime = runtime.to_string();
    }
    if let Some(layout) = args.opt_enum("layout", WorkerLayout::parse)? {
        request.layout = layout;
    }
    if args.opt_bool("isolate", false)? {
        request.isolate = Some(true);
    }
    request.role = args.opt_enum("role", WorkerRole::parse)?;
    request.permission_mode = args.opt_enum("permission_mode", PermissionMode::parse)?;
    request.require_plan = args.opt_bool("require_plan", false)?;
    request.context_level = args.opt_enum("context_level", ContextLevel::parse)?;
    request.model = args.opt_str("model")?.map(str::to_string);
    request.agent = args.opt_str("agent")?.map(str::to_string);
    request.budget_policy = args.opt_enum("budget_policy", BudgetPolicy::parse)?;
    request.budget_tokens = args.opt_u64("budget_tokens")?;
    request.global_budget_policy = args.opt_enum("global_budget_policy", BudgetPolicy::parse)?;
    request.global_budget_tokens = args.opt_u64("global_budget_tokens")?;
    request.max_active_workers = args.opt_usize("max_active_workers")?;
    request.team_name = args.opt_ident("team_name")?.map(str::to_string);
    request.worker_name = args.opt_ident("worker_name")?.map(str::to_string);
    request.notify_session_id = args.opt_ident("notify_session_id")?.map(str::to_string);
    request.max_turns = args.opt_u32("max_turns")?;
    request.context_summary = args.opt_str("context_summary")?.map(str::to_string);
    Ok(request)
}

pub async fn spawn_worker(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let request = decode_spawn_request(&args)?;

    let outcome = coord_worker::spawn_worker(&ctx.store, request, &ctx.defaults).await?;
    let warnings = outcome.warnings.clone();
    Ok(Reply::json(&outcome)?.with_warnings(warnings))
}

pub async fn spawn_workers(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let workers = args
        .opt_array("workers")?
        .ok_or_else(|| CoordError::validation("workers", "required array missing"))?;

    let mut requests = Vec::new();
    for worker in workers {
        let worker_args = Args::new(worker)?;
        requests.push(decode_spawn_request(&worker_args)?);
    }

    let entries = coord_worker::spawn_workers(&ctx.store, requests, &ctx.defaults).await?;
    Reply::json(&entries)
}

pub async fn get_result(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let tail_lines = args
        .opt_usize("tail_lines")?
        .unwrap_or(coord_worker::supervise::DEFAULT_TAIL_LINES);

    let view = coord_worker::get_result(&ctx.store, task_id, tail_lines)?;
    Reply::json(&view)
}

pub async fn kill_worker(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;

    let status = coord_worker::kill_worker(&ctx.store, task_id).await?;
    Ok(Reply::new(format!("worker {task_id}: {status}")))
}

pub async fn resume_worker(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let mode = args.opt_enum("mode", WorkerMode::parse)?;

    let outcome = coord_worker::resume_worker(&ctx.store, task_id, mode, &ctx.defaults).await?;
    Reply::json(&outcome)
}

pub async fn upgrade_worker(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;

    let outcome = coord_worker::upgrade_worker(&ctx.store, task_id, &ctx.defaults).await?;
    Reply::json(&outcome)
}
