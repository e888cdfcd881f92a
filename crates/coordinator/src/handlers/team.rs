use anyhow::Result;
use coord_core::CoordError;
use coord_core::types::{BudgetPolicy, ContextLevel, PermissionMode, TaskPriority, WorkerMode};
use coord_team::dispatch::QueueTaskParams;
use coord_team::team::{Member, TeamPolicy, TeamSpec, Teams};
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

fn decode_policy(args: &Args<'_>) -> Result<Option<TeamPolicy>, CoordError> {
    let Some(policy_value) = args.opt_object("policy")? else {
        return Ok(None);
    };
    let value = Value::Object(policy_value);
    let policy_args = Args::new(&value)?;

    Ok(Some(TeamPolicy {
        permission_mode: policy_args.opt_enum("permission_mode", PermissionMode::parse)?,
        require_plan: policy_args.opt_bool("require_plan", false)?,
        default_mode: policy_args.opt_enum("default_mode", WorkerMode::parse)?,
        default_runtime: policy_args.opt_ident("default_runtime")?.map(str::to_string),
        default_context_level: policy_args
            .opt_enum("default_context_level", ContextLevel::parse)?,
        budget_policy: policy_args.opt_enum("budget_policy", BudgetPolicy::parse)?,
        budget_tokens: policy_args.opt_u64("budget_tokens")?,
        global_budget_policy: policy_args
            .opt_enum("global_budget_policy", BudgetPolicy::parse)?,
        global_budget_tokens: policy_args.opt_u64("global_budget_tokens")?,
        max_active_workers: policy_args.opt_usize("max_active_workers")?,
        default_isolate: policy_args.opt_bool("default_isolate", false)?,
    }))
}

fn decode_members(args: &Args<'_>) -> Result<Vec<Member>> {
    let Some(items) = args.opt_array("members")? else {
        return Ok(Vec::new());
    };
    let mut members = Vec::new();
    for item in items {
        let member_args = Args::new(item)?;
        members.push(Member {
            name: member_args.require_ident("name")?.to_string(),
            role: member_args.opt_str("role")?.unwrap_or_default().to_string(),
            session_id: member_args.opt_ident("session_id")?.map(str::to_string),
            task_id: None,
            presence: member_args.opt_str("presence")?.map(str::to_string),
        });
    }
    Ok(members)
}

pub async fn create_team(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let teams = Teams::new(ctx.store.clone());

    let team = teams.create_or_update(TeamSpec {
        team_name: args.require_str("team_name")?.to_string(),
        project: args.opt_str("project")?.map(str::to_string),
        description: args.opt_str("description")?.map(str::to_string),
        preset: args.opt_str("preset")?.map(str::to_string),
        execution_path: args.opt_str("execution_path")?.map(str::to_string),
        low_overhead_mode: args.opt_str("low_overhead_mode")?.map(str::to_string),
        policy: decode_policy(&args)?,
        members: decode_members(&args)?,
    })?;
    Reply::json(&team)
}

pub async fn get_team(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;
    let teams = Teams::new(ctx.store.clone());
    Reply::json(&teams.require(&team_name.to_lowercase())?)
}

pub async fn queue_task(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;

    let dispatch = match args.opt_object("dispatch")? {
        Some(map) => Value::Object(map),
        None => Value::Null,
    };
    let dispatch_args = Args::new(&dispatch)?;

    let task_id = coord_team::dispatch::queue_task(
        &ctx.store,
        team_name,
        QueueTaskParams {
            subject: args.require_str("subject")?.to_string(),
            prompt: args.require_str("prompt")?.to_string(),
            directory: dispatch_args
                .opt_str("directory")?
                .or(args.opt_str("directory")?)
                .ok_or_else(|| CoordError::validation("directory", "required string missing"))?
                .to_string(),
            task_id: args.opt_ident("task_id")?.map(str::to_string),
            priority: args.opt_enum("priority", TaskPriority::parse)?,
            role_hint: args.opt_str("role_hint")?.map(str::to_string),
            load_affinity: args.opt_str("load_affinity")?.map(str::to_string),
            files: args.opt_str_vec("files")?,
            acceptance_criteria: args.opt_str_vec("acceptance_criteria")?,
            model: dispatch_args.opt_str("model")?.map(str::to_string),
            agent: dispatch_args.opt_str("agent")?.map(str::to_string),
            runtime: dispatch_args.opt_ident("runtime")?.map(str::to_string),
            actor: args.opt_str("actor")?.unwrap_or("coordinator").to_string(),
        },
    )?;
    Ok(Reply::new(format!("task {task_id} queued for team {team_name}")))
}

pub async fn assign_next(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;
    let assignee = args.opt_ident("assignee")?;

    let outcome =
        coord_team::assign_next(&ctx.store, team_name, assignee, &ctx.defaults).await?;
    Reply::json(&outcome)
}

pub async fn rebalance(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;
    let limit = args.opt_usize("limit")?;
    let apply = args.opt_bool("apply", true)?;
    let dispatch_next = args.opt_bool("dispatch_next", false)?;

    let report = coord_team::rebalance(&ctx.store, team_name, limit, apply)?;
    let mut reply = Reply::json(&report)?;
    if dispatch_next {
        match coord_team::assign_next(&ctx.store, team_name, None, &ctx.defaults).await {
            Ok(outcome) => {
                reply.text.push_str(&format!(
                    "\ndispatched {} to {}",
                    outcome.task_id, outcome.assignee
                ));
            }
            Err(err) => {
                reply.warnings.push(format!("dispatch_next: {err}"));
            }
        }
    }
    Ok(reply)
}

pub async fn status(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;
    Ok(Reply::new(coord_team::status_compact(&ctx.store, team_name)?))
}
