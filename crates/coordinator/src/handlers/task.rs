use anyhow::Result;
use coord_core::types::TaskPriority;
use coord_task::board::{CreateTask, TaskBoard, UpdateTask};
use coord_task::task::{AcceptanceCriterion, TaskStatus};
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

fn actor_of(args: &Args<'_>) -> String {
    args.opt_str("actor")
        .ok()
        .flatten()
        .unwrap_or("coordinator")
        .to_string()
}

pub async fn create_task(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let board = TaskBoard::new(ctx.store.clone());

    let task = board.create(CreateTask {
        subject: args.require_str("subject")?.to_string(),
        description: args.opt_str("description")?.map(str::to_string),
        task_id: args.opt_ident("task_id")?.map(str::to_string),
        assignee: args.opt_str("assignee")?.map(str::to_string),
        priority: args.opt_enum("priority", TaskPriority::parse)?,
        files: args.opt_str_vec("files")?,
        blocked_by: args.opt_str_vec("blocked_by")?,
        team_name: args.opt_ident("team_name")?.map(str::to_string),
        metadata: args.opt_object("metadata")?,
        approval_required: args.opt_bool("approval_required", false)?,
        acceptance_criteria: args.opt_str_vec("acceptance_criteria")?,
        actor: actor_of(&args),
    })?;
    Reply::json(&task)
}

fn decode_criteria(args: &Args<'_>) -> Result<Option<Vec<AcceptanceCriterion>>> {
    let Some(items) = args.opt_array("acceptance_criteria")? else {
        return Ok(None);
    };
    let mut criteria = Vec::new();
    for item in items {
        match item {
            Value::String(text) => criteria.push(AcceptanceCriterion {
                text: text.clone(),
                satisfied: false,
            }),
            Value::Object(_) => {
                let item_args = Args::new(item)?;
                criteria.push(AcceptanceCriterion {
                    text: item_args.require_str("text")?.to_string(),
                    satisfied: item_args.opt_bool("satisfied", false)?,
                });
            }
            _ => {
                return Err(coord_core::CoordError::validation(
                    "acceptance_criteria",
                    "entries must be strings or {text, satisfied} objects",
                )
                .into());
            }
        }
    }
    Ok(Some(criteria))
}

pub async fn update_task(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let board = TaskBoard::new(ctx.store.clone());

    let status = args.opt_enum("status", TaskStatus::parse)?;
    let blocked_by = match args.opt_array("blocked_by")? {
        Some(_) => Some(args.opt_str_vec("blocked_by")?),
        None => None,
    };
    let files = match args.opt_array("files")? {
        Some(_) => Some(args.opt_str_vec("files")?),
        None => None,
    };

    let task = board.update(
        task_id,
        UpdateTask {
            status,
            subject: args.opt_str("subject")?.map(str::to_string),
            description: args.opt_str("description")?.map(str::to_string),
            assignee: args.opt_str("assignee")?.map(str::to_string),
            priority: args.opt_enum("priority", TaskPriority::parse)?,
            files,
            blocked_by,
            metadata: args.opt_object("metadata")?,
            acceptance_criteria: decode_criteria(&args)?,
            note: args.opt_str("note")?.map(str::to_string),
            actor: actor_of(&args),
        },
    )?;
    Reply::json(&task)
}

pub async fn list_tasks(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let status = args.opt_enum("status", TaskStatus::parse)?;
    let assignee = args.opt_str("assignee")?;
    let team_name = args.opt_ident("team_name")?;

    let board = TaskBoard::new(ctx.store.clone());
    let (rows, warnings) = board.list(status, assignee, team_name);
    Ok(Reply::json(&rows)?.with_warnings(warnings))
}

pub async fn get_task(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let board = TaskBoard::new(ctx.store.clone());
    Reply::json(&board.require(task_id)?)
}

pub async fn reassign_task(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let new_assignee = args.require_ident("new_assignee")?;
    let reason = args.opt_str("reason")?;
    let progress_context = args.opt_str("progress_context")?;

    let board = TaskBoard::new(ctx.store.clone());
    let task = board.reassign(task_id, new_assignee, reason, progress_context, &actor_of(&args))?;
    Reply::json(&task)
}

pub async fn get_task_audit(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let board = TaskBoard::new(ctx.store.clone());
    Reply::json(&board.audit_view(task_id)?)
}

pub async fn check_quality_gates(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let board = TaskBoard::new(ctx.store.clone());
    Reply::json(&board.quality_gates(task_id)?)
}

pub async fn approve_plan(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let board = TaskBoard::new(ctx.store.clone());
    let task = board.approve_plan(task_id, &actor_of(&args))?;
    Reply::json(&task)
}

pub async fn reject_plan(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let task_id = args.require_ident("task_id")?;
    let feedback = args.require_str("feedback")?;
    let board = TaskBoard::new(ctx.store.clone());
    let task = board.reject_plan(task_id, feedback, &actor_of(&args))?;
    Reply::json(&task)
}
