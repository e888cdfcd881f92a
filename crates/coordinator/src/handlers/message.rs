use anyhow::Result;
use coord_core::types::MessagePriority;
use coord_message::{Messenger, post_announcement};
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

fn priority_of(args: &Args<'_>) -> Result<MessagePriority, coord_core::CoordError> {
    Ok(args
        .opt_enum("priority", MessagePriority::parse)?
        .unwrap_or_default())
}

pub async fn send_message(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let from = args.require_str("from")?;
    let to = args.require_ident("to")?;
    let content = args.require_str("content")?;
    let priority = priority_of(&args)?;
    let thread_id = args.opt_ident("thread_id")?;

    let messenger = Messenger::new(ctx.store.clone());
    messenger.send(from, to, content, priority, thread_id, false)?;
    Ok(Reply::new(format!("message sent to {to}")))
}

pub async fn check_inbox(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;

    let messenger = Messenger::new(ctx.store.clone());
    let checked = messenger.check_inbox(session)?;
    let warnings = checked.warnings.clone();
    Ok(Reply::json(&checked)?.with_warnings(warnings))
}

pub async fn broadcast(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let from = args.require_str("from")?;
    let content = args.require_str("content")?;
    let priority = priority_of(&args)?;
    let announcement = args.opt_bool("announcement", false)?;

    let messenger = Messenger::new(ctx.store.clone());
    let outcome = messenger.broadcast(from, content, priority, announcement)?;
    Reply::json(&outcome)
}

/// Send plus best-effort wake: delivery is durable either way.
pub async fn send_directive(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let from = args.require_str("from")?;
    let to = args.require_ident("to")?;
    let content = args.require_str("content")?;
    let priority = args
        .opt_enum("priority", MessagePriority::parse)?
        .unwrap_or(MessagePriority::Urgent);

    let messenger = Messenger::new(ctx.store.clone());
    messenger.send(from, to, content, priority, None, false)?;

    let woken = crate::wake::try_wake(&ctx.store, to, content);
    Ok(Reply::new(format!(
        "directive sent to {to} (wake {})",
        if woken { "delivered" } else { "best-effort, not confirmed" }
    )))
}

pub async fn announce(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team = args.require_ident("team_name")?;
    let from = args.require_str("from")?;
    let content = args.require_str("content")?;
    let priority = priority_of(&args)?;

    let id = post_announcement(&ctx.store, team, from, content, priority)?;
    Ok(Reply::new(format!("announcement {id} posted to team {team}")))
}

pub async fn dashboard(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let _ = Args::new(arguments)?;
    let dashboard = coord_message::sla::receipts_dashboard(&ctx.store)?;
    Reply::json(&dashboard)
}

pub async fn sla_check(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let _ = Args::new(arguments)?;
    let findings = coord_message::run_sla_check(&ctx.store)?;
    Reply::json(&findings)
}

pub async fn get_thread(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let thread_id = args.require_ident("thread_id")?;

    let messenger = Messenger::new(ctx.store.clone());
    Reply::json(&messenger.thread_history(thread_id)?)
}
