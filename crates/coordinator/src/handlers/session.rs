use anyhow::Result;
use coord_session::SessionRegistry;
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

pub async fn list_sessions(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let include_closed = args.opt_bool("include_closed", false)?;
    let project = args.opt_str("project")?;

    let registry = SessionRegistry::new(ctx.store.clone());
    let (rows, warnings) = registry.list(include_closed, project);
    Ok(Reply::json(&rows)?.with_warnings(warnings))
}

pub async fn get_session(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;

    let registry = SessionRegistry::new(ctx.store.clone());
    Reply::json(&registry.get(session)?)
}

pub async fn register_work(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;
    let task = args.require_str("task")?;
    let files = args.opt_str_vec("files")?;
    let files = if files.is_empty() { None } else { Some(files) };

    let registry = SessionRegistry::new(ctx.store.clone());
    registry.register_work(session, task, files)?;
    Ok(Reply::new(format!("work registered for session {session}")))
}

pub async fn resolve_session(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let name = args.require_str("name")?;

    let registry = SessionRegistry::new(ctx.store.clone());
    let record = registry.resolve(name)?;
    Reply::json(&record)
}

pub async fn detect_conflicts(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;
    let files = args.opt_str_vec("files")?;

    let report = coord_session::detect_conflicts(&ctx.store, session, &files)?;
    Reply::json(&report)
}
