use anyhow::Result;
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;
use crate::wake;

pub async fn wake_session(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;
    let text = args.opt_str("text")?.unwrap_or("Coordinator wake: check your inbox.");

    Ok(Reply::new(wake::wake_session(&ctx.store, session, text)?))
}

pub async fn force_wake(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;
    let message = args.opt_str("message")?.unwrap_or("resume");
    let force_kill = args.opt_bool("force_kill", false)?;

    let report = wake::force_wake(
        ctx,
        session,
        message,
        force_kill,
        wake::ForceWakeOptions::default(),
    )
    .await?;
    Ok(Reply::new(report))
}

pub async fn shutdown_request(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let target = args.require_ident("target")?;
    let message = args.opt_str("message")?.unwrap_or("please finish and exit");
    let timeout = args.opt_u64("force_timeout_seconds")?;

    Ok(Reply::new(
        wake::request_shutdown(ctx, target, message, timeout).await?,
    ))
}

pub async fn shutdown_response(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let request_id = args.require_str("request_id")?;
    let approve = args.opt_bool("approve", false)?;
    let reason = args.opt_str("reason")?;

    Ok(Reply::new(
        wake::respond_shutdown(ctx, request_id, approve, reason).await?,
    ))
}
