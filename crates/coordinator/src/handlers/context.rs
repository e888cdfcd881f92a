use anyhow::Result;
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

pub async fn write_context(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;
    let key = args.require_ident("key")?;
    let value = args.require_str("value")?;
    let append = args.opt_bool("append", false)?;

    coord_team::write_context(&ctx.store, team_name, key, value, append)?;
    Ok(Reply::new(format!(
        "context '{key}' {} for team {team_name}",
        if append { "appended" } else { "written" }
    )))
}

pub async fn read_context(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let team_name = args.require_ident("team_name")?;
    let key = args.opt_ident("key")?;
    let include_lead = args.opt_bool("include_lead", false)?;

    let body = coord_team::read_context(&ctx.store, team_name, key, include_lead)?;
    Ok(Reply::new(body))
}

pub async fn export_context(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let session = args.require_ident("session")?;
    let summary = args.require_str("summary")?;

    let team = coord_team::export_context(&ctx.store, session, summary)?;
    Ok(Reply::new(format!("lead context exported to team {team}")))
}
