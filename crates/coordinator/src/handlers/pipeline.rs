use anyhow::Result;
use coord_core::CoordError;
use coord_worker::{PipelineSpec, PipelineStep};
use serde_json::Value;

use crate::router::{Ctx, Reply};
use crate::schema::Args;

pub async fn run_pipeline(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let directory = args.require_str("directory")?;
    let steps_value = args
        .opt_array("steps")?
        .ok_or_else(|| CoordError::validation("steps", "required array missing"))?;

    let mut steps = Vec::new();
    for step in steps_value {
        let step_args = Args::new(step)?;
        steps.push(PipelineStep {
            name: step_args.require_str("name")?.to_string(),
            prompt: step_args.require_str("prompt")?.to_string(),
            model: step_args.opt_str("model")?.map(str::to_string),
            agent: step_args.opt_str("agent")?.map(str::to_string),
        });
    }

    let spec = PipelineSpec {
        pipeline_id: args.opt_ident("pipeline_id")?.map(str::to_string),
        directory: directory.to_string(),
        runtime: args.opt_ident("runtime")?.unwrap_or("claude").to_string(),
        steps,
        context_header: args.opt_str("context_header")?.map(str::to_string),
    };

    let pipeline_id = coord_worker::start_pipeline(&ctx.store, spec)?;
    Ok(Reply::new(format!("pipeline {pipeline_id} started")))
}

pub async fn get_pipeline(ctx: &Ctx, arguments: &Value) -> Result<Reply> {
    let args = Args::new(arguments)?;
    let pipeline_id = args.require_ident("pipeline_id")?;
    let tail_lines = args.opt_usize("tail_lines")?.unwrap_or(100);

    let view = coord_worker::get_pipeline(&ctx.store, pipeline_id, tail_lines)?;
    Reply::json(&view)
}
