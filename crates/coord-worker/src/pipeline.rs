//! Sequential pipeline executor.
//!
//! A pipeline is an ordered list of pipe-mode steps sharing one working
//! directory. Step N+1 starts only after step N's `completed` log line is
//! appended and its child exited zero. `pipeline.done` is the terminal
//! marker observers trust.

use anyhow::{Context, Result};
use coord_core::CoordError;
use coord_store::StateStore;
use coord_store::json::{append_jsonl, read_jsonl_tail, read_tail_lines, write_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub name: String,
    pub prompt: String,
    pub model: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub pipeline_id: Option<String>,
    pub directory: String,
    pub runtime: String,
    pub steps: Vec<PipelineStep>,
    /// Prior-context header prepended to every step prompt.
    pub context_header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTask {
    pub step: usize,
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub pipeline_id: String,
    pub directory: String,
    pub total_steps: usize,
    pub tasks: Vec<PipelineTask>,
    pub started: String,
    pub status: String,
    pub runtime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLogEntry {
    pub step: usize,
    pub slug: String,
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDone {
    pub status: String,
    pub finished: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Observer view assembled by `get_pipeline`.
#[derive(Debug, Serialize)]
pub struct PipelineView {
    pub meta: PipelineMeta,
    pub log: Vec<PipelineLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<PipelineDone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<PipelineLogEntry>,
    pub tail: Vec<String>,
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let collapsed = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if collapsed.is_empty() {
        "step".to_string()
    } else {
        collapsed
    }
}

/// Validate, lay out artifacts, and launch the executor task. Returns the
/// pipeline id immediately; observers poll `get_pipeline`.
pub fn start_pipeline(store: &StateStore, spec: PipelineSpec) -> Result<String> {
    if spec.steps.is_empty() {
        return Err(CoordError::validation("steps", "pipeline needs at least one step").into());
    }
    let pipeline_id =
        coord_core::ident::resolve_id("pipeline_id", spec.pipeline_id.as_deref(), 'P')?;
    coord_core::ident::validate_ident("runtime", &spec.runtime)?;
    if !std::path::Path::new(&spec.directory).is_dir() {
        return Err(CoordError::dependency(format!(
            "directory '{}' does not exist",
            spec.directory
        ))
        .into());
    }
    coord_process::resolve_runtime(&spec.runtime)?;
    if store.pipeline_meta(&pipeline_id).exists() {
        return Err(CoordError::conflict(format!(
            "pipeline '{pipeline_id}' already exists"
        ))
        .into());
    }

    let dir = store.pipeline_dir(&pipeline_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut tasks = Vec::new();
    for (index, step) in spec.steps.iter().enumerate() {
        let slug = slugify(&step.name);
        let step_no = index + 1;
        let mut prompt = String::new();
        if let Some(header) = spec.context_header.as_deref() {
            prompt.push_str(header);
            prompt.push('\n');
        }
        prompt.push_str(&step.prompt);
        prompt.push('\n');
        std::fs::write(store.pipeline_step_prompt(&pipeline_id, step_no, &slug), prompt)
            .context("failed to write step prompt")?;
        tasks.push(PipelineTask {
            step: step_no,
            name: step.name.clone(),
            slug,
            model: step.model.clone(),
            agent: step.agent.clone(),
        });
    }

    let meta = PipelineMeta {
        pipeline_id: pipeline_id.clone(),
        directory: spec.directory.clone(),
        total_steps: tasks.len(),
        tasks,
        started: coord_core::time::now_iso(),
        status: "running".to_string(),
        runtime: spec.runtime.clone(),
    };
    write_json_atomic(&store.pipeline_meta(&pipeline_id), &meta)?;

    let store = store.clone();
    let id = pipeline_id.clone();
    tokio::spawn(async move {
        if let Err(err) = execute_pipeline(&store, &id).await {
            warn!(pipeline_id = id, error = %err, "pipeline executor failed");
            let _ = write_done(&store, &id, "failed", Some(&err.to_string()));
        }
    });

    Ok(pipeline_id)
}

fn write_done(store: &StateStore, pipeline_id: &str, status: &str, error: Option<&str>) -> Result<()> {
    if store.pipeline_done(pipeline_id).exists() {
        return Ok(());
    }
    write_json_atomic(
        &store.pipeline_done(pipeline_id),
        &PipelineDone {
            status: status.to_string(),
            finished: coord_core::time::now_iso(),
            error: error.map(str::to_string),
        },
    )?;
    if let Ok(Some(mut meta)) = coord_store::json::read_json::<PipelineMeta>(
        &store.pipeline_meta(pipeline_id),
    ) {
        meta.status = status.to_string();
        write_json_atomic(&store.pipeline_meta(pipeline_id), &meta)?;
    }
    Ok(())
}

/// Run every step strictly in order. Public so tests can await completion
/// instead of polling the spawned task.
pub async fn execute_pipeline(store: &StateStore, pipeline_id: &str) -> Result<()> {
    let meta: PipelineMeta = coord_store::json::read_json(&store.pipeline_meta(pipeline_id))?
        .ok_or_else(|| CoordError::dependency(format!("pipeline '{pipeline_id}' not found")))?;
    let runtime_path = coord_process::resolve_runtime(&meta.runtime)?;
    let log_path = store.pipeline_log(pipeline_id);

    for task in &meta.tasks {
        append_jsonl(
            &log_path,
            &PipelineLogEntry {
                step: task.step,
                slug: task.slug.clone(),
                name: task.name.clone(),
                status: "running".to_string(),
                started: Some(coord_core::time::now_iso()),
                finished: None,
            },
        )?;

        let prompt = store.pipeline_step_prompt(pipeline_id, task.step, &task.slug);
        let output = store.pipeline_step_log(pipeline_id, task.step, &task.slug);
        let args = match meta.runtime.as_str() {
            "claude" => vec!["--print".to_string()],
            "codex" => vec!["exec".to_string()],
            _ => Vec::new(),
        };

        let spawned = coord_process::spawn_detached(
            &runtime_path.display().to_string(),
            &args,
            std::path::Path::new(&meta.directory),
            &output,
            Some(&prompt),
            &[("COORD_PIPELINE_ID".to_string(), pipeline_id.to_string())],
        )
        .await?;

        let mut child = spawned.child;
        let status = child.wait().await.context("failed to wait for step")?;
        if !status.success() {
            let error = format!(
                "step {} ({}) exited with {}",
                task.step,
                task.slug,
                status.code().map_or("signal".to_string(), |c| c.to_string())
            );
            write_done(store, pipeline_id, "failed", Some(&error))?;
            return Ok(());
        }

        append_jsonl(
            &log_path,
            &PipelineLogEntry {
                step: task.step,
                slug: task.slug.clone(),
                name: task.name.clone(),
                status: "completed".to_string(),
                started: None,
                finished: Some(coord_core::time::now_iso()),
            },
        )?;
    }

    write_done(store, pipeline_id, "completed", None)?;
    info!(pipeline_id, steps = meta.total_steps, "pipeline completed");
    Ok(())
}

/// Current step, full log, terminal marker, and the most recent step's
/// output tail.
pub fn get_pipeline(store: &StateStore, pipeline_id: &str, tail_lines: usize) -> Result<PipelineView> {
    coord_core::ident::validate_ident("pipeline_id", pipeline_id)?;
    let meta: PipelineMeta = coord_store::json::read_json(&store.pipeline_meta(pipeline_id))?
        .ok_or_else(|| CoordError::dependency(format!("pipeline '{pipeline_id}' not found")))?;

    let log = read_jsonl_tail::<PipelineLogEntry>(
        &store.pipeline_log(pipeline_id),
        coord_store::json::MAX_JSONL_ENTRIES,
    )?
    .entries;
    let done: Option<PipelineDone> =
        coord_store::json::read_json(&store.pipeline_done(pipeline_id))?;
    let current_step = log.last().cloned();

    let tail = match &current_step {
        Some(entry) => read_tail_lines(
            &store.pipeline_step_log(pipeline_id, entry.step, &entry.slug),
            tail_lines,
        )?,
        None => Vec::new(),
    };

    Ok(PipelineView {
        meta,
        log,
        done,
        current_step,
        tail,
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
