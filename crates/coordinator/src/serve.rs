//! Stdio serve loop.
//!
//! One JSON object per line in, one per line out. This is the thin
//! stand-in for the external framing library: it extracts
//! `(tool, arguments)`, fans requests out to capped concurrent handler
//! tasks, and writes each response as it completes (responses carry the
//! request `id`, ordering is not guaranteed).

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::router::Router;

/// Concurrent in-flight handler cap.
const MAX_IN_FLIGHT: usize = 16;

pub async fn serve_stdio(router: Router) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    serve_lines(router, stdin, stdout).await
}

async fn serve_lines<R>(
    router: Router,
    mut reader: BufReader<R>,
    writer: Arc<Mutex<tokio::io::Stdout>>,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let router = Arc::new(router);
    let slots = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut line = String::new();
    info!("coordinator serving tool calls on stdio");

    loop {
        line.clear();
        let bytes = tokio::select! {
            read = reader.read_line(&mut line) => read.context("failed to read request line")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping serve loop");
                break;
            }
        };
        if bytes == 0 {
            break; // stdin closed
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => {
                write_response(
                    &writer,
                    &json!({"id": null, "error": format!("invalid request JSON: {err}")}),
                )
                .await?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let Some(tool) = request.get("tool").and_then(Value::as_str).map(str::to_string) else {
            write_response(
                &writer,
                &json!({"id": id, "error": "request is missing 'tool'"}),
            )
            .await?;
            continue;
        };
        let arguments = request.get("arguments").cloned().unwrap_or(Value::Null);

        let permit = slots
            .clone()
            .acquire_owned()
            .await
            .context("handler slot pool closed")?;
        let task_router = router.clone();
        let task_writer = writer.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let result = task_router.handle(&tool, &arguments).await;
            if let Err(err) =
                write_response(&task_writer, &json!({"id": id, "result": result})).await
            {
                warn!(error = %err, "failed to write response");
            }
        });
    }

    Ok(())
}

async fn write_response(
    writer: &Arc<Mutex<tokio::io::Stdout>>,
    value: &Value,
) -> Result<()> {
    let mut line = serde_json::to_string(value).context("failed to serialize response")?;
    line.push('\n');
    let mut stdout = writer.lock().await;
    stdout
        .write_all(line.as_bytes())
        .await
        .context("failed to write response line")?;
    stdout.flush().await.context("failed to flush response")
}
