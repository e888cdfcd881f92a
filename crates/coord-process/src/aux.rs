//! Auxiliary helper subprocesses (cost / observability / policy scripts).
//!
//! Contract: fixed validated argv, captured stdout, wall-clock timeout,
//! bounded output, and a global concurrency cap. The coordinator never
//! parses helper output.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use coord_core::CoordError;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::warn;

/// Environment variable sizing the helper concurrency cap.
pub const ASYNC_MAX_PARALLEL_ENV: &str = "COORDINATOR_ASYNC_MAX_PARALLEL";
const DEFAULT_MAX_PARALLEL: usize = 4;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct AuxLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for AuxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

fn helper_slots() -> Arc<Semaphore> {
    static SLOTS: OnceLock<Arc<Semaphore>> = OnceLock::new();
    SLOTS
        .get_or_init(|| {
            let max = std::env::var(ASYNC_MAX_PARALLEL_ENV)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_PARALLEL);
            Arc::new(Semaphore::new(max))
        })
        .clone()
}

/// Run a helper and return its stdout. Queues behind the global cap, kills
/// the child on timeout, truncates output at the byte cap.
pub async fn run_helper(argv: &[String], limits: AuxLimits) -> Result<String, CoordError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CoordError::validation("argv", "must not be empty"))?;

    let slots = helper_slots();
    let _permit = slots
        .acquire()
        .await
        .map_err(|_| CoordError::runtime("helper slot pool closed"))?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CoordError::dependency(format!("helper '{program}' not found on PATH"))
            } else {
                CoordError::runtime(format!("failed to spawn helper '{program}': {err}"))
            }
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| CoordError::runtime("helper stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| CoordError::runtime("helper stderr not captured"))?;

    let work = async {
        let mut out = Vec::new();
        let mut err_buf = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut truncated = false;

        loop {
            let n = stdout
                .read(&mut chunk)
                .await
                .map_err(|e| CoordError::runtime(format!("helper stdout read failed: {e}")))?;
            if n == 0 {
                break;
            }
            if out.len() < limits.max_output_bytes {
                let take = n.min(limits.max_output_bytes - out.len());
                out.extend_from_slice(&chunk[..take]);
                truncated |= take < n;
            } else {
                truncated = true;
            }
        }
        let _ = stderr.read_to_end(&mut err_buf).await;
        let status = child
            .wait()
            .await
            .map_err(|e| CoordError::runtime(format!("helper wait failed: {e}")))?;
        Ok::<_, CoordError>((out, err_buf, status, truncated))
    };

    let (out, err_buf, status, truncated) = match tokio::time::timeout(limits.timeout, work).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(program, timeout_secs = limits.timeout.as_secs(), "helper timed out, killing");
            return Err(CoordError::Timeout {
                seconds: limits.timeout.as_secs(),
                context: format!("helper '{program}'"),
            });
        }
    };

    if !status.success() {
        let stderr_text = String::from_utf8_lossy(&err_buf).trim().to_string();
        let message = if stderr_text.is_empty() {
            format!("helper '{program}' exited with {status}")
        } else {
            stderr_text
        };
        return Err(CoordError::runtime(message));
    }

    let mut text = String::from_utf8_lossy(&out).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    Ok(text)
}
