//! Process management: detached spawning, liveness probes, signals.
//!
//! Children are always placed in their own process group (setsid) so the
//! coordinator's lifetime is independent of theirs, and kills can target
//! the whole group.

pub mod aux;
pub mod inject;
pub mod terminal;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coord_core::CoordError;
use tokio::process::{Child, Command};
use tracing::debug;

/// A spawned, detached child. The caller owns the `Child` handle for its
/// exit hook; the process keeps running if the handle is dropped.
pub struct DetachedSpawn {
    pub pid: u32,
    pub child: Child,
}

/// Spawn `program` detached, in its own process group, with stdout and
/// stderr appended to `log_path` and stdin read from `stdin_path` (or
/// null). The log file is created if missing.
pub async fn spawn_detached(
    program: &str,
    args: &[String],
    cwd: &Path,
    log_path: &Path,
    stdin_path: Option<&Path>,
    env: &[(String, String)],
) -> Result<DetachedSpawn> {
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file: {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .context("failed to clone log handle for stderr")?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdout(std::process::Stdio::from(log))
        .stderr(std::process::Stdio::from(log_err))
        .kill_on_drop(false);

    match stdin_path {
        Some(path) => {
            let stdin = std::fs::File::open(path)
                .with_context(|| format!("failed to open stdin file: {}", path.display()))?;
            cmd.stdin(std::process::Stdio::from(stdin));
        }
        None => {
            cmd.stdin(std::process::Stdio::null());
        }
    }

    for (key, value) in env {
        cmd.env(key, value);
    }

    // Detach into a fresh session/process group.
    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn '{program}'"))?;
    let pid = child.id().context("spawned child has no pid")?;

    debug!(program, pid, cwd = %cwd.display(), "spawned detached child");
    Ok(DetachedSpawn { pid, child })
}

/// Liveness probe. Signal-0 on POSIX; process-table scan elsewhere.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 performs only the permission check.
        let ret = unsafe { libc::kill(pid as i32, 0) };
        if ret == 0 {
            return true;
        }
        // EPERM means the process exists but belongs to someone else.
        return std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    }

    #[cfg(not(unix))]
    {
        let mut sys = sysinfo::System::new();
        sys.refresh_processes(
            sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
            true,
        );
        sys.process(sysinfo::Pid::from_u32(pid)).is_some()
    }
}

/// Ask the process group to terminate (SIGTERM). Falls back to the single
/// process when the group signal fails.
pub fn terminate_process_group(pid: u32) {
    signal_group(pid, SignalKind::Terminate);
}

/// Kill the process group outright (SIGKILL / `taskkill /T /F`).
pub fn kill_process_group(pid: u32) {
    signal_group(pid, SignalKind::Kill);
}

/// Deliver an interrupt (SIGINT) to a single process. Used by the wake
/// protocol; a no-op on platforms without signals.
pub fn interrupt_process(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: sending SIGINT to a pid we previously observed; the probe
        // races with exit, which is fine for a best-effort interrupt.
        unsafe {
            libc::kill(pid as i32, libc::SIGINT);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

#[derive(Clone, Copy)]
enum SignalKind {
    Terminate,
    Kill,
}

fn signal_group(pid: u32, kind: SignalKind) {
    #[cfg(unix)]
    {
        let sig = match kind {
            SignalKind::Terminate => libc::SIGTERM,
            SignalKind::Kill => libc::SIGKILL,
        };
        // SAFETY: negative pid targets the process group created by setsid.
        unsafe {
            if libc::kill(-(pid as i32), sig) != 0 {
                libc::kill(pid as i32, sig);
            }
        }
    }

    #[cfg(not(unix))]
    {
        let mut cmd = std::process::Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string(), "/T"]);
        if matches!(kind, SignalKind::Kill) {
            cmd.arg("/F");
        }
        if let Err(err) = cmd.output() {
            tracing::warn!(pid, error = %err, "taskkill failed");
        }
    }
}

/// Direct children of `pid`, via the process table.
pub fn child_pids(pid: u32) -> Vec<u32> {
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let parent = sysinfo::Pid::from_u32(pid);
    sys.processes()
        .iter()
        .filter(|(_, proc)| proc.parent() == Some(parent))
        .map(|(child, _)| child.as_u32())
        .collect()
}

/// Resolve an assistant-CLI runtime binary on PATH. A missing binary is a
/// dependency error naming the binary and a remediation hint.
pub fn resolve_runtime(binary: &str) -> Result<PathBuf, CoordError> {
    which::which(binary).map_err(|_| {
        CoordError::dependency(format!(
            "runtime '{binary}' not found on PATH; install it or pass a different 'runtime'"
        ))
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
