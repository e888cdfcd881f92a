//! Terminal-emulator launching.
//!
//! One capability: open a terminal window running a command in a
//! directory. Platform dispatch tries the best emulator first and reports
//! which one it used; when nothing works the caller falls back to a
//! background spawn, so every error here is recoverable.

use std::path::Path;

use anyhow::Result;
use coord_core::types::WorkerLayout;
use tracing::debug;

/// Open a terminal running `command` in `dir`. Returns the name of the
/// emulator used. `Background` layout is the caller's concern and is
/// rejected here.
pub fn open_terminal(command: &str, dir: &Path, layout: WorkerLayout) -> Result<String> {
    if layout == WorkerLayout::Background {
        anyhow::bail!("background layout does not open a terminal");
    }

    #[cfg(target_os = "macos")]
    {
        open_macos(command, dir, layout)
    }

    #[cfg(target_os = "windows")]
    {
        open_windows(command, dir, layout)
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        open_linux(command, dir, layout)
    }

    #[cfg(not(any(unix, target_os = "windows")))]
    {
        anyhow::bail!("no terminal integration for this platform")
    }
}

#[cfg(target_os = "macos")]
fn open_macos(command: &str, dir: &Path, layout: WorkerLayout) -> Result<String> {
    let shell = applescript_escape(&format!("cd {} && {}", dir.display(), command));

    // Terminal.app cannot split a window; iTerm can. Prefer the emulator
    // that honors the requested layout and fall back to the other.
    let attempts: &[&str] = match layout {
        WorkerLayout::Split => &["iTerm", "Terminal"],
        _ => &["Terminal", "iTerm"],
    };

    for emulator in attempts {
        let script = match (*emulator, layout) {
            ("iTerm", WorkerLayout::Split) => format!(
                "tell application \"iTerm\" to tell current session of current window \
                 to split horizontally with default profile command \"{shell}\""
            ),
            ("iTerm", _) => format!(
                "tell application \"iTerm\" to create window with default profile \
                 command \"{shell}\""
            ),
            _ => format!("tell application \"Terminal\" to do script \"{shell}\""),
        };
        let status = std::process::Command::new("osascript")
            .args(["-e", &script])
            .status();
        match status {
            Ok(status) if status.success() => {
                debug!(emulator, layout = %layout, "opened terminal");
                return Ok((*emulator).to_string());
            }
            Ok(status) => {
                debug!(emulator, %status, "osascript failed, trying next emulator");
            }
            Err(err) => {
                debug!(emulator, error = %err, "osascript not runnable");
            }
        }
    }

    anyhow::bail!("neither Terminal nor iTerm accepted the command")
}

#[cfg(target_os = "macos")]
fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(target_os = "windows")]
fn open_windows(command: &str, dir: &Path, layout: WorkerLayout) -> Result<String> {
    use anyhow::Context;

    let tab_flag = match layout {
        WorkerLayout::Split => "sp",
        _ => "nt",
    };
    let wt = std::process::Command::new("wt")
        .args([tab_flag, "-d"])
        .arg(dir)
        .args(["cmd", "/c", command])
        .spawn();
    if wt.is_ok() {
        return Ok("wt".to_string());
    }

    std::process::Command::new("cmd")
        .args(["/c", "start", "cmd", "/k", command])
        .current_dir(dir)
        .spawn()
        .context("failed to start cmd window")?;
    Ok("cmd".to_string())
}

#[cfg(all(unix, not(target_os = "macos")))]
fn open_linux(command: &str, dir: &Path, layout: WorkerLayout) -> Result<String> {
    // Ranked: distro alternative first, then common emulators. Split
    // degrades to a new window; only multiplexer-backed terminals can
    // split, and those are not assumed.
    let _ = layout;
    const CANDIDATES: &[(&str, &[&str])] = &[
        ("x-terminal-emulator", &["-e"]),
        ("gnome-terminal", &["--"]),
        ("konsole", &["-e"]),
        ("xfce4-terminal", &["-x"]),
        ("alacritty", &["-e"]),
        ("kitty", &[]),
        ("xterm", &["-e"]),
    ];

    for (emulator, exec_args) in CANDIDATES {
        if which::which(emulator).is_err() {
            continue;
        }
        let result = std::process::Command::new(emulator)
            .args(*exec_args)
            .args(["sh", "-c", command])
            .current_dir(dir)
            .spawn();
        match result {
            Ok(_) => {
                debug!(emulator, "opened terminal");
                return Ok((*emulator).to_string());
            }
            Err(err) => {
                debug!(emulator, error = %err, "emulator launch failed, trying next");
            }
        }
    }

    anyhow::bail!("no terminal emulator available")
}
