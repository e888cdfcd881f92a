//! Best-effort keystroke injection into a session's controlling TTY.
//!
//! The inbox is the source-of-truth delivery channel; injection only nudges
//! a live prompt. Callers must treat `false` as normal.

use std::path::Path;

use tracing::debug;

/// Push `text` (plus a newline) into the session's terminal input.
/// Returns `true` only when the whole payload was accepted.
pub fn inject_text(tty: &str, text: &str) -> bool {
    if tty.is_empty() || !Path::new(tty).exists() {
        return false;
    }

    #[cfg(target_os = "macos")]
    {
        inject_osascript(text)
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        inject_tiocsti(tty, text)
    }

    #[cfg(not(unix))]
    {
        let _ = text;
        false
    }
}

/// macOS: type into the frontmost application via System Events. The tty
/// only gates liveness here; AppleScript cannot target a specific tab, so
/// this lands in whichever terminal has focus.
#[cfg(target_os = "macos")]
fn inject_osascript(text: &str) -> bool {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    let script = format!(
        "tell application \"System Events\"\nkeystroke \"{escaped}\"\nkeystroke return\nend tell"
    );
    match std::process::Command::new("osascript")
        .args(["-e", &script])
        .status()
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!(%status, "osascript keystroke rejected");
            false
        }
        Err(err) => {
            debug!(error = %err, "osascript not runnable");
            false
        }
    }
}

/// Linux and the BSDs: TIOCSTI queues one byte at a time as if typed.
/// Modern kernels may gate it behind CAP_SYS_ADMIN (or remove it); any
/// failure aborts quietly.
#[cfg(all(unix, not(target_os = "macos")))]
fn inject_tiocsti(tty: &str, text: &str) -> bool {
    use std::os::unix::io::AsRawFd;

    let file = match std::fs::OpenOptions::new().write(true).open(tty) {
        Ok(file) => file,
        Err(err) => {
            debug!(tty, error = %err, "cannot open tty for injection");
            return false;
        }
    };
    let fd = file.as_raw_fd();

    let mut payload = text.as_bytes().to_vec();
    payload.push(b'\n');

    for byte in payload {
        // SAFETY: fd is a valid open descriptor; TIOCSTI reads one byte
        // from the pointed-to buffer.
        let ret = unsafe { libc::ioctl(fd, libc::TIOCSTI as _, &byte as *const u8) };
        if ret != 0 {
            debug!(tty, "TIOCSTI rejected, injection incomplete");
            return false;
        }
    }
    true
}
