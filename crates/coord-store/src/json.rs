//! JSON / JSONL I/O with size caps.
//!
//! JSONL tails must survive two kinds of damage: byte-truncation (we only
//! read the last 8 MB) and concatenated objects from interleaved writers.
//! The reader therefore scans for balanced top-level objects instead of
//! trusting line boundaries, and reports what it had to skip as warnings.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Single-document JSON reads reject anything larger than this.
pub const MAX_JSON_BYTES: u64 = 4 * 1024 * 1024;
/// JSONL reads consider at most this many trailing bytes.
pub const MAX_JSONL_BYTES: u64 = 8 * 1024 * 1024;
/// JSONL reads return at most this many trailing entries.
pub const MAX_JSONL_ENTRIES: usize = 10_000;

/// Result of a tail read: parsed entries plus anything worth surfacing in
/// `meta.warnings`.
#[derive(Debug)]
pub struct JsonlRead<T> {
    pub entries: Vec<T>,
    pub warnings: Vec<String>,
}

/// Read a JSON document. `Ok(None)` when the file does not exist; an error
/// when it is oversized, unreadable, or malformed (callers listing many
/// records downgrade that error to a per-record warning).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat {}", path.display()));
        }
    };
    if metadata.len() > MAX_JSON_BYTES {
        anyhow::bail!(
            "{} is {} bytes, over the {} byte JSON cap",
            path.display(),
            metadata.len(),
            MAX_JSON_BYTES
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Read a JSON document, treating missing or malformed input as default.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable JSON, using default");
            T::default()
        }
    }
}

/// Write a JSON document atomically via temp-file-and-rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory: {}", parent.display()))?;

    let mut body = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;
    body.push(b'\n');

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(&body).context("failed to write temp file")?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

/// Append one JSONL line. The line is a single `write_all`, so concurrent
/// appenders under the target's lock never interleave bytes.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let mut line = serde_json::to_string(value).context("failed to serialize JSONL entry")?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Read up to `max_entries` trailing entries from a JSONL file.
///
/// Tolerates both line-delimited and concatenated objects. A missing file
/// is an empty read, not an error.
pub fn read_jsonl_tail<T: DeserializeOwned>(path: &Path, max_entries: usize) -> Result<JsonlRead<T>> {
    let max_entries = max_entries.min(MAX_JSONL_ENTRIES);
    let mut warnings = Vec::new();

    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(JsonlRead {
                entries: Vec::new(),
                warnings,
            });
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };

    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    let mut text = String::new();
    if len > MAX_JSONL_BYTES {
        file.seek(SeekFrom::Start(len - MAX_JSONL_BYTES))
            .with_context(|| format!("failed to seek {}", path.display()))?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .with_context(|| format!("failed to read {}", path.display()))?;
        // Resync to a line boundary; the partial head entry is dropped.
        let start = raw.iter().position(|b| *b == b'\n').map_or(0, |i| i + 1);
        text = String::from_utf8_lossy(&raw[start..]).into_owned();
        warnings.push(format!(
            "{} over {} bytes, returning the trailing slice only",
            path.display(),
            MAX_JSONL_BYTES
        ));
    } else {
        file.read_to_string(&mut text)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }

    let (objects, garbage) = scan_objects(&text);
    if garbage > 0 {
        warnings.push(format!(
            "{}: skipped {garbage} bytes outside JSON objects",
            path.display()
        ));
    }

    let mut entries = Vec::new();
    let mut parse_failures = 0usize;
    for object in &objects {
        match serde_json::from_str::<T>(object) {
            Ok(entry) => entries.push(entry),
            Err(_) => parse_failures += 1,
        }
    }
    if parse_failures > 0 {
        warnings.push(format!(
            "{}: {parse_failures} unparseable entr{} skipped",
            path.display(),
            if parse_failures == 1 { "y" } else { "ies" }
        ));
    }
    if entries.len() > max_entries {
        let dropped = entries.len() - max_entries;
        entries.drain(..dropped);
        warnings.push(format!(
            "{}: returning last {max_entries} of {} entries",
            path.display(),
            max_entries + dropped
        ));
    }

    Ok(JsonlRead { entries, warnings })
}

/// Find balanced top-level `{…}` spans, honoring strings and escapes.
/// Returns the spans and the count of non-whitespace bytes outside them.
fn scan_objects(text: &str) -> (Vec<&str>, usize) {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut garbage = 0usize;

    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        objects.push(&text[start..=i]);
                    }
                }
            }
            _ => {
                if depth == 0 && !b.is_ascii_whitespace() {
                    garbage += 1;
                }
            }
        }
    }

    (objects, garbage)
}

/// Bounded reverse read of a text log: the last `max_lines` lines, looking
/// at no more than the trailing 512 KB of the file.
pub fn read_tail_lines(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    const TAIL_WINDOW_BYTES: u64 = 512 * 1024;

    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if len > TAIL_WINDOW_BYTES {
        file.seek(SeekFrom::Start(len - TAIL_WINDOW_BYTES))
            .with_context(|| format!("failed to seek {}", path.display()))?;
    }
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&raw);

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    if len > TAIL_WINDOW_BYTES && !lines.is_empty() {
        lines.remove(0); // partial line at the window edge
    }
    if lines.len() > max_lines {
        lines.drain(..lines.len() - max_lines);
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
