//! Per-team shared context store.
//!
//! Markdown blobs under `context/<team>/`, replace-or-append semantics.
//! `lead-context.md` is the lead's exported conversation context; workers
//! spawned with full context inherit it in their prompt header.

use anyhow::{Context, Result};
use coord_core::CoordError;
use coord_store::StateStore;

use crate::team::Teams;

fn context_lock(team: &str) -> String {
    format!("context-{team}")
}

/// Write (or append to) a context key. Append mode prefixes a timestamped
/// header so the blob reads as a journal.
pub fn write_context(
    store: &StateStore,
    team_name: &str,
    key: &str,
    value: &str,
    append: bool,
) -> Result<()> {
    let team_name = coord_core::ident::normalize_team_name(team_name)?;
    coord_core::ident::validate_ident("key", key)?;

    let dir = store.context_dir(&team_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = store.context_file(&team_name, key);

    store.with_lock(&context_lock(&team_name), "coord_write_context", key, || {
        if append && path.exists() {
            let mut body = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            body.push_str(&format!("\n--- {} ---\n", coord_core::time::now_iso()));
            body.push_str(value);
            std::fs::write(&path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
        } else {
            std::fs::write(&path, value)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    })
}

/// Read one key, or every key concatenated with filename headers. With
/// `include_lead`, the lead's exported context is appended.
pub fn read_context(
    store: &StateStore,
    team_name: &str,
    key: Option<&str>,
    include_lead: bool,
) -> Result<String> {
    let team_name = coord_core::ident::normalize_team_name(team_name)?;

    if let Some(key) = key {
        coord_core::ident::validate_ident("key", key)?;
        let path = store.context_file(&team_name, key);
        return std::fs::read_to_string(&path).map_err(|_| {
            CoordError::dependency(format!("context key '{key}' not found in team '{team_name}'"))
                .into()
        });
    }

    let mut out = String::new();
    if let Ok(entries) = std::fs::read_dir(store.context_dir(&team_name)) {
        let mut paths: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "md")
                    && p.file_name().is_some_and(|n| n != "lead-context.md")
            })
            .collect();
        paths.sort();
        for path in paths {
            if let Ok(body) = std::fs::read_to_string(&path) {
                out.push_str(&format!(
                    "## {}\n{body}\n",
                    path.file_name().unwrap_or_default().to_string_lossy()
                ));
            }
        }
    }
    if include_lead {
        if let Ok(lead) = std::fs::read_to_string(store.lead_context_file(&team_name)) {
            out.push_str("## lead-context.md\n");
            out.push_str(&lead);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Export a lead session's summary as `lead-context.md` in the session's
/// team (or `default` when the session belongs to none).
pub fn export_context(store: &StateStore, session_id: &str, summary: &str) -> Result<String> {
    coord_core::ident::validate_ident("session", session_id)?;

    let teams = Teams::new(store.clone());
    let mut team_name = "default".to_string();
    for name in store.team_names() {
        if let Ok(Some(team)) = teams.load(&name) {
            let member = team.members.iter().any(|m| {
                m.session_id.as_deref() == Some(session_id) || m.name == session_id
            });
            if member {
                team_name = name;
                break;
            }
        }
    }

    let dir = store.context_dir(&team_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    store.with_lock(&context_lock(&team_name), "coord_export_context", "lead", || {
        std::fs::write(store.lead_context_file(&team_name), summary)
            .context("failed to write lead context")
    })?;
    Ok(team_name)
}
