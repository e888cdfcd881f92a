//! File-backed state store.
//!
//! Everything the coordinator knows lives under one root directory
//! (`STATE_ROOT`, default `${HOME}/.claude/terminals`) as JSON documents and
//! append-only JSONL streams. There is no in-process cache: every handler
//! re-reads what it needs, mutates under an exclusive lock, and returns.
//! Crash recovery is restart-and-re-read.

pub mod activity;
pub mod events;
pub mod gc;
pub mod json;
pub mod lock;
pub mod paths;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Environment variable overriding the state root.
pub const STATE_ROOT_ENV: &str = "STATE_ROOT";

/// Handle to the state root. Cheap to clone; owns no file handles.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Open (and lay out) a store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        store.ensure_layout()?;
        Ok(store)
    }

    /// Resolve the root from `STATE_ROOT`, falling back to
    /// `${HOME}/.claude/terminals`.
    pub fn from_env() -> Result<Self> {
        if let Ok(root) = std::env::var(STATE_ROOT_ENV) {
            if !root.is_empty() {
                return Self::open(root);
            }
        }
        let base = directories::BaseDirs::new().context("cannot determine home directory")?;
        Self::open(base.home_dir().join(".claude").join("terminals"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory layout with restrictive permissions.
    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.inbox_dir(),
            self.results_dir(),
            self.tasks_dir(),
            self.handoffs_dir(),
            self.teams_dir(),
            self.context_root(),
            self.locks_dir(),
        ] {
            create_private_dir(&dir)?;
        }
        Ok(())
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms)
            .with_context(|| format!("failed to restrict permissions: {}", dir.display()))?;
    }

    Ok(())
}
