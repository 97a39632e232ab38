//! Isolated working copies for execution attempts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::DiffSnapshot;
use crate::io::git::Git;

/// Lifecycle of the disposable checkouts each attempt runs in.
pub trait Workspace {
    /// Fresh checkout of `commit` keyed by `key`; stale copies are replaced.
    fn create(&self, key: &str, commit: &str) -> Result<PathBuf>;
    /// Everything changed in the copy, including untracked files.
    fn snapshot(&self, path: &Path) -> Result<DiffSnapshot>;
    fn remove(&self, path: &Path) -> Result<()>;
}

/// Git worktrees of the shared base clone under `<workdir>/runs/`.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    base: Git,
    runs_dir: PathBuf,
}

impl GitWorkspace {
    pub fn new(base: Git, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            base,
            runs_dir: runs_dir.into(),
        }
    }
}

impl Workspace for GitWorkspace {
    #[instrument(skip_all, fields(key, commit))]
    fn create(&self, key: &str, commit: &str) -> Result<PathBuf> {
        let path = self.runs_dir.join(key);
        self.base
            .add_worktree(&path, commit)
            .with_context(|| format!("create worktree {}", path.display()))?;
        debug!(path = %path.display(), "created worktree");
        Ok(path)
    }

    fn snapshot(&self, path: &Path) -> Result<DiffSnapshot> {
        Git::new(path).snapshot_worktree()
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.base
            .remove_worktree(path)
            .with_context(|| format!("remove worktree {}", path.display()))
    }
}
