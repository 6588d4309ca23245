//! Workspace root resolution.
//!
//! Every component persists its state under a single workspace directory.
//! The root is injected here once; components never read environment
//! variables or the process working directory themselves.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Handle to the workspace root all persistent files live under.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolve from an explicit root, falling back to the process working
    /// directory when none is given.
    pub fn resolve(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        Ok(Self { root })
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path relative to the workspace root.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    pub fn knowledge_store_path(&self) -> PathBuf {
        self.root.join(".knowledge-store.json")
    }

    pub fn task_queue_path(&self) -> PathBuf {
        self.root.join(".task-queue.json")
    }

    pub fn boards_dir(&self) -> PathBuf {
        self.root.join(".agent-boards")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }
}
