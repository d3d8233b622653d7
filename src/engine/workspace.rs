use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use super::EngineError;

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    leaked: AtomicU64,
}

/// Snapshot of the workspace counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkspaceStats {
    pub acquired: u64,
    pub released: u64,
    pub leaked: u64,
}

impl WorkspaceStats {
    /// Workspaces that were handed out and are not gone yet
    pub fn live(&self) -> u64 {
        self.acquired
            .saturating_sub(self.released)
            .saturating_sub(self.leaked)
    }
}

/// Hands out one isolated directory per execution attempt
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    next_id: AtomicU64,
    counters: Arc<Counters>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: AtomicU64::new(0),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh directory under the root
    ///
    /// The name combines the process id, a per-manager counter and a random suffix, and
    /// the directory is created with `create_dir` so an existing path is never reused.
    pub async fn acquire(&self) -> Result<Workspace, EngineError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let serial = self.next_id.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("run-{}-{serial}-{}", std::process::id(), &suffix[..12]);
        let dir = self.root.join(&name);

        tokio::fs::create_dir(&dir).await?;
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        log::debug!("Acquired workspace {name}");

        Ok(Workspace {
            name,
            dir: Some(dir),
            counters: Some(self.counters.clone()),
        })
    }

    pub fn stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            leaked: self.counters.leaked.load(Ordering::Relaxed),
        }
    }
}

/// Scope of one execution attempt, removed when released or dropped
///
/// Release runs from `Drop`, so every exit path of the strategy holding the workspace
/// (early return, `?`, panic) cleans up. An in-memory workspace owns nothing on disk.
#[derive(Debug)]
pub struct Workspace {
    name: String,
    dir: Option<PathBuf>,
    counters: Option<Arc<Counters>>,
}

impl Workspace {
    /// Workspace for strategies that never touch the filesystem
    pub fn in_memory() -> Self {
        let name = format!("mem-{}", Uuid::new_v4().simple());
        Self {
            name,
            dir: None,
            counters: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory backing this workspace
    pub fn path(&self) -> Result<&Path, EngineError> {
        self.dir.as_deref().ok_or_else(|| {
            EngineError::Infrastructure(format!("workspace {} has no directory", self.name))
        })
    }

    /// Removes the directory; calling it again is a no-op
    ///
    /// A failed removal is logged and counted as leaked, never reported to the caller.
    pub fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        self.record(fs::remove_dir_all(&dir));
    }

    /// Like [`Workspace::release`], but removes the tree off the async executor
    pub async fn close(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        self.record(tokio::fs::remove_dir_all(&dir).await);
    }

    fn record(&self, outcome: io::Result<()>) {
        let Some(counters) = &self.counters else {
            return;
        };
        match outcome {
            Ok(()) => {
                counters.released.fetch_add(1, Ordering::Relaxed);
                log::debug!("Released workspace {}", self.name);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                counters.released.fetch_add(1, Ordering::Relaxed);
                log::debug!("Workspace {} was already gone", self.name);
            }
            Err(e) => {
                counters.leaked.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to remove workspace {}: {e}", self.name);
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}
