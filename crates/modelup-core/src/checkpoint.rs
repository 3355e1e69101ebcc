//! Per-model checkpoints bracketing the upgrade steps of one run.
//!
//! Lifecycle: `begin → commit → end` on success, `begin → rollback` on any
//! failure in the run. Only `begin` and `commit` failures are fatal.

use crate::error::Result;
use crate::io;
use crate::paths;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait Checkpoint: Send {
    /// Capture enough state to undo this run's steps. `from_version` is the
    /// model's version before the run started.
    fn begin(&mut self, from_version: &str) -> anyhow::Result<()>;

    fn commit(&mut self) -> anyhow::Result<()>;

    fn rollback(&mut self) -> anyhow::Result<()>;

    /// Release whatever `begin` held on to.
    fn end(&mut self) -> anyhow::Result<()>;
}

/// Creates a fresh checkpoint for each run that touches its model.
pub type CheckpointFactory = Arc<dyn Fn() -> Box<dyn Checkpoint> + Send + Sync>;

// ---------------------------------------------------------------------------
// PreparedCheckpoint
// ---------------------------------------------------------------------------

/// A checkpoint instance tagged with the model it protects.
pub struct PreparedCheckpoint {
    model: String,
    inner: Box<dyn Checkpoint>,
}

impl PreparedCheckpoint {
    pub fn new(model: impl Into<String>, inner: Box<dyn Checkpoint>) -> Self {
        Self {
            model: model.into(),
            inner,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn begin(&mut self, from_version: &str) -> anyhow::Result<()> {
        self.inner.begin(from_version)
    }

    pub fn commit(&mut self) -> anyhow::Result<()> {
        self.inner.commit()
    }

    pub fn rollback(&mut self) -> anyhow::Result<()> {
        self.inner.rollback()
    }

    pub fn end(&mut self) -> anyhow::Result<()> {
        self.inner.end()
    }
}

impl fmt::Debug for PreparedCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCheckpoint")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// NoopCheckpoint
// ---------------------------------------------------------------------------

/// For models with nothing on disk to protect.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheckpoint;

impl Checkpoint for NoopCheckpoint {
    fn begin(&mut self, _from_version: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DirectoryCheckpoint
// ---------------------------------------------------------------------------

/// Snapshots a model's data directory before its steps run.
///
/// `begin` copies the directory to a sibling `<dir>.upgrade-backup`,
/// `rollback` swaps the backup back into place and `end` deletes it. A
/// stale backup left by a crashed run is refused by `begin` rather than
/// overwritten, since it may be the only good copy.
#[derive(Debug, Clone)]
pub struct DirectoryCheckpoint {
    data_dir: PathBuf,
    backup_dir: PathBuf,
    begun: bool,
}

impl DirectoryCheckpoint {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let backup_dir = paths::backup_path(&data_dir);
        Self {
            data_dir,
            backup_dir,
            begun: false,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn snapshot(&self) -> Result<()> {
        if self.data_dir.exists() {
            io::copy_dir(&self.data_dir, &self.backup_dir)
        } else {
            // Nothing to copy; an empty backup restores to "absent".
            io::ensure_dir(&self.backup_dir)?;
            std::fs::write(self.backup_dir.join(ABSENT_MARKER), b"")?;
            Ok(())
        }
    }

    fn restore(&self) -> Result<()> {
        io::remove_dir_if_exists(&self.data_dir)?;
        if self.backup_dir.join(ABSENT_MARKER).exists() {
            return io::remove_dir_if_exists(&self.backup_dir);
        }
        std::fs::rename(&self.backup_dir, &self.data_dir)?;
        Ok(())
    }
}

const ABSENT_MARKER: &str = ".absent";

impl Checkpoint for DirectoryCheckpoint {
    fn begin(&mut self, from_version: &str) -> anyhow::Result<()> {
        if self.backup_dir.exists() {
            anyhow::bail!(
                "stale backup found at {}; restore or remove it before upgrading",
                self.backup_dir.display()
            );
        }
        tracing::debug!(
            data_dir = %self.data_dir.display(),
            from_version,
            "backing up model data"
        );
        if let Err(e) = self.snapshot() {
            // A partial backup is not a good copy; leave nothing behind.
            if let Err(cleanup) = io::remove_dir_if_exists(&self.backup_dir) {
                tracing::warn!(
                    backup_dir = %self.backup_dir.display(),
                    error = %cleanup,
                    "failed to remove partial backup"
                );
            }
            return Err(e.into());
        }
        self.begun = true;
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> anyhow::Result<()> {
        if !self.begun {
            return Ok(());
        }
        self.restore()?;
        self.begun = false;
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        io::remove_dir_if_exists(&self.backup_dir)?;
        self.begun = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
