use super::{ModelVersionStore, ModelVersions};
use crate::error::{Result, UpgradeError};
use crate::io;
use std::path::{Path, PathBuf};

/// Version map kept as a flat YAML mapping, rewritten atomically on save.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl ModelVersionStore for FileVersionStore {
    fn start(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            io::ensure_dir(parent)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<ModelVersions> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ModelVersions::new()),
            Err(e) => {
                return Err(UpgradeError::Store(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if data.trim().is_empty() {
            return Ok(ModelVersions::new());
        }
        serde_yaml::from_str(&data).map_err(|e| {
            UpgradeError::Store(format!("corrupt version file {}: {e}", self.path.display()))
        })
    }

    fn save(&self, versions: &ModelVersions) -> Result<()> {
        let data = serde_yaml::to_string(versions)?;
        io::atomic_write(&self.path, data.as_bytes()).map_err(|e| {
            UpgradeError::Store(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}
