use super::{ModelVersionStore, ModelVersions};
use crate::error::{Result, UpgradeError};
use std::sync::{Arc, Mutex};

/// In-process store. Clones share the same map, so a caller can keep a
/// handle to inspect what an orchestrator persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryVersionStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    versions: ModelVersions,
    saves: usize,
    running: bool,
    fail_save: bool,
}

impl MemoryVersionStore {
    pub fn with_versions(versions: ModelVersions) -> Self {
        let store = Self::default();
        store.lock().versions = versions;
        store
    }

    /// Current persisted map.
    pub fn snapshot(&self) -> ModelVersions {
        self.lock().versions.clone()
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Make subsequent saves fail with a store error.
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_save = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ModelVersionStore for MemoryVersionStore {
    fn start(&mut self) -> Result<()> {
        self.lock().running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.lock().running = false;
        Ok(())
    }

    fn load(&self) -> Result<ModelVersions> {
        Ok(self.snapshot())
    }

    fn save(&self, versions: &ModelVersions) -> Result<()> {
        let mut state = self.lock();
        if state.fail_save {
            return Err(UpgradeError::Store("save rejected".into()));
        }
        state.versions = versions.clone();
        state.saves += 1;
        Ok(())
    }
}
