use super::{ModelVersionStore, ModelVersions};
use crate::error::Result;
use std::collections::BTreeSet;

/// Splits the version map between a node-local store and a shared one.
///
/// Keys in `local_models` are read from and written to `local`; everything
/// else goes to `shared`. On load, a local entry wins over a shared entry
/// with the same key.
pub struct LayeredVersionStore<L, S> {
    local: L,
    shared: S,
    local_models: BTreeSet<String>,
}

impl<L: ModelVersionStore, S: ModelVersionStore> LayeredVersionStore<L, S> {
    pub fn new(local: L, shared: S, local_models: BTreeSet<String>) -> Self {
        Self {
            local,
            shared,
            local_models,
        }
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn shared(&self) -> &S {
        &self.shared
    }
}

impl<L: ModelVersionStore, S: ModelVersionStore> ModelVersionStore for LayeredVersionStore<L, S> {
    fn start(&mut self) -> Result<()> {
        self.local.start()?;
        self.shared.start()
    }

    /// Stops both stores even if the first one fails.
    fn stop(&mut self) -> Result<()> {
        let local = self.local.stop();
        let shared = self.shared.stop();
        local.and(shared)
    }

    fn load(&self) -> Result<ModelVersions> {
        let mut versions: ModelVersions = self
            .shared
            .load()?
            .into_iter()
            .filter(|(k, _)| !self.local_models.contains(k))
            .collect();
        for (model, version) in self.local.load()? {
            if self.local_models.contains(&model) {
                versions.insert(model, version);
            }
        }
        Ok(versions)
    }

    /// Saves the local map, then the shared one. If the shared save fails,
    /// the local store is put back to what it held before.
    fn save(&self, versions: &ModelVersions) -> Result<()> {
        let (local, shared): (ModelVersions, ModelVersions) = versions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| self.local_models.contains(k));

        let previous_local = self.local.load()?;
        self.local.save(&local)?;
        if let Err(e) = self.shared.save(&shared) {
            if let Err(restore) = self.local.save(&previous_local) {
                tracing::warn!(error = %restore, "failed to restore local versions");
            }
            return Err(e);
        }
        Ok(())
    }
}
