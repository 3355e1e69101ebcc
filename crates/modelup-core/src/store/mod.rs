//! Durable storage for the model version map.
//!
//! The orchestrator calls `start`, then `load` once, then `save` at most
//! once per run, then `stop`. The encoding on disk is each store's concern.

pub mod db;
pub mod file;
pub mod layered;
pub mod memory;

pub use db::RedbVersionStore;
pub use file::FileVersionStore;
pub use layered::LayeredVersionStore;
pub use memory::MemoryVersionStore;

use crate::error::Result;
use std::collections::BTreeMap;

/// Model key → version string.
pub type ModelVersions = BTreeMap<String, String>;

pub trait ModelVersionStore {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Fails with [`UpgradeError::Store`](crate::UpgradeError::Store) when the
    /// backing storage is unreadable or corrupt. A store with nothing
    /// persisted yet loads as an empty map.
    fn load(&self) -> Result<ModelVersions>;

    fn save(&self, versions: &ModelVersions) -> Result<()>;
}

impl<S: ModelVersionStore + ?Sized> ModelVersionStore for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn load(&self) -> Result<ModelVersions> {
        (**self).load()
    }

    fn save(&self, versions: &ModelVersions) -> Result<()> {
        (**self).save(versions)
    }
}
