//! Version map persisted in a redb database.
//!
//! A single `model_versions` table maps model key → version string. The
//! whole map is replaced in one write transaction on `save`, so a crash
//! mid-save leaves the previous map intact.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};

use super::{ModelVersionStore, ModelVersions};
use crate::error::{Result, UpgradeError};

const MODEL_VERSIONS: TableDefinition<&str, &str> = TableDefinition::new("model_versions");

fn store_err(e: impl std::fmt::Display) -> UpgradeError {
    UpgradeError::Store(e.to_string())
}

pub struct RedbVersionStore {
    path: PathBuf,
    db: Option<Database>,
}

impl RedbVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self) -> Result<&Database> {
        self.db
            .as_ref()
            .ok_or_else(|| UpgradeError::Store(format!("{} is not open", self.path.display())))
    }
}

impl ModelVersionStore for RedbVersionStore {
    /// Open or create the database and ensure the table exists.
    fn start(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&self.path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(MODEL_VERSIONS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        self.db = Some(db);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.db = None;
        Ok(())
    }

    fn load(&self) -> Result<ModelVersions> {
        let rt = self.db()?.begin_read().map_err(store_err)?;
        let table = rt.open_table(MODEL_VERSIONS).map_err(store_err)?;

        let mut versions = ModelVersions::new();
        for entry in table.iter().map_err(store_err)? {
            let (k, v) = entry.map_err(store_err)?;
            versions.insert(k.value().to_string(), v.value().to_string());
        }
        Ok(versions)
    }

    fn save(&self, versions: &ModelVersions) -> Result<()> {
        let wt = self.db()?.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(MODEL_VERSIONS).map_err(store_err)?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(store_err)? {
                let (k, _) = entry.map_err(store_err)?;
                if !versions.contains_key(k.value()) {
                    stale.push(k.value().to_string());
                }
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(store_err)?;
            }
            for (model, version) in versions {
                table
                    .insert(model.as_str(), version.as_str())
                    .map_err(store_err)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbVersionStore) {
        let dir = TempDir::new().unwrap();
        let mut store = RedbVersionStore::new(dir.path().join("versions.redb"));
        store.start().unwrap();
        (dir, store)
    }

    #[test]
    fn empty_db_loads_empty() {
        let (_dir, store) = open_tmp();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_replaces_whole_map() {
        let (_dir, store) = open_tmp();
        let mut first = ModelVersions::new();
        first.insert("config".into(), "1.1".into());
        first.insert("legacy".into(), "3.0".into());
        store.save(&first).unwrap();

        let mut second = ModelVersions::new();
        second.insert("config".into(), "1.2".into());
        store.save(&second).unwrap();

        assert_eq!(store.load().unwrap(), second);
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.redb");
        let mut versions = ModelVersions::new();
        versions.insert("search".into(), "2.0".into());
        {
            let mut store = RedbVersionStore::new(&path);
            store.start().unwrap();
            store.save(&versions).unwrap();
            store.stop().unwrap();
        }
        let mut store = RedbVersionStore::new(&path);
        store.start().unwrap();
        assert_eq!(store.load().unwrap(), versions);
    }

    #[test]
    fn load_before_start_is_store_error() {
        let dir = TempDir::new().unwrap();
        let store = RedbVersionStore::new(dir.path().join("versions.redb"));
        assert!(matches!(store.load(), Err(UpgradeError::Store(_))));
    }
}
