pub mod config;
pub mod history;
pub mod init;
pub mod plan;
pub mod run;
pub mod status;

use anyhow::Context;
use modelup_core::config::Config;
use modelup_core::setup;
use modelup_core::store::{ModelVersionStore, ModelVersions};
use modelup_core::UpgradeManager;
use std::path::Path;

/// Config plus the manager built from it.
pub(crate) fn load_project(root: &Path) -> anyhow::Result<(Config, UpgradeManager)> {
    let config = Config::load(root).context("failed to load config")?;
    let manager =
        setup::build_manager(&config, root).context("invalid model or step in config")?;
    Ok((config, manager))
}

/// Read the persisted version map without creating any store files.
pub(crate) fn read_versions(
    config: &Config,
    root: &Path,
    manager: &UpgradeManager,
) -> anyhow::Result<ModelVersions> {
    if !setup::has_persisted_versions(config, root) {
        return Ok(ModelVersions::new());
    }
    let mut store = setup::open_store(config, root, manager.local_models());
    store.start().context("failed to open version store")?;
    let versions = store.load().context("failed to read versions");
    store.stop().context("failed to close version store")?;
    versions
}
