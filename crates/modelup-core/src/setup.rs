//! Wiring from `.modelup/config.yaml` to a ready-to-start [`UpgradeService`].

use crate::checkpoint::{DirectoryCheckpoint, NoopCheckpoint};
use crate::config::{Config, StoreKind, WarnLevel};
use crate::error::{Result, UpgradeError};
use crate::paths;
use crate::registry::{ModelSpec, UpgradeManager, UpgradeRegistry};
use crate::service::UpgradeService;
use crate::step::{CommandAction, UpgradeStep};
use crate::store::{FileVersionStore, LayeredVersionStore, ModelVersionStore, RedbVersionStore};
use crate::topology::StaticTopology;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

pub type ConfiguredService = UpgradeService<Box<dyn ModelVersionStore>, StaticTopology>;

/// Register every configured model and step.
///
/// Models with a `data_dir` get a [`DirectoryCheckpoint`] over it; the rest
/// get a [`NoopCheckpoint`]. Each step runs its command from `root`.
pub fn build_manager(config: &Config, root: &Path) -> Result<UpgradeManager> {
    let mut registry = UpgradeRegistry::new();

    for model in &config.models {
        let mut spec = if model.local {
            ModelSpec::local(&model.key)
        } else {
            ModelSpec::shared(&model.key)
        };
        for dep in &model.depends_on {
            spec = spec.depends_on(dep);
        }
        registry.register_model(spec)?;

        match &model.data_dir {
            Some(dir) => {
                let dir = root.join(dir);
                registry.register_checkpoint(&model.key, move || DirectoryCheckpoint::new(&dir))?;
            }
            None => {
                registry.register_checkpoint(&model.key, || NoopCheckpoint)?;
            }
        }
    }

    for step in &config.steps {
        let action = CommandAction {
            command: step.command.clone(),
            cwd: root.to_path_buf(),
            model: step.model.clone(),
            from: step.from.clone(),
            to: step.to.clone(),
        };
        registry.register_step(UpgradeStep::with_action(
            &step.model,
            &step.from,
            &step.to,
            Arc::new(action),
        ))?;
    }

    registry.build()
}

/// The configured store. With `split_local`, local models live in
/// `.modelup/local-versions.yaml` and everything else in the main store.
pub fn open_store(
    config: &Config,
    root: &Path,
    local_models: BTreeSet<String>,
) -> Box<dyn ModelVersionStore> {
    let path = config.store.resolved_path(root);
    let shared: Box<dyn ModelVersionStore> = match config.store.kind {
        StoreKind::File => Box::new(FileVersionStore::new(path)),
        StoreKind::Redb => Box::new(RedbVersionStore::new(path)),
    };
    if config.store.split_local && !local_models.is_empty() {
        let local = FileVersionStore::new(paths::local_versions_path(root));
        Box::new(LayeredVersionStore::new(local, shared, local_models))
    } else {
        shared
    }
}

/// Whether a version map was ever written for this root. Only the main
/// store counts: a split save always writes it last.
pub fn has_persisted_versions(config: &Config, root: &Path) -> bool {
    config.store.resolved_path(root).exists()
}

/// Topology facts for this node. Must be computed before the store starts,
/// since starting a redb store creates its file.
pub fn topology(config: &Config, root: &Path) -> StaticTopology {
    let fresh_node = config
        .topology
        .fresh_node
        .resolve(has_persisted_versions(config, root));
    let clustered = config.topology.clustered;
    // Unset on a clustered node: assume other members already hold state.
    let fresh_cluster = config
        .topology
        .fresh_cluster
        .unwrap_or(fresh_node && !clustered);
    StaticTopology {
        fresh_node,
        clustered,
        fresh_cluster,
    }
}

/// Refuses configs that [`Config::validate`] reports errors for.
pub fn service(config: &Config, root: &Path) -> Result<ConfiguredService> {
    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        return Err(UpgradeError::InvalidConfig(errors.join("; ")));
    }

    let manager = build_manager(config, root)?;
    let topology = topology(config, root);
    let store = open_store(config, root, manager.local_models());
    Ok(UpgradeService::new(manager, store, topology))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
