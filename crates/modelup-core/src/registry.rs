//! Registration of models, upgrade steps and checkpoints, and plan computation.
//!
//! [`UpgradeRegistry`] collects declarations and validates them as they
//! arrive; [`UpgradeRegistry::build`] freezes it into an [`UpgradeManager`],
//! which is read-only for the rest of the process.

use crate::checkpoint::{Checkpoint, CheckpointFactory, PreparedCheckpoint};
use crate::error::{Result, UpgradeError};
use crate::paths;
use crate::step::UpgradeStep;
use crate::store::ModelVersions;
use crate::version::{compare_versions, same_version, validate_version, DEFAULT_VERSION};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ModelSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub key: String,
    /// Data lives on each node rather than in cluster-shared storage.
    pub local: bool,
    /// Models whose upgrades must be planned before this one's.
    pub depends_on: Vec<String>,
}

impl ModelSpec {
    pub fn shared(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            local: false,
            depends_on: Vec::new(),
        }
    }

    pub fn local(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            local: true,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, model: impl Into<String>) -> Self {
        self.depends_on.push(model.into());
        self
    }
}

struct ModelEntry {
    spec: ModelSpec,
    /// Looked up by `from` version; registration order is irrelevant.
    steps: Vec<UpgradeStep>,
    checkpoint: Option<CheckpointFactory>,
}

impl ModelEntry {
    fn step_from(&self, version: &str) -> Option<&UpgradeStep> {
        self.steps.iter().find(|s| same_version(s.from(), version))
    }

    fn latest(&self) -> Option<&str> {
        self.steps
            .iter()
            .map(UpgradeStep::to)
            .max_by(|a, b| compare_versions(a, b))
    }
}

// ---------------------------------------------------------------------------
// UpgradeRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct UpgradeRegistry {
    models: Vec<ModelEntry>,
}

impl UpgradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model(&mut self, spec: ModelSpec) -> Result<&mut Self> {
        paths::validate_model_key(&spec.key)?;
        if self.entry(&spec.key).is_some() {
            return Err(UpgradeError::DuplicateModel(spec.key));
        }
        self.models.push(ModelEntry {
            spec,
            steps: Vec::new(),
            checkpoint: None,
        });
        Ok(self)
    }

    pub fn register_step(&mut self, step: UpgradeStep) -> Result<&mut Self> {
        validate_version(step.from())?;
        validate_version(step.to())?;
        if compare_versions(step.from(), step.to()) != Ordering::Less {
            return Err(UpgradeError::NonIncreasingStep {
                model: step.model().to_string(),
                from: step.from().to_string(),
                to: step.to().to_string(),
            });
        }
        let entry = self
            .entry_mut(step.model())
            .ok_or_else(|| UpgradeError::UnknownModel(step.model().to_string()))?;
        if entry.step_from(step.from()).is_some() {
            return Err(UpgradeError::DuplicateStep {
                model: step.model().to_string(),
                from: step.from().to_string(),
            });
        }
        entry.steps.push(step);
        Ok(self)
    }

    pub fn register_checkpoint<F, C>(&mut self, model: &str, factory: F) -> Result<&mut Self>
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: Checkpoint + 'static,
    {
        let factory: CheckpointFactory =
            Arc::new(move || Box::new(factory()) as Box<dyn Checkpoint>);
        self.register_checkpoint_factory(model, factory)
    }

    pub fn register_checkpoint_factory(
        &mut self,
        model: &str,
        factory: CheckpointFactory,
    ) -> Result<&mut Self> {
        let entry = self
            .entry_mut(model)
            .ok_or_else(|| UpgradeError::UnknownModel(model.to_string()))?;
        entry.checkpoint = Some(factory);
        Ok(self)
    }

    /// Validate dependencies and freeze into a manager with a fixed model order.
    pub fn build(self) -> Result<UpgradeManager> {
        let known: HashSet<&str> = self.models.iter().map(|m| m.spec.key.as_str()).collect();
        for entry in &self.models {
            for dep in &entry.spec.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(UpgradeError::UnknownModel(dep.clone()));
                }
            }
        }

        let order = dependency_order(&self.models)?;
        let mut slots: Vec<Option<ModelEntry>> = self.models.into_iter().map(Some).collect();
        let models = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();
        Ok(UpgradeManager { models })
    }

    fn entry(&self, key: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.spec.key == key)
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut ModelEntry> {
        self.models.iter_mut().find(|m| m.spec.key == key)
    }
}

/// Stable topological order: repeatedly take the earliest-declared model
/// whose dependencies are all placed.
fn dependency_order(models: &[ModelEntry]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = models
        .iter()
        .enumerate()
        .map(|(i, m)| (m.spec.key.as_str(), i))
        .collect();

    let mut placed = vec![false; models.len()];
    let mut order = Vec::with_capacity(models.len());
    while order.len() < models.len() {
        let next = (0..models.len()).find(|&i| {
            !placed[i]
                && models[i]
                    .spec
                    .depends_on
                    .iter()
                    .all(|dep| index.get(dep.as_str()).is_some_and(|&d| placed[d]))
        });
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let stuck: Vec<&str> = (0..models.len())
                    .filter(|&i| !placed[i])
                    .map(|i| models[i].spec.key.as_str())
                    .collect();
                return Err(UpgradeError::DependencyCycle(stuck.join(", ")));
            }
        }
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// UpgradeManager
// ---------------------------------------------------------------------------

pub struct UpgradeManager {
    models: Vec<ModelEntry>,
}

impl UpgradeManager {
    /// Steps needed to bring every known model to its latest version.
    ///
    /// Models absent from `current` start at [`DEFAULT_VERSION`]. A model
    /// whose chain cannot reach its latest version is a planning error.
    pub fn plan(&self, current: &ModelVersions) -> Result<Vec<UpgradeStep>> {
        let mut plan = Vec::new();
        for entry in &self.models {
            let Some(latest) = entry.latest() else {
                continue;
            };
            let model = entry.spec.key.as_str();
            let start = current
                .get(model)
                .map(String::as_str)
                .unwrap_or(DEFAULT_VERSION);

            let mut version = start;
            while let Some(step) = entry.step_from(version) {
                plan.push(step.clone());
                version = step.to();
            }

            match compare_versions(version, latest) {
                Ordering::Equal => {}
                Ordering::Less => {
                    return Err(UpgradeError::Planning {
                        model: model.to_string(),
                        detail: format!("no upgrade from version {version} towards {latest}"),
                    });
                }
                Ordering::Greater => {
                    return Err(UpgradeError::Planning {
                        model: model.to_string(),
                        detail: format!(
                            "version {version} is newer than the latest supported {latest}"
                        ),
                    });
                }
            }
            if version != start {
                tracing::debug!(model, from = start, to = version, "planned upgrade");
            }
        }
        Ok(plan)
    }

    /// One checkpoint per distinct model in `plan`, in first-occurrence order.
    pub fn prepare(&self, plan: &[UpgradeStep]) -> Result<Vec<PreparedCheckpoint>> {
        let mut seen = HashSet::new();
        let mut checkpoints = Vec::new();
        for step in plan {
            let model = step.model();
            if !seen.insert(model) {
                continue;
            }
            let factory = self
                .entry(model)
                .and_then(|e| e.checkpoint.as_ref())
                .ok_or_else(|| UpgradeError::MissingCheckpoint(model.to_string()))?;
            checkpoints.push(PreparedCheckpoint::new(model, factory()));
        }
        Ok(checkpoints)
    }

    pub fn local_models(&self) -> BTreeSet<String> {
        self.models
            .iter()
            .filter(|m| m.spec.local)
            .map(|m| m.spec.key.clone())
            .collect()
    }

    /// Models in plan order.
    pub fn models(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter().map(|m| &m.spec)
    }

    pub fn model(&self, key: &str) -> Option<&ModelSpec> {
        self.entry(key).map(|e| &e.spec)
    }

    /// Highest `to` version registered for `model`, if it has any steps.
    pub fn latest_version(&self, model: &str) -> Option<&str> {
        self.entry(model).and_then(ModelEntry::latest)
    }

    fn entry(&self, key: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.spec.key == key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::NoopCheckpoint;

    fn step(model: &str, from: &str, to: &str) -> UpgradeStep {
        UpgradeStep::new(model, from, to, || Ok(()))
    }

    fn versions(pairs: &[(&str, &str)]) -> ModelVersions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn records(plan: &[UpgradeStep]) -> Vec<String> {
        plan.iter().map(ToString::to_string).collect()
    }

    fn sample() -> UpgradeManager {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("config")).unwrap();
        reg.register_model(ModelSpec::local("search")).unwrap();
        // Registered out of order on purpose; the chain is walked by version.
        reg.register_step(step("config", "1.1", "1.2")).unwrap();
        reg.register_step(step("config", "1.0", "1.1")).unwrap();
        reg.register_step(step("search", "1.0", "2.0")).unwrap();
        reg.register_checkpoint("config", || NoopCheckpoint).unwrap();
        reg.register_checkpoint("search", || NoopCheckpoint).unwrap();
        reg.build().unwrap()
    }

    #[test]
    fn plan_walks_chain_from_default_version() {
        let mgr = sample();
        let plan = mgr.plan(&ModelVersions::new()).unwrap();
        assert_eq!(
            records(&plan),
            vec![
                "config from 1.0 to 1.1",
                "config from 1.1 to 1.2",
                "search from 1.0 to 2.0",
            ]
        );
    }

    #[test]
    fn plan_starts_from_current_version() {
        let mgr = sample();
        let plan = mgr.plan(&versions(&[("config", "1.1")])).unwrap();
        assert_eq!(
            records(&plan),
            vec!["config from 1.1 to 1.2", "search from 1.0 to 2.0"]
        );
    }

    #[test]
    fn plan_matches_equivalent_version_spelling() {
        let mgr = sample();
        let plan = mgr.plan(&versions(&[("config", "1.1.0")])).unwrap();
        assert_eq!(plan[0].to_string(), "config from 1.1 to 1.2");
    }

    #[test]
    fn plan_converges_to_empty() {
        let mgr = sample();
        let mut current = versions(&[("config", "1.1")]);
        for s in mgr.plan(&current).unwrap() {
            current.insert(s.model().to_string(), s.to().to_string());
        }
        assert!(mgr.plan(&current).unwrap().is_empty());
    }

    #[test]
    fn plan_fails_on_broken_chain() {
        let mgr = sample();
        let err = mgr.plan(&versions(&[("config", "1.0.5")])).unwrap_err();
        assert!(err.is_planning());
        assert_eq!(err.model(), Some("config"));
    }

    #[test]
    fn plan_fails_on_gap_in_middle_of_chain() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("config")).unwrap();
        reg.register_step(step("config", "1.0", "1.1")).unwrap();
        reg.register_step(step("config", "1.2", "1.3")).unwrap();
        let mgr = reg.build().unwrap();

        let err = mgr.plan(&versions(&[])).unwrap_err();
        assert!(err.is_planning());
        assert_eq!(err.model(), Some("config"));
        assert!(err.to_string().contains("no upgrade from version 1.1"), "err: {err}");

        // Past the gap, the rest of the chain still plans.
        let plan = mgr.plan(&versions(&[("config", "1.2")])).unwrap();
        assert_eq!(records(&plan), ["config from 1.2 to 1.3"]);
    }

    #[test]
    fn plan_fails_when_version_is_newer_than_software() {
        let mgr = sample();
        let err = mgr.plan(&versions(&[("search", "3.0")])).unwrap_err();
        assert!(err.to_string().contains("newer"), "err: {err}");
    }

    #[test]
    fn plan_ignores_unknown_models_and_models_without_steps() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("static")).unwrap();
        let mgr = reg.build().unwrap();
        let plan = mgr.plan(&versions(&[("static", "9.9"), ("gone", "1.0")])).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn dependencies_reorder_models_stably() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("a").depends_on("c")).unwrap();
        reg.register_model(ModelSpec::shared("b")).unwrap();
        reg.register_model(ModelSpec::shared("c")).unwrap();
        for m in ["a", "b", "c"] {
            reg.register_step(step(m, "1.0", "1.1")).unwrap();
        }
        let mgr = reg.build().unwrap();
        let order: Vec<&str> = mgr.models().map(|m| m.key.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);

        let plan = mgr.plan(&ModelVersions::new()).unwrap();
        let models: Vec<&str> = plan.iter().map(UpgradeStep::model).collect();
        assert_eq!(models, vec!["b", "c", "a"]);
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("a").depends_on("b")).unwrap();
        reg.register_model(ModelSpec::shared("b").depends_on("a")).unwrap();
        assert!(matches!(reg.build(), Err(UpgradeError::DependencyCycle(_))));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("a").depends_on("nope")).unwrap();
        assert!(matches!(reg.build(), Err(UpgradeError::UnknownModel(m)) if m == "nope"));
    }

    #[test]
    fn registration_errors() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("config")).unwrap();

        assert!(matches!(
            reg.register_model(ModelSpec::shared("config")),
            Err(UpgradeError::DuplicateModel(_))
        ));
        assert!(matches!(
            reg.register_model(ModelSpec::shared("Bad Key")),
            Err(UpgradeError::InvalidModelKey(_))
        ));
        assert!(matches!(
            reg.register_step(step("other", "1.0", "1.1")),
            Err(UpgradeError::UnknownModel(_))
        ));
        assert!(matches!(
            reg.register_step(step("config", "1.1", "1.0")),
            Err(UpgradeError::NonIncreasingStep { .. })
        ));
        assert!(matches!(
            reg.register_step(step("config", "1..0", "1.1")),
            Err(UpgradeError::InvalidVersion(_))
        ));

        reg.register_step(step("config", "1.0", "1.1")).unwrap();
        assert!(matches!(
            reg.register_step(step("config", "1.0.0", "1.5")),
            Err(UpgradeError::DuplicateStep { .. })
        ));
        assert!(reg.register_checkpoint("other", || NoopCheckpoint).is_err());
    }

    #[test]
    fn prepare_dedups_in_first_occurrence_order() {
        let mgr = sample();
        let plan = mgr.plan(&ModelVersions::new()).unwrap();
        let checkpoints = mgr.prepare(&plan).unwrap();
        let models: Vec<&str> = checkpoints.iter().map(PreparedCheckpoint::model).collect();
        assert_eq!(models, vec!["config", "search"]);
    }

    #[test]
    fn prepare_requires_checkpoint_for_every_planned_model() {
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("config")).unwrap();
        reg.register_step(step("config", "1.0", "1.1")).unwrap();
        let mgr = reg.build().unwrap();
        let plan = mgr.plan(&ModelVersions::new()).unwrap();
        assert!(matches!(
            mgr.prepare(&plan),
            Err(UpgradeError::MissingCheckpoint(m)) if m == "config"
        ));
    }

    #[test]
    fn metadata_lookups() {
        let mgr = sample();
        assert_eq!(mgr.latest_version("config"), Some("1.2"));
        assert_eq!(mgr.latest_version("missing"), None);
        assert!(mgr.model("search").unwrap().local);
        assert_eq!(
            mgr.local_models().into_iter().collect::<Vec<_>>(),
            vec!["search".to_string()]
        );
    }
}
