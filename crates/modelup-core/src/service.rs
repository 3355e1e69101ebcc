//! The upgrade orchestrator.
//!
//! On `start`, versions are loaded, a plan is computed, and then either an
//! inventory is taken (fresh node) or the plan is applied under
//! checkpoints. The resulting map is saved only if the whole run succeeds.
//!
//! ```text
//! Idle → Loaded → Planned ─┬─ InventoryDone ─┬─ Persisted
//!                          └─ Upgrading ─────┘
//! Upgrading: Beginning → Applying → Committing → Ending
//!            any failure before Ending → RollingBack → Failed
//! ```

use crate::checkpoint::PreparedCheckpoint;
use crate::error::{Result, UpgradeError};
use crate::registry::UpgradeManager;
use crate::step::{StepRecord, UpgradeStep};
use crate::store::{ModelVersionStore, ModelVersions};
use crate::topology::NodeTopology;
use crate::version::DEFAULT_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    Beginning,
    Applying,
    Committing,
    Ending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loaded,
    Planned,
    InventoryDone,
    Upgrading(UpgradePhase),
    RollingBack,
    Failed,
    Persisted,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Loaded => f.write_str("loaded"),
            RunState::Planned => f.write_str("planned"),
            RunState::InventoryDone => f.write_str("inventory_done"),
            RunState::Upgrading(phase) => write!(f, "upgrading ({phase:?})"),
            RunState::RollingBack => f.write_str("rolling_back"),
            RunState::Failed => f.write_str("failed"),
            RunState::Persisted => f.write_str("persisted"),
            RunState::Stopped => f.write_str("stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every model was already at its latest version; nothing was saved.
    UpToDate,
    /// Fresh node: target versions recorded without running any step.
    Inventoried { models: Vec<String> },
    /// Steps applied and committed, in order.
    Upgraded { steps: Vec<StepRecord> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Version map as of the end of the run.
    pub versions: ModelVersions,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `end` failures after a successful commit. They do not fail the run.
    #[serde(default)]
    pub cleanup_failures: usize,
}

// ---------------------------------------------------------------------------
// UpgradeRun
// ---------------------------------------------------------------------------

/// Mutable state of one orchestration run.
struct UpgradeRun {
    /// Versions as loaded; checkpoints begin from these.
    original: ModelVersions,
    /// Advanced as steps succeed.
    versions: ModelVersions,
}

impl UpgradeRun {
    fn new(loaded: ModelVersions) -> Self {
        Self {
            original: loaded.clone(),
            versions: loaded,
        }
    }

    fn original_version(&self, model: &str) -> &str {
        self.original
            .get(model)
            .map(String::as_str)
            .unwrap_or(DEFAULT_VERSION)
    }
}

// ---------------------------------------------------------------------------
// UpgradeService
// ---------------------------------------------------------------------------

pub struct UpgradeService<S, T> {
    manager: UpgradeManager,
    store: S,
    topology: T,
    state: RunState,
    run_id: Option<Uuid>,
}

impl<S: ModelVersionStore, T: NodeTopology> UpgradeService<S, T> {
    pub fn new(manager: UpgradeManager, store: S, topology: T) -> Self {
        Self {
            manager,
            store,
            topology,
            state: RunState::Idle,
            run_id: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Id of the most recent `start`, whether it succeeded or not.
    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn manager(&self) -> &UpgradeManager {
        &self.manager
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bring every model up to date, or fail with the original error after
    /// rolling back.
    pub fn start(&mut self) -> Result<UpgradeReport> {
        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        let span = tracing::info_span!("upgrade", %run_id);
        let _guard = span.enter();

        let started_at = Utc::now();
        match self.run() {
            Ok((outcome, versions, cleanup_failures)) => Ok(UpgradeReport {
                run_id,
                outcome,
                versions,
                started_at,
                finished_at: Utc::now(),
                cleanup_failures,
            }),
            Err(e) => {
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    /// Stop the store, whatever the outcome of `start`.
    pub fn stop(&mut self) -> Result<()> {
        self.state = RunState::Stopped;
        self.store.stop()
    }

    fn run(&mut self) -> Result<(RunOutcome, ModelVersions, usize)> {
        self.store.start()?;
        let loaded = self.store.load()?;
        self.state = RunState::Loaded;

        let plan = self.manager.plan(&loaded)?;
        self.state = RunState::Planned;
        if plan.is_empty() {
            info!("all models are up to date");
            return Ok((RunOutcome::UpToDate, loaded, 0));
        }

        let mut run = UpgradeRun::new(loaded);
        let (outcome, cleanup_failures) = if self.topology.is_fresh_node() {
            let models = self.inventory(&mut run, &plan);
            self.state = RunState::InventoryDone;
            (RunOutcome::Inventoried { models }, 0)
        } else {
            let cleanup_failures = self.upgrade(&mut run, &plan)?;
            let steps = plan.iter().map(UpgradeStep::record).collect();
            (RunOutcome::Upgraded { steps }, cleanup_failures)
        };

        self.store.save(&run.versions)?;
        self.state = RunState::Persisted;
        Ok((outcome, run.versions, cleanup_failures))
    }

    /// Record target versions for a first-time install without running steps.
    fn inventory(&self, run: &mut UpgradeRun, plan: &[UpgradeStep]) -> Vec<String> {
        // A node joining a cluster that already took inventory only records
        // its own local models.
        let local_only = (self.topology.is_clustered() && !self.topology.is_fresh_cluster())
            .then(|| self.manager.local_models());
        if local_only.is_some() {
            info!("joining existing cluster, taking inventory of local models only");
        }

        let mut recorded: Vec<String> = Vec::new();
        for step in plan {
            if let Some(local) = &local_only {
                if !local.contains(step.model()) {
                    continue;
                }
            }
            run.versions
                .insert(step.model().to_string(), step.to().to_string());
            if !recorded.iter().any(|m| m == step.model()) {
                recorded.push(step.model().to_string());
            }
        }
        info!(models = ?recorded, "inventory taken");
        recorded
    }

    /// Apply `plan` under checkpoints. Returns the number of `end` failures.
    fn upgrade(&mut self, run: &mut UpgradeRun, plan: &[UpgradeStep]) -> Result<usize> {
        let mut checkpoints = self.manager.prepare(plan)?;
        let mut begun = 0;

        if let Err(e) = self.drive(run, plan, &mut checkpoints, &mut begun) {
            self.state = RunState::RollingBack;
            warn!("{}", banner("Rollback upgrade"));
            rollback_all(&mut checkpoints[..begun]);
            warn!("{}", banner("Upgrade failed"));
            return Err(e);
        }

        self.state = RunState::Upgrading(UpgradePhase::Ending);
        let failures = end_all(&mut checkpoints);
        info!("{}", banner("Upgrade complete"));
        Ok(failures)
    }

    /// Begin, apply and commit. Any error leaves `begun` at the number of
    /// checkpoints that need rolling back.
    fn drive(
        &mut self,
        run: &mut UpgradeRun,
        plan: &[UpgradeStep],
        checkpoints: &mut [PreparedCheckpoint],
        begun: &mut usize,
    ) -> Result<()> {
        self.state = RunState::Upgrading(UpgradePhase::Beginning);
        info!("{}", banner("Begin upgrade"));
        for checkpoint in checkpoints.iter_mut() {
            let model = checkpoint.model().to_string();
            let from = run.original_version(&model);
            info!(model = %model, from, "checkpoint");
            if let Err(source) = checkpoint.begin(from) {
                warn!(model = %model, error = %format!("{source:#}"), "problem checkpointing");
                return Err(UpgradeError::Begin { model, source });
            }
            *begun += 1;
        }

        self.state = RunState::Upgrading(UpgradePhase::Applying);
        info!("{}", banner("Apply upgrade"));
        for step in plan {
            info!(model = step.model(), from = step.from(), to = step.to(), "upgrade");
            if let Err(source) = step.apply() {
                warn!(step = %step, error = %format!("{source:#}"), "problem upgrading");
                return Err(UpgradeError::Apply {
                    model: step.model().to_string(),
                    from: step.from().to_string(),
                    to: step.to().to_string(),
                    source,
                });
            }
            run.versions
                .insert(step.model().to_string(), step.to().to_string());
        }

        self.state = RunState::Upgrading(UpgradePhase::Committing);
        info!("{}", banner("Commit upgrade"));
        for checkpoint in checkpoints.iter_mut() {
            info!(model = checkpoint.model(), "commit");
            if let Err(source) = checkpoint.commit() {
                let model = checkpoint.model().to_string();
                warn!(model = %model, error = %format!("{source:#}"), "problem committing");
                return Err(UpgradeError::Commit { model, source });
            }
        }
        Ok(())
    }
}

/// Roll back every checkpoint, continuing past failures.
fn rollback_all(checkpoints: &mut [PreparedCheckpoint]) {
    for checkpoint in checkpoints.iter_mut() {
        info!(model = checkpoint.model(), "rolling back");
        if let Err(source) = checkpoint.rollback() {
            let detail = format!("{source:#}");
            let err = UpgradeError::Rollback {
                model: checkpoint.model().to_string(),
                source,
            };
            warn!(error = %detail, "{err}");
        }
    }
}

/// Clean up every checkpoint, continuing past failures. Returns the failure count.
fn end_all(checkpoints: &mut [PreparedCheckpoint]) -> usize {
    let mut failures = 0;
    for checkpoint in checkpoints.iter_mut() {
        info!(model = checkpoint.model(), "cleaning up");
        if let Err(source) = checkpoint.end() {
            let detail = format!("{source:#}");
            let err = UpgradeError::End {
                model: checkpoint.model().to_string(),
                source,
            };
            warn!(error = %detail, "{err}");
            failures += 1;
        }
    }
    failures
}

fn banner(title: &str) -> String {
    const RULE: &str = "- - - - - - - - - - - - - - - - - - - - - - - - -";
    format!("\n{RULE}\n{title}\n{RULE}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::registry::{ModelSpec, UpgradeRegistry};
    use crate::store::MemoryVersionStore;
    use crate::topology::StaticTopology;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Shared event log written by steps and checkpoints.
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    /// Operations that should fail, e.g. `"begin:b"`, `"apply:b"`, `"rollback:a"`.
    #[derive(Clone, Default)]
    struct Faults(Arc<HashSet<String>>);

    impl Faults {
        fn of(ops: &[&str]) -> Self {
            Self(Arc::new(ops.iter().map(|s| s.to_string()).collect()))
        }

        fn check(&self, op: &str, model: &str) -> anyhow::Result<()> {
            if self.0.contains(&format!("{op}:{model}")) {
                anyhow::bail!("injected {op} failure for {model}");
            }
            Ok(())
        }
    }

    struct RecordingCheckpoint {
        model: String,
        journal: Journal,
        faults: Faults,
    }

    impl RecordingCheckpoint {
        fn record(&self, op: &str) -> anyhow::Result<()> {
            self.journal.push(format!("{op}:{}", self.model));
            self.faults.check(op, &self.model)
        }
    }

    impl Checkpoint for RecordingCheckpoint {
        fn begin(&mut self, from_version: &str) -> anyhow::Result<()> {
            self.journal
                .push(format!("begin-from:{}@{from_version}", self.model));
            self.record("begin")
        }

        fn commit(&mut self) -> anyhow::Result<()> {
            self.record("commit")
        }

        fn rollback(&mut self) -> anyhow::Result<()> {
            self.record("rollback")
        }

        fn end(&mut self) -> anyhow::Result<()> {
            self.record("end")
        }
    }

    struct Fixture {
        journal: Journal,
        store: MemoryVersionStore,
    }

    /// Models `a`, `b`, `c` (with `c` local), each with steps `1.0 → 1.1 → 1.2`.
    fn service(
        loaded: &[(&str, &str)],
        topology: StaticTopology,
        faults: Faults,
    ) -> (Fixture, UpgradeService<MemoryVersionStore, StaticTopology>) {
        let journal = Journal::default();
        let mut reg = UpgradeRegistry::new();
        reg.register_model(ModelSpec::shared("a")).unwrap();
        reg.register_model(ModelSpec::shared("b")).unwrap();
        reg.register_model(ModelSpec::local("c")).unwrap();
        for model in ["a", "b", "c"] {
            for (from, to) in [("1.0", "1.1"), ("1.1", "1.2")] {
                let (j, f, m) = (journal.clone(), faults.clone(), model.to_string());
                let label = format!("{model}@{to}");
                reg.register_step(UpgradeStep::new(model, from, to, move || {
                    j.push(format!("apply:{label}"));
                    f.check("apply", &m)
                }))
                .unwrap();
            }
            let (j, f, m) = (journal.clone(), faults.clone(), model.to_string());
            reg.register_checkpoint(model, move || RecordingCheckpoint {
                model: m.clone(),
                journal: j.clone(),
                faults: f.clone(),
            })
            .unwrap();
        }
        let manager = reg.build().unwrap();

        let store = MemoryVersionStore::with_versions(
            loaded
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        let svc = UpgradeService::new(manager, store.clone(), topology);
        (Fixture { journal, store }, svc)
    }

    fn existing() -> StaticTopology {
        StaticTopology::standalone(false)
    }

    fn map(pairs: &[(&str, &str)]) -> ModelVersions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn successful_upgrade_persists_final_versions() {
        let (fx, mut svc) = service(
            &[("a", "1.1"), ("other", "7.0")],
            existing(),
            Faults::default(),
        );

        let report = svc.start().unwrap();
        assert_eq!(svc.state(), RunState::Persisted);
        assert_eq!(
            fx.store.snapshot(),
            map(&[("a", "1.2"), ("b", "1.2"), ("c", "1.2"), ("other", "7.0")])
        );
        assert_eq!(fx.store.save_count(), 1);
        match report.outcome {
            RunOutcome::Upgraded { steps } => assert_eq!(steps.len(), 5),
            other => panic!("expected Upgraded, got {other:?}"),
        }
        assert_eq!(report.cleanup_failures, 0);
    }

    #[test]
    fn upgrade_runs_phases_in_protocol_order() {
        let (fx, mut svc) = service(&[("a", "1.1"), ("b", "1.1")], existing(), Faults::default());
        svc.start().unwrap();

        let events: Vec<String> = fx
            .journal
            .events()
            .into_iter()
            .filter(|e| !e.starts_with("begin-from"))
            .collect();
        assert_eq!(
            events,
            vec![
                "begin:a", "begin:b", "begin:c", "apply:a@1.2", "apply:b@1.2", "apply:c@1.1",
                "apply:c@1.2", "commit:a", "commit:b", "commit:c", "end:a", "end:b", "end:c",
            ]
        );
    }

    #[test]
    fn begin_receives_pre_run_version() {
        let (fx, mut svc) = service(&[("a", "1.1")], existing(), Faults::default());
        svc.start().unwrap();
        let froms: Vec<String> = fx
            .journal
            .events()
            .into_iter()
            .filter(|e| e.starts_with("begin-from"))
            .collect();
        assert_eq!(
            froms,
            vec!["begin-from:a@1.1", "begin-from:b@1.0", "begin-from:c@1.0"]
        );
    }

    #[test]
    fn apply_failure_rolls_back_every_begun_checkpoint() {
        let loaded = [("a", "1.0"), ("b", "1.0"), ("c", "1.0")];
        let (fx, mut svc) = service(&loaded, existing(), Faults::of(&["apply:b"]));

        let err = svc.start().unwrap_err();
        assert!(matches!(&err, UpgradeError::Apply { model, .. } if model == "b"));
        assert_eq!(svc.state(), RunState::Failed);

        for model in ["a", "b", "c"] {
            assert_eq!(fx.journal.count(&format!("rollback:{model}")), 1, "{model}");
        }
        assert_eq!(fx.journal.count("commit"), 0);
        assert_eq!(fx.journal.count("end"), 0);
        // Nothing after the failing step ran.
        assert_eq!(fx.journal.count("apply:c"), 0);
        assert_eq!(fx.store.snapshot(), map(&loaded));
        assert_eq!(fx.store.save_count(), 0);
    }

    #[test]
    fn begin_failure_rolls_back_only_begun_checkpoints() {
        let (fx, mut svc) = service(&[], existing(), Faults::of(&["begin:b"]));

        let err = svc.start().unwrap_err();
        assert!(matches!(&err, UpgradeError::Begin { model, .. } if model == "b"));

        assert_eq!(fx.journal.count("begin:c"), 0);
        assert_eq!(fx.journal.count("apply"), 0);
        assert_eq!(fx.journal.count("rollback:a"), 1);
        assert_eq!(fx.journal.count("rollback:b"), 0);
        assert_eq!(fx.journal.count("rollback:c"), 0);
        assert!(fx.store.snapshot().is_empty());
    }

    #[test]
    fn commit_failure_rolls_back_everything() {
        let (fx, mut svc) = service(&[], existing(), Faults::of(&["commit:b"]));

        let err = svc.start().unwrap_err();
        assert!(matches!(&err, UpgradeError::Commit { model, .. } if model == "b"));
        assert_eq!(fx.journal.count("commit:c"), 0);
        assert_eq!(fx.journal.count("rollback"), 3);
        assert_eq!(fx.store.save_count(), 0);
    }

    #[test]
    fn rollback_failure_does_not_stop_other_rollbacks() {
        let (fx, mut svc) = service(&[], existing(), Faults::of(&["apply:c", "rollback:a"]));

        let err = svc.start().unwrap_err();
        assert!(matches!(&err, UpgradeError::Apply { model, .. } if model == "c"));
        assert_eq!(fx.journal.count("rollback:b"), 1);
        assert_eq!(fx.journal.count("rollback:c"), 1);
    }

    #[test]
    fn end_failure_keeps_successful_outcome() {
        let (fx, mut svc) = service(&[], existing(), Faults::of(&["end:a"]));

        let report = svc.start().unwrap();
        assert_eq!(report.cleanup_failures, 1);
        assert_eq!(fx.journal.count("end"), 3);
        assert_eq!(fx.store.snapshot().get("a").map(String::as_str), Some("1.2"));
    }

    #[test]
    fn empty_plan_touches_nothing() {
        let loaded = [("a", "1.2"), ("b", "1.2"), ("c", "1.2")];
        let (fx, mut svc) = service(&loaded, existing(), Faults::default());

        let report = svc.start().unwrap();
        assert_eq!(report.outcome, RunOutcome::UpToDate);
        assert_eq!(svc.state(), RunState::Planned);
        assert!(fx.journal.events().is_empty());
        assert_eq!(fx.store.save_count(), 0);
    }

    #[test]
    fn fresh_node_inventories_without_running_steps() {
        let (fx, mut svc) = service(&[], StaticTopology::standalone(true), Faults::default());

        let report = svc.start().unwrap();
        assert_eq!(svc.state(), RunState::Persisted);
        assert!(fx.journal.events().is_empty());
        assert_eq!(
            fx.store.snapshot(),
            map(&[("a", "1.2"), ("b", "1.2"), ("c", "1.2")])
        );
        assert_eq!(
            report.outcome,
            RunOutcome::Inventoried {
                models: vec!["a".into(), "b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn fresh_node_in_fresh_cluster_inventories_everything() {
        let topology = StaticTopology {
            fresh_node: true,
            clustered: true,
            fresh_cluster: true,
        };
        let (fx, mut svc) = service(&[], topology, Faults::default());
        svc.start().unwrap();
        assert_eq!(fx.store.snapshot().len(), 3);
    }

    #[test]
    fn node_joining_existing_cluster_inventories_local_models_only() {
        let (fx, mut svc) = service(&[], StaticTopology::joining_cluster(), Faults::default());

        svc.start().unwrap();
        assert!(fx.journal.events().is_empty());
        assert_eq!(fx.store.snapshot(), map(&[("c", "1.2")]));
    }

    #[test]
    fn planning_error_happens_before_any_checkpoint() {
        let (fx, mut svc) = service(&[("a", "0.9")], existing(), Faults::default());
        let err = svc.start().unwrap_err();
        assert!(err.is_planning());
        assert!(fx.journal.events().is_empty());
        assert_eq!(svc.state(), RunState::Failed);
    }

    #[test]
    fn save_failure_fails_the_run() {
        let (fx, mut svc) = service(&[], existing(), Faults::default());
        fx.store.fail_saves(true);
        let err = svc.start().unwrap_err();
        assert!(matches!(err, UpgradeError::Store(_)));
        assert_eq!(svc.state(), RunState::Failed);
    }

    #[test]
    fn stop_stops_store_after_failure() {
        let (fx, mut svc) = service(&[], existing(), Faults::of(&["apply:a"]));
        assert!(svc.start().is_err());
        assert!(fx.store.is_running());
        svc.stop().unwrap();
        assert!(!fx.store.is_running());
        assert_eq!(svc.state(), RunState::Stopped);
    }

    #[test]
    fn failed_start_still_has_run_id() {
        let (_fx, mut svc) = service(&[], existing(), Faults::of(&["apply:a"]));
        assert_eq!(svc.run_id(), None);
        assert!(svc.start().is_err());
        assert!(svc.run_id().is_some());
    }

    #[test]
    fn rerun_after_success_is_up_to_date() {
        let (fx, mut svc) = service(&[], existing(), Faults::default());
        svc.start().unwrap();
        let first_events = fx.journal.events().len();

        let report = svc.start().unwrap();
        assert_eq!(report.outcome, RunOutcome::UpToDate);
        assert_eq!(fx.journal.events().len(), first_events);
        assert_eq!(fx.store.save_count(), 1);
    }
}
