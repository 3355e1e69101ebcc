//! Upgrade steps: a registered migration bridging one model version to the next.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

/// The migration body of an upgrade step.
///
/// Any error is treated as a failed step; the orchestrator does not
/// distinguish between error types.
pub trait UpgradeAction: Send + Sync {
    fn apply(&self) -> anyhow::Result<()>;
}

impl<F> UpgradeAction for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn apply(&self) -> anyhow::Result<()> {
        self()
    }
}

// ---------------------------------------------------------------------------
// UpgradeStep
// ---------------------------------------------------------------------------

/// An immutable `(model, from, to, action)` record.
///
/// Cloning is cheap; the action is shared.
#[derive(Clone)]
pub struct UpgradeStep {
    model: String,
    from: String,
    to: String,
    action: Arc<dyn UpgradeAction>,
}

impl UpgradeStep {
    pub fn new<F>(
        model: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        action: F,
    ) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_action(model, from, to, Arc::new(action))
    }

    pub fn with_action(
        model: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        action: Arc<dyn UpgradeAction>,
    ) -> Self {
        Self {
            model: model.into(),
            from: from.into(),
            to: to.into(),
            action,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn apply(&self) -> anyhow::Result<()> {
        self.action.apply()
    }

    pub fn record(&self) -> StepRecord {
        StepRecord {
            model: self.model.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

impl fmt::Debug for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeStep")
            .field("model", &self.model)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} to {}", self.model, self.from, self.to)
    }
}

/// Serializable description of a step, without its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub model: String,
    pub from: String,
    pub to: String,
}

// ---------------------------------------------------------------------------
// CommandAction
// ---------------------------------------------------------------------------

/// Runs a shell command as the body of an upgrade step.
///
/// The command runs through `sh -c` in `cwd` with `MODELUP_MODEL`,
/// `MODELUP_FROM` and `MODELUP_TO` set. A non-zero exit fails the step and
/// carries the command's stderr.
#[derive(Debug, Clone)]
pub struct CommandAction {
    pub command: String,
    pub cwd: PathBuf,
    pub model: String,
    pub from: String,
    pub to: String,
}

impl UpgradeAction for CommandAction {
    fn apply(&self) -> anyhow::Result<()> {
        tracing::debug!(command = %self.command, model = %self.model, "running upgrade command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.cwd)
            .env("MODELUP_MODEL", &self.model)
            .env("MODELUP_FROM", &self.from)
            .env("MODELUP_TO", &self.to)
            .output()
            .map_err(|e| anyhow::anyhow!("failed to spawn '{}': {e}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "command '{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
