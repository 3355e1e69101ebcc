use crate::error::{Result, UpgradeError};
use crate::paths;
use crate::service::{RunOutcome, UpgradeReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

const MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    UpToDate,
    Inventoried,
    Upgraded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::UpToDate => "up_to_date",
            RunStatus::Inventoried => "inventoried",
            RunStatus::Upgraded => "upgraded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Absent for runs that failed before a run id was assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    /// `model from X to Y` for upgrades, model keys for inventories.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn from_report(report: &UpgradeReport) -> Self {
        let (status, changes) = match &report.outcome {
            RunOutcome::UpToDate => (RunStatus::UpToDate, Vec::new()),
            RunOutcome::Inventoried { models } => (RunStatus::Inventoried, models.clone()),
            RunOutcome::Upgraded { steps } => (
                RunStatus::Upgraded,
                steps
                    .iter()
                    .map(|s| format!("{} from {} to {}", s.model, s.from, s.to))
                    .collect(),
            ),
        };
        Self {
            run_id: Some(report.run_id),
            status,
            timestamp: report.finished_at,
            changes,
            error: None,
        }
    }

    /// Records the full error chain, not just the outermost message.
    pub fn failed(run_id: Option<Uuid>, error: &UpgradeError) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed,
            timestamp: Utc::now(),
            changes: Vec::new(),
            error: Some(format!("{error:#}")),
        }
    }
}

/// Past runs, oldest first, stored in `.modelup/history.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

impl History {
    /// Missing file loads as empty history.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::history_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let history: History = serde_yaml::from_str(&data)?;
        Ok(history)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::history_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_ENTRIES {
            self.entries.drain(..self.entries.len() - MAX_ENTRIES);
        }
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev().take(limit)
    }
}

/// Load, append, trim and save in one go.
pub fn append(root: &Path, entry: HistoryEntry) -> Result<()> {
    let mut history = History::load(root)?;
    history.record(entry);
    history.save(root)
}
