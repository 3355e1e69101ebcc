use crate::error::{Result, UpgradeError};
use crate::paths;
use crate::version::validate_version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    File,
    Redb,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Overrides the default location under `.modelup/`. Relative to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Keep local models in a node-local file, separate from the shared store.
    #[serde(default)]
    pub split_local: bool,
}

impl StoreConfig {
    pub fn resolved_path(&self, root: &Path) -> PathBuf {
        match (&self.path, self.kind) {
            (Some(p), _) => root.join(p),
            (None, StoreKind::File) => paths::versions_path(root),
            (None, StoreKind::Redb) => paths::versions_db_path(root),
        }
    }
}

// ---------------------------------------------------------------------------
// TopologyConfig
// ---------------------------------------------------------------------------

/// `fresh_node` setting: `true`, `false` or `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FreshNode {
    Fixed(bool),
    Detect(Detect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detect {
    /// The node is fresh when no versions were ever saved.
    Auto,
}

impl Default for FreshNode {
    fn default() -> Self {
        FreshNode::Detect(Detect::Auto)
    }
}

impl FreshNode {
    pub fn resolve(self, has_persisted_versions: bool) -> bool {
        match self {
            FreshNode::Fixed(fresh) => fresh,
            FreshNode::Detect(Detect::Auto) => !has_persisted_versions,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub fresh_node: FreshNode,
    #[serde(default)]
    pub clustered: bool,
    /// Required when `clustered`; follows `fresh_node` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fresh_cluster: Option<bool>,
}

// ---------------------------------------------------------------------------
// ModelConfig / StepConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub key: String,
    #[serde(default)]
    pub local: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Directory snapshotted before this model's steps run. Relative to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub model: String,
    pub from: String,
    pub to: String,
    /// Shell command run from the project root.
    pub command: String,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            store: StoreConfig::default(),
            topology: TopologyConfig::default(),
            models: Vec::new(),
            steps: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(UpgradeError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn model(&self, key: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.key == key)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        // 1. Model keys: valid and unique
        let mut seen = HashSet::new();
        for model in &self.models {
            if paths::validate_model_key(&model.key).is_err() {
                error(format!("invalid model key '{}'", model.key));
            }
            if !seen.insert(model.key.as_str()) {
                error(format!("model '{}' is declared twice", model.key));
            }
        }

        // 2. Dependencies refer to declared models
        for model in &self.models {
            for dep in &model.depends_on {
                if !seen.contains(dep.as_str()) {
                    error(format!(
                        "model '{}' depends on undeclared model '{}'",
                        model.key, dep
                    ));
                }
            }
        }

        // 3. Steps: known model, valid versions
        for step in &self.steps {
            if !seen.contains(step.model.as_str()) {
                error(format!(
                    "step {} -> {} refers to undeclared model '{}'",
                    step.from, step.to, step.model
                ));
            }
            for v in [&step.from, &step.to] {
                if validate_version(v).is_err() {
                    error(format!("step for '{}' has invalid version '{}'", step.model, v));
                }
            }
        }

        // 4. Clustered nodes must say whether the cluster is fresh
        if self.topology.clustered && self.topology.fresh_cluster.is_none() {
            error("topology.clustered is set but topology.fresh_cluster is not".to_string());
        }

        // 5. Softer checks
        for step in &self.steps {
            if step.command.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "step for '{}' from {} to {} has an empty command",
                        step.model, step.from, step.to
                    ),
                });
            }
        }
        for model in &self.models {
            let has_steps = self.steps.iter().any(|s| s.model == model.key);
            if has_steps && model.data_dir.is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "model '{}' has no data_dir; its upgrades cannot be rolled back",
                        model.key
                    ),
                });
            }
        }
        if self.store.split_local && !self.models.iter().any(|m| m.local) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "store.split_local is set but no model is local".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
