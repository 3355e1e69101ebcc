use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("not initialized: run 'modelup init'")]
    NotInitialized,

    #[error("invalid model key '{0}': must be lowercase alphanumeric with '-', '_' or '.' separators")]
    InvalidModelKey(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("model already registered: {0}")]
    DuplicateModel(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("duplicate upgrade step for {model} from {from}")]
    DuplicateStep { model: String, from: String },

    #[error("upgrade step for {model} must move forward, got {from} -> {to}")]
    NonIncreasingStep {
        model: String,
        from: String,
        to: String,
    },

    #[error("model dependency cycle involving: {0}")]
    DependencyCycle(String),

    #[error("cannot plan upgrade of {model}: {detail}")]
    Planning { model: String, detail: String },

    #[error("missing checkpoint for model {0}")]
    MissingCheckpoint(String),

    #[error("failed to checkpoint {model}")]
    Begin {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to upgrade {model} from {from} to {to}")]
    Apply {
        model: String,
        from: String,
        to: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to commit {model}")]
    Commit {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to roll back {model}")]
    Rollback {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to clean up {model}")]
    End {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("model version store: {0}")]
    Store(String),

    #[error("cannot copy {}", path.display())]
    Copy {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl UpgradeError {
    /// True for errors raised while computing or preparing a plan, before
    /// any checkpoint has been begun.
    pub fn is_planning(&self) -> bool {
        matches!(self, Self::Planning { .. } | Self::MissingCheckpoint(_))
    }

    /// The model this error is about, when there is exactly one.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Planning { model, .. }
            | Self::Begin { model, .. }
            | Self::Apply { model, .. }
            | Self::Commit { model, .. }
            | Self::Rollback { model, .. }
            | Self::End { model, .. }
            | Self::DuplicateStep { model, .. }
            | Self::NonIncreasingStep { model, .. } => Some(model),
            Self::MissingCheckpoint(model)
            | Self::DuplicateModel(model)
            | Self::UnknownModel(model) => Some(model),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpgradeError>;
