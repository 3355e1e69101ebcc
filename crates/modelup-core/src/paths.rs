use crate::error::{Result, UpgradeError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const MODELUP_DIR: &str = ".modelup";

pub const CONFIG_FILE: &str = ".modelup/config.yaml";
pub const VERSIONS_FILE: &str = ".modelup/versions.yaml";
pub const VERSIONS_DB_FILE: &str = ".modelup/versions.redb";
pub const LOCAL_VERSIONS_FILE: &str = ".modelup/local-versions.yaml";
pub const HISTORY_FILE: &str = ".modelup/history.yaml";

/// Suffix appended to a model data directory while a checkpoint holds its backup.
pub const BACKUP_SUFFIX: &str = "upgrade-backup";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn modelup_dir(root: &Path) -> PathBuf {
    root.join(MODELUP_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn versions_path(root: &Path) -> PathBuf {
    root.join(VERSIONS_FILE)
}

pub fn versions_db_path(root: &Path) -> PathBuf {
    root.join(VERSIONS_DB_FILE)
}

pub fn local_versions_path(root: &Path) -> PathBuf {
    root.join(LOCAL_VERSIONS_FILE)
}

pub fn history_path(root: &Path) -> PathBuf {
    root.join(HISTORY_FILE)
}

/// Sibling backup location for a model data directory, e.g. `data/db` → `data/db.upgrade-backup`.
pub fn backup_path(data_dir: &Path) -> PathBuf {
    let mut name = data_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    data_dir.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Model key validation
// ---------------------------------------------------------------------------

static MODEL_KEY_RE: OnceLock<Regex> = OnceLock::new();

fn model_key_re() -> &'static Regex {
    MODEL_KEY_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9._\-]*[a-z0-9])?$").expect("static regex"))
}

pub fn validate_model_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 64 || !model_key_re().is_match(key) {
        return Err(UpgradeError::InvalidModelKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
