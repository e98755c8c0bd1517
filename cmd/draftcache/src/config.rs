//! CLI configuration.
//!
//! Stored in ~/.draftcache/config.yaml:
//!
//! ```yaml
//! db: /var/lib/editor/autosave.redb
//! quota_bytes: 5242880
//! autosave:
//!   debounce_ms: 1000
//!   max_cached_entries: 50
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use draftcache_autosave::AutoSaveConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_DIR: &str = ".draftcache";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_DB_FILE: &str = "autosave.redb";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Database file. Defaults to ~/.draftcache/autosave.redb.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<PathBuf>,

    /// Store-level capacity in bytes, emulating a host quota.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<u64>,

    pub autosave: AutoSaveConfig,
}

impl CliConfig {
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Load from `path`, or from the default location if it exists.
    /// An explicit path that cannot be read is an error; a missing default
    /// file just means defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load_file(p),
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::load_file(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Database path, falling back to the default location.
    pub fn db_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(db) = &self.db {
            return Ok(db.clone());
        }
        Self::default_dir()
            .map(|dir| dir.join(DEFAULT_DB_FILE))
            .context("cannot determine home directory; pass --db")
    }
}
