//! Autosave tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AutoSaveError;

pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_MAX_CACHED_ENTRIES: usize = 20;
pub const DEFAULT_LARGE_ENTRY_WARN_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_EMERGENCY_EVICT_COUNT: usize = 3;
pub const DEFAULT_KEY_PREFIX: &str = "autosave:";

/// Configures an [`AutoSaveManager`](crate::AutoSaveManager).
///
/// Every field has a default, so a partial YAML or JSON document is a
/// valid config:
///
/// ```yaml
/// debounce_ms: 500
/// max_cached_entries: 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    /// Quiet period before a debounced write fires.
    pub debounce_ms: u64,

    /// Byte budget over all stored records.
    pub max_cache_size_bytes: u64,

    /// Entry-count budget over all stored records.
    pub max_cached_entries: usize,

    /// Records larger than this are logged as suspicious but still saved.
    pub large_entry_warn_bytes: u64,

    /// How many of the oldest records to drop when the store itself
    /// reports it is full.
    pub emergency_evict_count: usize,

    /// Store key prefix for records. Record keys are `{key_prefix}{key}`.
    pub key_prefix: String,

    /// Permanently turn off writes for this manager.
    pub disabled: bool,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE_BYTES,
            max_cached_entries: DEFAULT_MAX_CACHED_ENTRIES,
            large_entry_warn_bytes: DEFAULT_LARGE_ENTRY_WARN_BYTES,
            emergency_evict_count: DEFAULT_EMERGENCY_EVICT_COUNT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            disabled: false,
        }
    }
}

impl AutoSaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Returns a config with writes turned off.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AutoSaveError> {
        if self.max_cache_size_bytes == 0 {
            return Err(AutoSaveError::InvalidConfig(
                "max_cache_size_bytes must be positive".into(),
            ));
        }
        if self.max_cached_entries == 0 {
            return Err(AutoSaveError::InvalidConfig(
                "max_cached_entries must be positive".into(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(AutoSaveError::InvalidConfig("key_prefix must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let cfg: AutoSaveConfig = serde_yaml::from_str("debounce_ms: 500\nmax_cached_entries: 3\n").unwrap();
        assert_eq!(cfg.debounce(), Duration::from_millis(500));
        assert_eq!(cfg.max_cached_entries, 3);
        assert_eq!(cfg.max_cache_size_bytes, DEFAULT_MAX_CACHE_SIZE_BYTES);
        assert_eq!(cfg.key_prefix, DEFAULT_KEY_PREFIX);
        assert!(!cfg.disabled);
    }

    #[test]
    fn test_validate() {
        assert!(AutoSaveConfig::default().validate().is_ok());

        let cfg = AutoSaveConfig {
            max_cached_entries: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AutoSaveError::InvalidConfig(_))));

        let cfg = AutoSaveConfig {
            key_prefix: String::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
