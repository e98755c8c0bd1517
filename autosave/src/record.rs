//! Stored record layout and codec.
//!
//! Records are stored as JSON so external tooling can read them without this
//! crate. `serde_json::Value` objects keep their keys sorted, so encoding the
//! same record twice yields the same bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::AutoSaveError;
use crate::timestamp::SavedAt;

/// One editing subject's locally saved state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "key")]
    pub key: String,

    /// Grouping identifier, e.g. the owning document.
    #[serde(rename = "parentKey")]
    pub parent_key: String,

    /// Opaque editable state.
    #[serde(rename = "payload")]
    pub payload: Value,

    #[serde(rename = "savedAt")]
    pub saved_at: SavedAt,

    /// Last known server-side version at the time of the local save.
    #[serde(rename = "serverVersion", default)]
    pub server_version_marker: Option<String>,
}

impl StoredRecord {
    /// Serialize to the stored byte form.
    pub fn encode(&self) -> Result<Vec<u8>, AutoSaveError> {
        serde_json::to_vec(self).map_err(|e| AutoSaveError::Serialization(e.to_string()))
    }

    /// Parse stored bytes. Corrupt or truncated data reads as absent.
    pub fn decode(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice(data) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(len = data.len(), error = %e, "autosave: ignoring unreadable record");
                None
            }
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> Result<u64, AutoSaveError> {
        Ok(self.encode()?.len() as u64)
    }
}

/// Read-time view of a stored record, used for eviction and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub parent_key: String,
    /// Encoded size in bytes.
    pub size: u64,
    pub saved_at: SavedAt,
}

/// Usage of the autosave area of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub total_size: u64,
    pub entry_count: usize,
    pub max_size: u64,
    pub usage_percent: f64,
}

impl StorageStats {
    pub fn new(total_size: u64, entry_count: usize, max_size: u64) -> Self {
        let usage_percent = if max_size == 0 {
            0.0
        } else {
            total_size as f64 / max_size as f64 * 100.0
        };
        Self {
            total_size,
            entry_count,
            max_size,
            usage_percent,
        }
    }
}
