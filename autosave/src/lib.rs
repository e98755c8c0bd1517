//! Local autosave cache for in-progress editor state.
//!
//! An [`AutoSaveManager`] accepts keyed blobs of editable state and persists
//! them to a capacity-limited [`KVStore`](draftcache_kv::KVStore):
//!
//! - [`scheduler`]: one debounce timer per key; bursts collapse into a single
//!   write of the last payload, forced saves bypass the timer
//! - [`eviction`]: keeps the byte and entry budgets by deleting the records
//!   with the oldest `savedAt` first, with an emergency pass when the store
//!   itself reports it is full
//! - [`status`]: the idle/saving/saved/error state machine and the one-time
//!   store availability probe
//! - [`record`]: the JSON record codec; unreadable bytes read as absent
//!
//! Records live under `{key_prefix}{key}` (default prefix `"autosave:"`).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use draftcache_autosave::{AutoSaveConfig, AutoSaveManager};
//! use draftcache_kv::MemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = AutoSaveManager::new(Arc::new(MemoryStore::new()), AutoSaveConfig::default()).unwrap();
//! manager.save_to_local("img-1", "doc-1", serde_json::json!({"shapes": []}), true);
//! assert!(manager.has_unsaved_data("img-1"));
//! # }
//! ```

pub mod config;
pub mod error;
pub mod eviction;
pub mod keys;
pub mod manager;
pub mod record;
pub mod scheduler;
pub mod status;
pub mod timestamp;

pub use config::AutoSaveConfig;
pub use error::{AutoSaveError, Result};
pub use manager::{AutoSaveManager, QuotaExceeded, QuotaObserver};
pub use record::{CacheEntry, StorageStats, StoredRecord};
pub use status::{ManagerState, SaveStatus, StatusObserver};
pub use timestamp::SavedAt;
