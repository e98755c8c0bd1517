//! The autosave facade.
//!
//! Callers hand over a keyed blob of editor state; the manager debounces it,
//! makes room under the byte and entry budgets, writes it, and reports the
//! outcome through the status observer. Save failures never surface as
//! panics and, for debounced saves, never as return values either: the
//! editing session keeps going and the observers carry the news.

use std::sync::{Arc, Weak};

use draftcache_kv::{KVError, KVStore};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::config::AutoSaveConfig;
use crate::error::{AutoSaveError, Result};
use crate::eviction::{Budget, evict_oldest, make_room, scan_entries, usage_excluding};
use crate::keys::record_key;
use crate::record::{CacheEntry, StorageStats, StoredRecord};
use crate::scheduler::DebounceScheduler;
use crate::status::{Availability, ManagerState, StatusNotice, StatusObserver, StatusTracker};
use crate::timestamp::{SavedAt, SavedAtClock};

/// Passed to the quota observer when a save could not be stored even after
/// emergency eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub key: String,
    pub parent_key: String,
    pub error: KVError,
}

pub type QuotaObserver = Arc<dyn Fn(&QuotaExceeded) + Send + Sync>;

struct PendingSave {
    parent_key: String,
    payload: Value,
}

enum Notice {
    Status(StatusNotice),
    Quota(QuotaObserver, QuotaExceeded),
}

struct Inner {
    scheduler: DebounceScheduler<PendingSave>,
    tracker: StatusTracker,
    availability: Availability,
    clock: SavedAtClock,
    on_quota: Option<QuotaObserver>,
    destroyed: bool,
}

struct Shared {
    store: Arc<dyn KVStore>,
    config: AutoSaveConfig,
    inner: Mutex<Inner>,
    /// Held while observers run and while destroying, so no observer call
    /// can start once `destroy` has returned. Reentrant because an observer
    /// may destroy the manager itself.
    delivery: ReentrantMutex<()>,
}

/// Debounced, budgeted local autosave.
///
/// Cloning yields another handle to the same manager. Timers hold only a
/// weak reference, so dropping every handle stops pending saves the same
/// way [`destroy`](Self::destroy) does, minus the explicit teardown.
#[derive(Clone)]
pub struct AutoSaveManager {
    shared: Arc<Shared>,
}

impl AutoSaveManager {
    /// Create a manager driven by the current tokio runtime.
    pub fn new(store: Arc<dyn KVStore>, config: AutoSaveConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| AutoSaveError::NoRuntime)?;
        Self::with_runtime(store, config, runtime)
    }

    /// Create a manager whose debounce timers run on `runtime`.
    pub fn with_runtime(
        store: Arc<dyn KVStore>,
        config: AutoSaveConfig,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Inner {
            scheduler: DebounceScheduler::new(runtime),
            tracker: StatusTracker::new(),
            availability: Availability::new(config.disabled),
            clock: SavedAtClock::new(),
            on_quota: None,
            destroyed: false,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                config,
                inner: Mutex::new(inner),
                delivery: ReentrantMutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &AutoSaveConfig {
        &self.shared.config
    }

    /// Schedule a save of `payload` for `key`, or write it right away when
    /// `force` is set. Failures are reported through the observers only.
    pub fn save_to_local(&self, key: &str, parent_key: &str, payload: Value, force: bool) {
        if let Err(e) = self.save_to_local_with_result(key, parent_key, payload, force) {
            debug!(key, error = %e, "autosave: save not performed");
        }
    }

    /// Like [`save_to_local`](Self::save_to_local) but reports the result.
    ///
    /// For a debounced save `Ok` only means the write was scheduled; the
    /// outcome of the write itself arrives through the status observer.
    pub fn save_to_local_with_result(
        &self,
        key: &str,
        parent_key: &str,
        payload: Value,
        force: bool,
    ) -> Result<()> {
        let shared = &self.shared;
        let mut notices = Vec::new();
        let result = {
            let mut inner = shared.inner.lock();
            if inner.destroyed {
                return Err(AutoSaveError::Destroyed);
            }
            if inner.availability.is_disabled() {
                return Err(AutoSaveError::Disabled);
            }
            if !inner.availability.is_available(shared.store.as_ref()) {
                return Err(AutoSaveError::Unavailable);
            }

            let pending = PendingSave {
                parent_key: parent_key.to_string(),
                payload,
            };
            if force {
                // A forced write supersedes whatever was waiting for this key.
                inner.scheduler.cancel(key);
                notices.extend(inner.tracker.saving().map(Notice::Status));
                shared.persist(&mut inner, key, pending, &mut notices)
            } else {
                let weak: Weak<Shared> = Arc::downgrade(shared);
                let fire_key = key.to_string();
                inner
                    .scheduler
                    .schedule(key, pending, shared.config.debounce(), move |ticket| {
                        if let Some(shared) = weak.upgrade() {
                            shared.fire(&fire_key, ticket);
                        }
                    });
                notices.extend(inner.tracker.saving().map(Notice::Status));
                Ok(())
            }
        };
        shared.deliver(notices);
        result
    }

    /// Read the stored record for `key`. Missing and unreadable records are
    /// both `None`.
    pub fn load_from_local(&self, key: &str) -> Option<StoredRecord> {
        self.shared
            .read_record(&record_key(&self.shared.config.key_prefix, key))
    }

    /// Drop any pending save for `key` and delete its record.
    pub fn clear_local(&self, key: &str) {
        let shared = &self.shared;
        let notices: Vec<Notice> = {
            let mut inner = shared.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.scheduler.cancel(key);
            if let Err(e) = shared.store.delete(&record_key(&shared.config.key_prefix, key)) {
                warn!(key, error = %e, "autosave: failed to delete record");
            }
            let still_pending = inner.scheduler.has_pending();
            inner.tracker.idle(still_pending).map(Notice::Status).into_iter().collect()
        };
        shared.deliver(notices);
    }

    /// Whether a readable record exists for `key`, stale or not.
    pub fn has_unsaved_data(&self, key: &str) -> bool {
        self.load_from_local(key).is_some()
    }

    pub fn get_last_saved_at(&self, key: &str) -> Option<SavedAt> {
        self.load_from_local(key).map(|r| r.saved_at)
    }

    /// Update only the server version marker of an existing record. Does
    /// nothing when `key` has no record.
    ///
    /// The rewritten record goes through the same budget and eviction as a
    /// save. If it still does not fit, the old record is kept and the quota
    /// observer is told; the save status is left alone.
    pub fn set_server_version_marker(&self, key: &str, marker: Option<&str>) {
        let shared = &self.shared;
        let mut notices = Vec::new();
        {
            let mut inner = shared.inner.lock();
            if inner.destroyed || !inner.availability.is_available(shared.store.as_ref()) {
                return;
            }

            let store_key = record_key(&shared.config.key_prefix, key);
            let Some(mut record) = shared.read_record(&store_key) else {
                return;
            };
            if record.server_version_marker.as_deref() == marker {
                return;
            }
            record.server_version_marker = marker.map(str::to_string);

            if let Err(e) = shared.store_record(&record) {
                warn!(key, error = %e, "autosave: failed to update server version marker");
                notices.extend(quota_notice(&inner, &record.parent_key, &e));
            }
        }
        shared.deliver(notices);
    }

    /// Register (or with `None`, detach) the status observer.
    pub fn set_on_status_change(&self, observer: Option<StatusObserver>) {
        let mut inner = self.shared.inner.lock();
        if !inner.destroyed {
            inner.tracker.set_observer(observer);
        }
    }

    /// Register (or with `None`, detach) the quota observer.
    pub fn set_on_quota_exceeded(&self, observer: Option<QuotaObserver>) {
        let mut inner = self.shared.inner.lock();
        if !inner.destroyed {
            inner.on_quota = observer;
        }
    }

    /// Cancel every pending save and detach all observers. Afterwards the
    /// manager neither writes to the store nor calls any observer, even for
    /// timers that were already running.
    pub fn destroy(&self) {
        let _delivery = self.shared.delivery.lock();
        let mut inner = self.shared.inner.lock();
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        let cancelled = inner.scheduler.cancel_all();
        inner.tracker.reset();
        inner.on_quota = None;
        debug!(cancelled, "autosave: manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    /// Every readable record, oldest save first.
    pub fn get_all_cache_entries(&self) -> Vec<CacheEntry> {
        match scan_entries(self.shared.store.as_ref(), &self.shared.config.key_prefix) {
            Ok(entries) => entries.iter().filter_map(|e| e.to_cache_entry()).collect(),
            Err(e) => {
                warn!(error = %e, "autosave: failed to enumerate records");
                Vec::new()
            }
        }
    }

    pub fn get_storage_stats(&self) -> StorageStats {
        let entries = self.get_all_cache_entries();
        StorageStats::new(
            entries.iter().map(|e| e.size).sum(),
            entries.len(),
            self.shared.config.max_cache_size_bytes,
        )
    }

    /// Delete the `n` oldest records. Returns how many were removed.
    pub fn clear_oldest_entries(&self, n: usize) -> usize {
        let shared = &self.shared;
        let inner = shared.inner.lock();
        if inner.destroyed {
            return 0;
        }
        match evict_oldest(shared.store.as_ref(), &shared.config.key_prefix, n, None) {
            Ok(evicted) => evicted.len(),
            Err(e) => {
                warn!(error = %e, "autosave: failed to clear oldest records");
                0
            }
        }
    }

    /// Whether the store passed its one-time write probe.
    pub fn is_auto_save_available(&self) -> bool {
        let shared = &self.shared;
        shared.inner.lock().availability.is_available(shared.store.as_ref())
    }

    pub fn is_auto_save_disabled(&self) -> bool {
        self.shared.inner.lock().availability.is_disabled()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ManagerState {
        self.shared.inner.lock().tracker.state()
    }

    pub fn has_pending_save(&self, key: &str) -> bool {
        self.shared.inner.lock().scheduler.is_pending(key)
    }

    /// Write every pending debounced save now, e.g. before shutting down.
    /// Returns the first failure; the remaining saves are still attempted.
    pub fn flush_all(&self) -> Result<()> {
        let shared = &self.shared;
        let mut notices = Vec::new();
        let result = {
            let mut inner = shared.inner.lock();
            if inner.destroyed {
                return Err(AutoSaveError::Destroyed);
            }
            let mut first_err = None;
            for (key, pending) in inner.scheduler.drain() {
                if let Err(e) = shared.persist(&mut inner, &key, pending, &mut notices) {
                    first_err.get_or_insert(e);
                }
            }
            first_err.map_or(Ok(()), Err)
        };
        shared.deliver(notices);
        result
    }
}

impl Shared {
    /// Timer callback: write the value left behind by the last schedule call.
    fn fire(&self, key: &str, ticket: u64) {
        let mut notices = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            let Some(pending) = inner.scheduler.take_fired(key, ticket) else {
                return;
            };
            let _ = self.persist(&mut inner, key, pending, &mut notices);
        }
        self.deliver(notices);
    }

    /// Run observers outside the state lock. Stops as soon as the manager
    /// is destroyed, including by one of these observers.
    fn deliver(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let _delivery = self.delivery.lock();
        for notice in notices {
            if self.inner.lock().destroyed {
                return;
            }
            match notice {
                Notice::Status(n) => n.deliver(),
                Notice::Quota(observer, event) => observer(&event),
            }
        }
    }

    fn budget(&self) -> Budget {
        Budget {
            max_bytes: self.config.max_cache_size_bytes,
            max_entries: self.config.max_cached_entries,
        }
    }

    fn read_record(&self, store_key: &str) -> Option<StoredRecord> {
        match self.store.get(store_key) {
            Ok(data) => data.and_then(|d| StoredRecord::decode(&d)),
            Err(e) => {
                debug!(store_key, error = %e, "autosave: read failed");
                None
            }
        }
    }

    /// Write and record the outcome in the status tracker.
    fn persist(
        &self,
        inner: &mut Inner,
        key: &str,
        pending: PendingSave,
        notices: &mut Vec<Notice>,
    ) -> Result<()> {
        let parent_key = pending.parent_key.clone();
        match self.write(inner, key, pending) {
            Ok(saved_at) => {
                debug!(key, %saved_at, "autosave: saved");
                let still_pending = inner.scheduler.has_pending();
                notices.extend(inner.tracker.saved(saved_at, still_pending).map(Notice::Status));
                Ok(())
            }
            Err(e) => {
                error!(key, error = %e, "autosave: save failed");
                notices.extend(quota_notice(inner, &parent_key, &e));
                notices.extend(inner.tracker.failed().map(Notice::Status));
                Err(e)
            }
        }
    }

    /// Build the next record for `key` and store it.
    fn write(&self, inner: &mut Inner, key: &str, pending: PendingSave) -> Result<SavedAt> {
        let previous = self.read_record(&record_key(&self.config.key_prefix, key));
        let record = StoredRecord {
            key: key.to_string(),
            parent_key: pending.parent_key,
            payload: pending.payload,
            saved_at: inner.clock.next(previous.as_ref().map(|r| r.saved_at)),
            server_version_marker: previous.and_then(|r| r.server_version_marker),
        };
        self.store_record(&record)?;
        Ok(record.saved_at)
    }

    /// Make room, write, and on a capacity failure evict a few of the oldest
    /// records and try exactly once more.
    fn store_record(&self, record: &StoredRecord) -> Result<()> {
        let store = self.store.as_ref();
        let prefix = &self.config.key_prefix;
        let key = record.key.as_str();
        let store_key = record_key(prefix, key);

        let data = record.encode()?;
        let size = data.len() as u64;
        if size > self.config.large_entry_warn_bytes {
            warn!(
                key,
                size,
                threshold = self.config.large_entry_warn_bytes,
                "autosave: unusually large record"
            );
        }

        let budget = self.budget();
        let room = make_room(store, prefix, key, size, budget)?;
        let first = if room.fits {
            store.set(&store_key, &data)
        } else {
            Err(KVError::QuotaExceeded {
                needed: room.total_size + size,
                limit: budget.max_bytes,
            })
        };
        match first {
            Ok(()) => return Ok(()),
            Err(e) if e.is_quota_exceeded() => {
                warn!(key, error = %e, "autosave: store full, evicting oldest records");
            }
            Err(e) => return Err(e.into()),
        }

        let evicted = evict_oldest(store, prefix, self.config.emergency_evict_count, Some(key))?;
        debug!(key, evicted = evicted.len(), "autosave: emergency eviction done, retrying");

        let (total, count) = usage_excluding(store, prefix, key)?;
        let retry = if budget.admits(total, count, size) {
            store.set(&store_key, &data)
        } else {
            Err(KVError::QuotaExceeded {
                needed: total + size,
                limit: budget.max_bytes,
            })
        };
        match retry {
            Ok(()) => Ok(()),
            Err(e) if e.is_quota_exceeded() => Err(AutoSaveError::QuotaExceeded {
                key: key.to_string(),
                source: e,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// The quota observer call for a failed write, if it was a capacity failure
/// and someone is listening.
fn quota_notice(inner: &Inner, parent_key: &str, error: &AutoSaveError) -> Option<Notice> {
    let AutoSaveError::QuotaExceeded { key, source } = error else {
        return None;
    };
    let observer = inner.on_quota.as_ref()?;
    let event = QuotaExceeded {
        key: key.clone(),
        parent_key: parent_key.to_string(),
        error: source.clone(),
    };
    Some(Notice::Quota(Arc::clone(observer), event))
}
