//! Save status state machine and store availability.

use std::fmt;
use std::sync::Arc;

use draftcache_kv::KVStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::keys::PROBE_KEY;
use crate::timestamp::SavedAt;

/// Where the manager is in its save cycle.
///
/// ```text
/// Idle ──► Saving ──► Saved
///            │
///            └──────► Error
/// ```
///
/// Any state moves back to `Saving` on the next write request; clearing or
/// disposing returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
            SaveStatus::Error => "error",
        }
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot handed to the status observer on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ManagerState {
    pub has_unsaved_changes: bool,
    pub last_auto_saved_at: Option<SavedAt>,
    pub status: SaveStatus,
}

/// Receives a full [`ManagerState`] after every transition. Identical
/// snapshots can arrive back to back.
pub type StatusObserver = Arc<dyn Fn(&ManagerState) + Send + Sync>;

/// A status observer together with the snapshot it should receive.
///
/// Transitions are computed under the manager's lock; the notification is
/// delivered after the lock is released.
pub struct StatusNotice {
    observer: StatusObserver,
    state: ManagerState,
}

impl StatusNotice {
    pub fn deliver(self) {
        (self.observer)(&self.state);
    }
}

/// Holds the manager state and its single observer slot.
#[derive(Default)]
pub struct StatusTracker {
    state: ManagerState,
    observer: Option<StatusObserver>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn set_observer(&mut self, observer: Option<StatusObserver>) {
        self.observer = observer;
    }

    /// A write was requested (debounced or forced).
    pub fn saving(&mut self) -> Option<StatusNotice> {
        self.state.status = SaveStatus::Saving;
        self.state.has_unsaved_changes = true;
        self.notice()
    }

    /// A write landed. `still_pending` reports other keys waiting on timers.
    pub fn saved(&mut self, at: SavedAt, still_pending: bool) -> Option<StatusNotice> {
        self.state.status = SaveStatus::Saved;
        self.state.last_auto_saved_at = Some(at);
        self.state.has_unsaved_changes = still_pending;
        self.notice()
    }

    /// A write failed for good. The changes remain unsaved.
    pub fn failed(&mut self) -> Option<StatusNotice> {
        self.state.status = SaveStatus::Error;
        self.state.has_unsaved_changes = true;
        self.notice()
    }

    /// Back to idle, keeping the last save time.
    pub fn idle(&mut self, still_pending: bool) -> Option<StatusNotice> {
        self.state.status = SaveStatus::Idle;
        self.state.has_unsaved_changes = still_pending;
        self.notice()
    }

    /// Forget everything and detach the observer. Notifies no one.
    pub fn reset(&mut self) {
        self.state = ManagerState::default();
        self.observer = None;
    }

    fn notice(&self) -> Option<StatusNotice> {
        self.observer.as_ref().map(|observer| StatusNotice {
            observer: Arc::clone(observer),
            state: self.state,
        })
    }
}

/// Whether the store can take writes at all.
///
/// The probe runs at most once per manager; a failed probe and explicit
/// disabled mode both turn writes off for good.
#[derive(Debug, Default)]
pub struct Availability {
    disabled: bool,
    probed: Option<bool>,
}

impl Availability {
    pub fn new(disabled: bool) -> Self {
        Self {
            disabled,
            probed: None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Result of the (memoized) probe. Always `false` in disabled mode,
    /// which never touches the store.
    pub fn is_available(&mut self, store: &dyn KVStore) -> bool {
        if self.disabled {
            return false;
        }
        *self.probed.get_or_insert_with(|| probe(store))
    }
}

fn probe(store: &dyn KVStore) -> bool {
    match store.set(PROBE_KEY, b"1") {
        Ok(()) => {}
        // A full store is still reachable; eviction deals with capacity.
        Err(e) if e.is_quota_exceeded() => {
            debug!(error = %e, "autosave: probe write hit the quota, store is reachable");
            return true;
        }
        Err(e) => {
            warn!(error = %e, "autosave: store rejected probe write, autosave off");
            return false;
        }
    }
    if let Err(e) = store.delete(PROBE_KEY) {
        warn!(error = %e, "autosave: store rejected probe delete, autosave off");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftcache_kv::{KVError, KVResult, MemoryStore, QuotaStore};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_tracker() -> (StatusTracker, Arc<Mutex<Vec<ManagerState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut tracker = StatusTracker::new();
        tracker.set_observer(Some(Arc::new(move |s: &ManagerState| sink.lock().push(*s))));
        (tracker, seen)
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SaveStatus::Idle.to_string(), "idle");
        assert_eq!(SaveStatus::Saving.to_string(), "saving");
        assert_eq!(serde_json::to_string(&SaveStatus::Saved).unwrap(), "\"saved\"");
        assert_eq!(SaveStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_transitions_deliver_full_snapshots() {
        let (mut tracker, seen) = recording_tracker();
        let at = SavedAt::from_millis(42);

        tracker.saving().unwrap().deliver();
        tracker.saved(at, false).unwrap().deliver();
        tracker.saving().unwrap().deliver();
        tracker.failed().unwrap().deliver();

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].status, SaveStatus::Saving);
        assert!(seen[0].has_unsaved_changes);
        assert_eq!(seen[1].status, SaveStatus::Saved);
        assert_eq!(seen[1].last_auto_saved_at, Some(at));
        assert!(!seen[1].has_unsaved_changes);
        assert_eq!(seen[3].status, SaveStatus::Error);
        assert_eq!(seen[3].last_auto_saved_at, Some(at));
    }

    #[test]
    fn test_no_observer_no_notice() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.saving().is_none());
        assert_eq!(tracker.state().status, SaveStatus::Saving);
    }

    #[test]
    fn test_reset_detaches_observer() {
        let (mut tracker, seen) = recording_tracker();
        tracker.saving().unwrap().deliver();
        tracker.reset();
        assert_eq!(tracker.state(), ManagerState::default());
        assert!(tracker.saving().is_none());
        assert_eq!(seen.lock().len(), 1);
    }

    struct CountingStore {
        inner: MemoryStore,
        fail: bool,
        sets: AtomicUsize,
    }

    impl KVStore for CountingStore {
        fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> KVResult<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(KVError::Unavailable("denied".into()));
            }
            self.inner.set(key, value)
        }
        fn delete(&self, key: &str) -> KVResult<()> {
            self.inner.delete(key)
        }
        fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>> {
            self.inner.scan(prefix)
        }
    }

    #[test]
    fn test_probe_runs_once_and_cleans_up() {
        let store = CountingStore { inner: MemoryStore::new(), fail: false, sets: AtomicUsize::new(0) };
        let mut avail = Availability::new(false);

        assert!(avail.is_available(&store));
        assert!(avail.is_available(&store));
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
        assert!(store.inner.is_empty());
    }

    #[test]
    fn test_failed_probe_is_permanent() {
        let store = CountingStore { inner: MemoryStore::new(), fail: true, sets: AtomicUsize::new(0) };
        let mut avail = Availability::new(false);

        assert!(!avail.is_available(&store));
        assert!(!avail.is_available(&store));
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_never_probes() {
        let store = CountingStore { inner: MemoryStore::new(), fail: false, sets: AtomicUsize::new(0) };
        let mut avail = Availability::new(true);
        assert!(avail.is_disabled());
        assert!(!avail.is_available(&store));
        assert_eq!(store.sets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_full_store_counts_as_available() {
        let backing = MemoryStore::new();
        backing.set("autosave:a", b"0123456789").unwrap();
        let store = QuotaStore::new(backing.clone(), "autosave:a".len() as u64 + 10);
        let mut avail = Availability::new(false);

        assert!(avail.is_available(&store));
        assert_eq!(backing.keys("").unwrap(), vec!["autosave:a".to_string()]);
    }
}
