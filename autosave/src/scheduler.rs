//! Per-key debounce timers.

use std::collections::HashMap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Pending<T> {
    ticket: u64,
    value: T,
    task: JoinHandle<()>,
}

/// Holds at most one pending value and one timer per key.
///
/// Scheduling a key that already has a timer aborts the old timer and
/// replaces its value. When a timer elapses it calls `on_fire` with its
/// ticket; the owner then claims the value with [`take_fired`]. A timer that
/// was superseded or cancelled after it woke up presents a stale ticket and
/// gets nothing.
///
/// [`take_fired`]: DebounceScheduler::take_fired
pub struct DebounceScheduler<T> {
    runtime: Handle,
    pending: HashMap<String, Pending<T>>,
    next_ticket: u64,
}

impl<T> DebounceScheduler<T> {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Store `value` for `key` and (re)start its timer.
    ///
    /// Returns the value that was pending before, if any.
    pub fn schedule<F>(&mut self, key: &str, value: T, delay: Duration, on_fire: F) -> Option<T>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let previous = self.cancel(key);

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(ticket);
        });

        self.pending.insert(key.to_string(), Pending { ticket, value, task });
        previous
    }

    /// Claim the value for a timer that fired. `None` if the ticket is stale.
    pub fn take_fired(&mut self, key: &str, ticket: u64) -> Option<T> {
        match self.pending.get(key) {
            Some(p) if p.ticket == ticket => self.pending.remove(key).map(|p| p.value),
            _ => None,
        }
    }

    /// Stop the timer for `key` and return its value without firing.
    pub fn cancel(&mut self, key: &str) -> Option<T> {
        self.pending.remove(key).map(|p| {
            p.task.abort();
            p.value
        })
    }

    /// Stop every timer, returning the pending values.
    pub fn drain(&mut self) -> Vec<(String, T)> {
        let mut drained: Vec<(String, T)> = self
            .pending
            .drain()
            .map(|(key, p)| {
                p.task.abort();
                (key, p.value)
            })
            .collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    /// Stop every timer and drop the pending values. Returns how many there were.
    pub fn cancel_all(&mut self) -> usize {
        self.drain().len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pending.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl<T> Drop for DebounceScheduler<T> {
    fn drop(&mut self) {
        for p in self.pending.values() {
            p.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    type Shared = Arc<Mutex<DebounceScheduler<&'static str>>>;
    type Fired = Arc<Mutex<Vec<(String, &'static str)>>>;

    fn schedule(sched: &Shared, fired: &Fired, key: &str, value: &'static str, ms: u64) {
        let s = Arc::clone(sched);
        let f = Arc::clone(fired);
        let k = key.to_string();
        sched.lock().schedule(key, value, Duration::from_millis(ms), move |ticket| {
            if let Some(v) = s.lock().take_fired(&k, ticket) {
                f.lock().push((k, v));
            }
        });
    }

    fn setup() -> (Shared, Fired) {
        (
            Arc::new(Mutex::new(DebounceScheduler::new(Handle::current()))),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_with_last_value() {
        let (sched, fired) = setup();

        schedule(&sched, &fired, "a", "v1", 100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        schedule(&sched, &fired, "a", "v2", 100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        schedule(&sched, &fired, "a", "v3", 100);

        // 140ms after the first call: the first timer would have fired by now.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(fired.lock().is_empty());
        assert!(sched.lock().is_pending("a"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*fired.lock(), vec![("a".to_string(), "v3")]);
        assert!(!sched.lock().has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (sched, fired) = setup();

        schedule(&sched, &fired, "a", "a1", 100);
        schedule(&sched, &fired, "b", "b1", 200);
        assert_eq!(sched.lock().pending_keys(), vec!["a".to_string(), "b".to_string()]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*fired.lock(), vec![("a".to_string(), "a1")]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_value() {
        let (sched, fired) = setup();

        schedule(&sched, &fired, "a", "v1", 100);
        assert_eq!(sched.lock().cancel("a"), Some("v1"));
        assert_eq!(sched.lock().cancel("a"), None);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (sched, fired) = setup();

        schedule(&sched, &fired, "a", "1", 100);
        schedule(&sched, &fired, "b", "2", 100);
        assert_eq!(sched.lock().cancel_all(), 2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticket_gets_nothing() {
        let (sched, _fired) = setup();
        let mut s = sched.lock();

        s.schedule("a", "old", Duration::from_secs(10), |_| {});
        s.schedule("a", "new", Duration::from_secs(10), |_| {});

        assert_eq!(s.take_fired("a", 1), None);
        assert_eq!(s.take_fired("a", 2), Some("new"));
        assert_eq!(s.take_fired("a", 2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_sorted_values() {
        let (sched, fired) = setup();
        schedule(&sched, &fired, "b", "2", 100);
        schedule(&sched, &fired, "a", "1", 100);

        let drained = sched.lock().drain();
        assert_eq!(drained, vec![("a".to_string(), "1"), ("b".to_string(), "2")]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fired.lock().is_empty());
    }
}
