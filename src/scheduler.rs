use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Deferred work keyed by owner, at most one pending task per key.
///
/// Nothing runs on its own: the owner calls `take_due` from its poll loop and
/// executes what comes back. Scheduling over an existing key cancels it first.
#[derive(Debug)]
pub struct Scheduler<K, T> {
    tasks: HashMap<K, Scheduled<T>>,
}

#[derive(Debug)]
struct Scheduled<T> {
    due: Instant,
    payload: T,
}

impl<K: Eq + Hash + Copy, T> Default for Scheduler<K, T> {
    fn default() -> Self {
        Self { tasks: HashMap::new() }
    }
}

impl<K: Eq + Hash + Copy, T> Scheduler<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending task for `key`.
    pub fn schedule(&mut self, key: K, due: Instant, payload: T) {
        self.tasks.insert(key, Scheduled { due, payload });
    }

    pub fn cancel(&mut self, key: K) -> Option<T> {
        self.tasks.remove(&key).map(|t| t.payload)
    }

    pub fn is_pending(&self, key: K) -> bool {
        self.tasks.contains_key(&key)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.tasks.values().map(|t| t.due).min()
    }

    /// Removes and returns every task due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, T)> {
        let keys: Vec<K> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.due <= now)
            .map(|(k, _)| *k)
            .collect();
        let mut due: Vec<(Instant, K, T)> = keys
            .into_iter()
            .filter_map(|k| self.tasks.remove(&k).map(|t| (t.due, k, t.payload)))
            .collect();
        due.sort_by_key(|(at, _, _)| *at);
        due.into_iter().map(|(_, k, p)| (k, p)).collect()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

impl<K: Eq + Hash + Copy, T: PartialEq> Scheduler<K, T> {
    /// Schedules unless an identical task is already pending for `key`.
    ///
    /// A pending task with a different payload is cancelled and replaced.
    /// Returns true if a new task was scheduled.
    pub fn schedule_coalesced(&mut self, key: K, due: Instant, payload: T) -> bool {
        if self.tasks.get(&key).is_some_and(|t| t.payload == payload) {
            return false;
        }
        self.schedule(key, due, payload);
        true
    }
}
