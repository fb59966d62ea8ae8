// Countdown rendezvous: wait until every registered party has checked in.
//
// Parties register an id with `add`; each signals completion with `done`.
// Waiters block until the set of outstanding ids is empty. Signalling the
// same id twice (or an id that was never added) is a no-op, so at-least-once
// redelivery cannot release waiters early.
//
// The server uses one of these to track its reader threads: each thread is
// registered under its player id when spawned and calls `done` on exit, and
// shutdown waits (bounded) for the set to empty.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct CountdownLock<T> {
    pending: Mutex<HashSet<T>>,
    released: Condvar,
}

impl<T: Eq + Hash + Clone> Default for CountdownLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> CountdownLock<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<T>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a party. Returns false if it was already registered.
    pub fn add(&self, id: T) -> bool {
        self.lock().insert(id)
    }

    /// Mark `id` as done. Returns true only for the call that empties the
    /// set (and therefore releases the waiters).
    pub fn done(&self, id: &T) -> bool {
        let mut pending = self.lock();
        if !pending.remove(id) {
            return false;
        }
        if pending.is_empty() {
            self.released.notify_all();
            true
        } else {
            false
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_empty()
    }

    /// Outstanding parties, in no particular order.
    pub fn ids(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// Block until every registered party is done.
    pub fn wait(&self) {
        let mut pending = self.lock();
        while !pending.is_empty() {
            pending = self
                .released
                .wait(pending)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like `wait`, giving up after `timeout`. Returns true if released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.lock();
        while !pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = match self.released.wait_timeout(pending, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn releases_after_last_distinct_party() {
        let lock = CountdownLock::new();
        for id in ["A", "B", "C"] {
            assert!(lock.add(id));
        }
        assert!(!lock.done(&"A"));
        assert!(!lock.done(&"A"));
        assert!(!lock.done(&"B"));
        assert!(!lock.is_released());
        assert!(lock.done(&"C"));
        assert!(lock.is_released());
    }

    #[test]
    fn unknown_id_is_a_no_op() {
        let lock = CountdownLock::new();
        lock.add(1);
        assert!(!lock.done(&7));
        assert_eq!(lock.ids(), vec![1]);
    }

    #[test]
    fn waiter_wakes_when_last_party_is_done() {
        let lock = Arc::new(CountdownLock::new());
        lock.add(1u32);
        lock.add(2u32);

        let waiter = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || lock.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        lock.done(&1);
        lock.done(&2);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_timeout_gives_up() {
        let lock = CountdownLock::new();
        lock.add("stuck");
        assert!(!lock.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn empty_lock_does_not_block() {
        let lock: CountdownLock<u8> = CountdownLock::new();
        lock.wait();
        assert!(lock.wait_timeout(Duration::ZERO));
    }

    proptest! {
        #[test]
        fn release_happens_on_last_distinct_done(
            ids in proptest::collection::hash_set(0u8..50, 1..10),
            repeats in proptest::collection::vec(0usize..10, 0..20),
        ) {
            let ids: Vec<u8> = ids.into_iter().collect();
            let lock = CountdownLock::new();
            for id in &ids {
                lock.add(*id);
            }
            // Duplicate signals for ids other than the last never release.
            for r in repeats {
                let id = ids[r % ids.len()];
                if id != ids[ids.len() - 1] {
                    prop_assert!(!lock.done(&id));
                }
            }
            let mut releases = 0;
            for id in &ids {
                if lock.done(id) {
                    releases += 1;
                }
            }
            prop_assert!(lock.is_released());
            prop_assert_eq!(releases, 1);
        }
    }
}
