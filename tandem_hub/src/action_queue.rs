// Hand-off queue from I/O threads to the single execution context.
//
// Producers (reader threads, the listener, local transports) hold a cloned
// `QueueHandle` and push boxed closures. The owner of the `ActionQueue`
// drains it from the hub's main loop with `run`, passing in the context the
// closures mutate.
//
// Draining is two-phase: under the lock the incoming buffer is swapped into
// the owner-private `draining` deque, then the lock is released and every
// closure runs in submission order. Anything enqueued while a drain is in
// progress lands in the fresh incoming buffer and waits for the next `run`.
//
// A closure that panics is caught and logged; the rest of the batch still
// runs. The context is handed in as `&mut C` through `AssertUnwindSafe`, so a
// closure that panics halfway through a mutation can leave it partially
// updated. Hub closures keep their mutations small for that reason.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// A deferred unit of work run against the context `C`.
pub type Action<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Producer side. Cheap to clone; every clone feeds the same queue.
pub struct QueueHandle<C> {
    incoming: Arc<Mutex<Vec<Action<C>>>>,
}

impl<C> Clone for QueueHandle<C> {
    fn clone(&self) -> Self {
        Self {
            incoming: Arc::clone(&self.incoming),
        }
    }
}

impl<C> QueueHandle<C> {
    /// Submit a closure. Never blocks beyond the brief swap in `run`.
    pub fn enqueue(&self, action: impl FnOnce(&mut C) + Send + 'static) {
        // A poisoned lock only means a producer panicked mid-push; the Vec
        // itself is still valid.
        let mut incoming = self
            .incoming
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        incoming.push(Box::new(action));
    }
}

/// Consumer side, owned by the execution context.
pub struct ActionQueue<C> {
    incoming: Arc<Mutex<Vec<Action<C>>>>,
    draining: VecDeque<Action<C>>,
}

impl<C> Default for ActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ActionQueue<C> {
    pub fn new() -> Self {
        Self {
            incoming: Arc::new(Mutex::new(Vec::new())),
            draining: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> QueueHandle<C> {
        QueueHandle {
            incoming: Arc::clone(&self.incoming),
        }
    }

    /// Number of closures waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.incoming
            .lock()
            .map(|incoming| incoming.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Run every closure submitted before this call, in order. Returns how
    /// many ran (panicked ones included).
    pub fn run(&mut self, ctx: &mut C) -> usize {
        {
            let mut incoming = self
                .incoming
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.draining.extend(incoming.drain(..));
        }

        let mut count = 0;
        while let Some(action) = self.draining.pop_front() {
            count += 1;
            let result = panic::catch_unwind(AssertUnwindSafe(|| action(ctx)));
            if let Err(payload) = result {
                log::error!("Queued action panicked: {}", panic_message(&*payload));
            }
        }
        count
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn runs_in_submission_order() {
        let mut queue: ActionQueue<Vec<u32>> = ActionQueue::new();
        let handle = queue.handle();
        for i in 0..5 {
            handle.enqueue(move |log: &mut Vec<u32>| log.push(i));
        }
        let mut log = Vec::new();
        assert_eq!(queue.run(&mut log), 5);
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.run(&mut log), 0);
    }

    #[test]
    fn enqueued_during_drain_waits_for_next_pass() {
        let mut queue: ActionQueue<Vec<&'static str>> = ActionQueue::new();
        let handle = queue.handle();
        let inner = handle.clone();
        handle.enqueue(move |log: &mut Vec<&'static str>| {
            log.push("outer");
            inner.enqueue(|log: &mut Vec<&'static str>| log.push("inner"));
        });

        let mut log = Vec::new();
        assert_eq!(queue.run(&mut log), 1);
        assert_eq!(log, vec!["outer"]);
        assert_eq!(queue.pending(), 1);

        assert_eq!(queue.run(&mut log), 1);
        assert_eq!(log, vec!["outer", "inner"]);
    }

    #[test]
    fn panicking_action_does_not_stall_the_rest() {
        let mut queue: ActionQueue<Vec<u32>> = ActionQueue::new();
        let handle = queue.handle();
        handle.enqueue(|log: &mut Vec<u32>| log.push(1));
        handle.enqueue(|_: &mut Vec<u32>| panic!("bad command"));
        handle.enqueue(|log: &mut Vec<u32>| log.push(3));

        let mut log = Vec::new();
        assert_eq!(queue.run(&mut log), 3);
        assert_eq!(log, vec![1, 3]);
    }

    #[test]
    fn producers_on_other_threads() {
        let mut queue: ActionQueue<Vec<u32>> = ActionQueue::new();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let handle = queue.handle();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        handle.enqueue(move |log: &mut Vec<u32>| log.push(t * 100 + i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let mut log = Vec::new();
        assert_eq!(queue.run(&mut log), 100);
        // Each producer's own submissions stay in order.
        for t in 0..4 {
            let mine: Vec<u32> = log.iter().copied().filter(|v| v / 100 == t).collect();
            assert_eq!(mine, (0..25).map(|i| t * 100 + i).collect::<Vec<_>>());
        }
    }

    proptest! {
        #[test]
        fn every_action_runs_exactly_once(k in 0usize..200) {
            let mut queue: ActionQueue<Vec<usize>> = ActionQueue::new();
            let handle = queue.handle();
            for i in 0..k {
                handle.enqueue(move |log: &mut Vec<usize>| log.push(i));
            }
            let mut log = Vec::new();
            prop_assert_eq!(queue.run(&mut log), k);
            prop_assert_eq!(queue.run(&mut log), 0);
            prop_assert_eq!(log, (0..k).collect::<Vec<_>>());
        }
    }
}
