// Long-action barrier: a FIFO of pending rendezvous operations.
//
// At most one action is current. When an action becomes current it is marked
// runnable if this side of the session is allowed to run side effects (only
// the hub is); `poll_run` hands the runnable action out exactly once. Ending
// an action clears it (or removes it from the backlog) and promotes the next
// one.
//
// Identity is by `LongAction` equality (tag plus discriminating fields), so a
// duplicate schedule for an action already pending is dropped and an end
// notice for an action that is not pending is a no-op.

use std::collections::VecDeque;

use tandem_protocol::LongAction;

#[derive(Debug)]
struct Current {
    action: LongAction,
    should_run: bool,
}

#[derive(Debug)]
pub struct LongActionQueue {
    can_run: bool,
    current: Option<Current>,
    queue: VecDeque<LongAction>,
}

impl LongActionQueue {
    /// `can_run` is true for the hub and false for client sessions.
    pub fn new(can_run: bool) -> Self {
        Self {
            can_run,
            current: None,
            queue: VecDeque::new(),
        }
    }

    fn contains(&self, action: &LongAction) -> bool {
        self.current.as_ref().is_some_and(|c| &c.action == action) || self.queue.contains(action)
    }

    /// Add an action. Returns false if an equal action is already pending.
    pub fn enqueue(&mut self, action: LongAction) -> bool {
        if self.contains(&action) {
            log::debug!("Long action already pending: {action:?}");
            return false;
        }
        log::info!("Long action queued: {}", action.text(self.can_run));
        if self.current.is_none() {
            self.current = Some(Current {
                action,
                should_run: self.can_run,
            });
        } else {
            self.queue.push_back(action);
        }
        true
    }

    /// Remove an action wherever it is. Returns false if it was not pending.
    pub fn complete(&mut self, action: &LongAction) -> bool {
        if self.current.as_ref().is_some_and(|c| &c.action == action) {
            self.current = self.queue.pop_front().map(|next| Current {
                action: next,
                should_run: self.can_run,
            });
            log::info!("Long action complete: {action:?}");
            return true;
        }
        match self.queue.iter().position(|a| a == action) {
            Some(index) => {
                self.queue.remove(index);
                log::info!("Long action dropped from backlog: {action:?}");
                true
            }
            None => false,
        }
    }

    /// The current action, once, if it still needs its side effect run.
    pub fn poll_run(&mut self) -> Option<LongAction> {
        let current = self.current.as_mut()?;
        if !current.should_run {
            return None;
        }
        current.should_run = false;
        Some(current.action.clone())
    }

    pub fn current(&self) -> Option<&LongAction> {
        self.current.as_ref().map(|c| &c.action)
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Every pending action, current first.
    pub fn pending(&self) -> Vec<LongAction> {
        self.current
            .iter()
            .map(|c| c.action.clone())
            .chain(self.queue.iter().cloned())
            .collect()
    }

    /// Pending actions that cannot finish without `username`.
    pub fn involving(&self, username: &str) -> Vec<LongAction> {
        self.pending()
            .into_iter()
            .filter(|a| a.involves(username))
            .collect()
    }

    /// Status line for the current action.
    pub fn describe(&self) -> Option<String> {
        self.current
            .as_ref()
            .map(|c| c.action.text(self.can_run))
    }
}
