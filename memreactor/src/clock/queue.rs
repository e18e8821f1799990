//! Pending callbacks ordered by due time.

use std::{collections::BTreeMap, fmt, time::Duration};

use crate::SimulationResult;

/// Work attached to a scheduled callback.
pub(crate) type Action = Box<dyn FnOnce() -> SimulationResult<()>>;

/// Identifies a callback inside a [`CallbackQueue`].
///
/// Ordering is by due time first, then by insertion sequence, which gives FIFO
/// execution for callbacks due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackKey {
    due_time: Duration,
    sequence: u64,
}

impl CallbackKey {
    /// Creates a new key.
    pub fn new(due_time: Duration, sequence: u64) -> Self {
        Self { due_time, sequence }
    }

    /// Returns the logical time at which the callback becomes due.
    pub fn due_time(&self) -> Duration {
        self.due_time
    }

    /// Returns the insertion sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// A callback waiting for the clock to reach its due time.
pub struct ScheduledCallback {
    key: CallbackKey,
    action: Action,
}

impl ScheduledCallback {
    pub(crate) fn new(key: CallbackKey, action: Action) -> Self {
        Self { key, action }
    }

    /// Returns the key of this callback.
    pub fn key(&self) -> CallbackKey {
        self.key
    }

    /// Consumes the callback and runs its action.
    pub fn run(self) -> SimulationResult<()> {
        (self.action)()
    }
}

impl fmt::Debug for ScheduledCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledCallback")
            .field("due_time", &self.key.due_time)
            .field("sequence", &self.key.sequence)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of pending callbacks.
///
/// Backed by a `BTreeMap` so a cancelled callback can be removed by key
/// instead of being tombstoned.
#[derive(Default)]
pub struct CallbackQueue {
    entries: BTreeMap<CallbackKey, Action>,
}

impl CallbackQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback to the queue.
    pub fn schedule(&mut self, callback: ScheduledCallback) {
        self.entries.insert(callback.key, callback.action);
    }

    /// Removes and returns the earliest callback if it is due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<ScheduledCallback> {
        let key = *self.entries.keys().next()?;
        if key.due_time > now {
            return None;
        }
        self.entries
            .remove(&key)
            .map(|action| ScheduledCallback::new(key, action))
    }

    /// Removes a callback without running it. Returns `false` if it was not pending.
    pub fn remove(&mut self, key: &CallbackKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Returns `true` if the callback is still pending.
    pub fn contains(&self, key: &CallbackKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the due time of the earliest pending callback.
    pub fn next_due(&self) -> Option<Duration> {
        self.entries.keys().next().map(CallbackKey::due_time)
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of pending callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("pending", &self.entries.len())
            .field("next_due", &self.next_due())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    fn recording(log: &Rc<RefCell<Vec<u32>>>, id: u32) -> Action {
        let log = Rc::clone(log);
        Box::new(move || {
            log.borrow_mut().push(id);
            Ok(())
        })
    }

    #[test]
    fn queue_pops_in_time_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = CallbackQueue::new();

        queue.schedule(ScheduledCallback::new(
            CallbackKey::new(Duration::from_millis(300), 0),
            recording(&log, 3),
        ));
        queue.schedule(ScheduledCallback::new(
            CallbackKey::new(Duration::from_millis(100), 1),
            recording(&log, 1),
        ));
        queue.schedule(ScheduledCallback::new(
            CallbackKey::new(Duration::from_millis(200), 2),
            recording(&log, 2),
        ));

        while let Some(callback) = queue.pop_due(Duration::from_secs(1)) {
            callback.run().unwrap();
        }

        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn same_time_uses_insertion_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = CallbackQueue::new();
        let same_time = Duration::from_millis(100);

        for (sequence, id) in [(2, 30), (0, 10), (1, 20)] {
            queue.schedule(ScheduledCallback::new(
                CallbackKey::new(same_time, sequence),
                recording(&log, id),
            ));
        }

        while let Some(callback) = queue.pop_due(same_time) {
            callback.run().unwrap();
        }

        assert_eq!(*log.borrow(), vec![10, 20, 30]);
    }

    #[test]
    fn pop_due_leaves_future_callbacks() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = CallbackQueue::new();
        queue.schedule(ScheduledCallback::new(
            CallbackKey::new(Duration::from_millis(500), 0),
            recording(&log, 1),
        ));

        assert!(queue.pop_due(Duration::from_millis(499)).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn removed_callback_is_gone() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = CallbackQueue::new();
        let key = CallbackKey::new(Duration::ZERO, 0);
        queue.schedule(ScheduledCallback::new(key, recording(&log, 1)));

        assert!(queue.contains(&key));
        assert!(queue.remove(&key));
        assert!(!queue.remove(&key));
        assert!(queue.pop_due(Duration::from_secs(10)).is_none());
        assert!(log.borrow().is_empty());
    }
}
