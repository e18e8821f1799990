//! Logical time source and delayed-callback scheduling.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    time::Duration,
};
use tracing::instrument;

use crate::{SimulationError, SimulationResult};

use super::queue::{CallbackKey, CallbackQueue, ScheduledCallback};

#[derive(Debug)]
pub(crate) struct ClockInner {
    now: Duration,
    queue: CallbackQueue,
    next_sequence: u64,
    callbacks_run: u64,
}

impl ClockInner {
    fn new() -> Self {
        Self {
            now: Duration::ZERO,
            queue: CallbackQueue::new(),
            next_sequence: 0,
            callbacks_run: 0,
        }
    }
}

/// Monotonic logical clock with a queue of delayed callbacks.
///
/// Nothing runs on its own: callbacks execute only inside [`advance`] or
/// [`run_ready`], in due-time order with FIFO tie-breaking. Cloning the clock
/// yields another handle onto the same timeline.
///
/// [`advance`]: VirtualClock::advance
/// [`run_ready`]: VirtualClock::run_ready
#[derive(Debug, Clone)]
pub struct VirtualClock {
    inner: Rc<RefCell<ClockInner>>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Creates a clock at logical time zero with nothing scheduled.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ClockInner::new())),
        }
    }

    /// Returns the current logical time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Schedules `action` to run `delay` after the current time.
    ///
    /// A zero delay means "next tick": the action runs during the next
    /// [`run_ready`](Self::run_ready) or [`advance`](Self::advance), never
    /// inside this call.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> DelayedCall
    where
        F: FnOnce() + 'static,
    {
        self.try_schedule(delay, move || {
            action();
            Ok(())
        })
    }

    /// Schedules a fallible action. An error returned by the action stops the
    /// enclosing `advance` and is returned from it.
    pub fn try_schedule<F>(&self, delay: Duration, action: F) -> DelayedCall
    where
        F: FnOnce() -> SimulationResult<()> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        // Saturates, so `Duration::MAX` reads as "never".
        let key = CallbackKey::new(inner.now.saturating_add(delay), inner.next_sequence);
        inner.next_sequence += 1;
        inner
            .queue
            .schedule(ScheduledCallback::new(key, Box::new(action)));
        tracing::trace!(
            "scheduled callback seq={} due={:?}",
            key.sequence(),
            key.due_time()
        );

        DelayedCall {
            clock: self.downgrade(),
            key,
        }
    }

    /// Cancels a pending callback. Returns `false` if it already ran or was
    /// already cancelled.
    pub fn cancel(&self, call: &DelayedCall) -> bool {
        self.inner.borrow_mut().queue.remove(&call.key)
    }

    /// Returns `true` if the callback has neither run nor been cancelled.
    pub fn is_active(&self, call: &DelayedCall) -> bool {
        self.inner.borrow().queue.contains(&call.key)
    }

    /// Moves time forward by `delta`, then runs every callback now due.
    ///
    /// Callbacks scheduled by earlier callbacks are honoured within the same
    /// call when they are due, so a chain of zero-delay continuations drains
    /// fully. If a callback fails, the error is returned and the remaining
    /// due callbacks stay queued.
    #[instrument(skip(self))]
    pub fn advance(&self, delta: Duration) -> SimulationResult<()> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.now = inner.now.saturating_add(delta);
        }
        self.run_due()
    }

    /// Runs everything already due without moving time forward.
    pub fn run_ready(&self) -> SimulationResult<()> {
        self.advance(Duration::ZERO)
    }

    /// Advances by each delta in turn.
    pub fn pump(&self, deltas: &[Duration]) -> SimulationResult<()> {
        for delta in deltas {
            self.advance(*delta)?;
        }
        Ok(())
    }

    /// Returns the number of callbacks waiting to run.
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Returns `true` if any callback is waiting to run.
    pub fn has_pending(&self) -> bool {
        !self.inner.borrow().queue.is_empty()
    }

    /// Returns the due time of the earliest pending callback.
    pub fn next_due(&self) -> Option<Duration> {
        self.inner.borrow().queue.next_due()
    }

    /// Returns how many callbacks have run since the clock was created.
    pub fn callbacks_run(&self) -> u64 {
        self.inner.borrow().callbacks_run
    }

    /// Creates a weak handle that does not keep the clock alive.
    ///
    /// Scheduled closures hold weak handles so the queue never owns its clock.
    pub fn downgrade(&self) -> WeakVirtualClock {
        WeakVirtualClock {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn run_due(&self) -> SimulationResult<()> {
        loop {
            // The borrow must end before the action runs: actions schedule.
            let next = {
                let mut inner = self.inner.borrow_mut();
                let now = inner.now;
                let next = inner.queue.pop_due(now);
                if next.is_some() {
                    inner.callbacks_run += 1;
                }
                next
            };

            let Some(callback) = next else {
                return Ok(());
            };

            let key = callback.key();
            if let Err(err) = callback.run() {
                tracing::debug!("callback seq={} failed: {}", key.sequence(), err);
                return Err(err);
            }
        }
    }
}

/// Weak handle onto a [`VirtualClock`].
#[derive(Debug, Clone)]
pub struct WeakVirtualClock {
    inner: Weak<RefCell<ClockInner>>,
}

impl WeakVirtualClock {
    /// Upgrades to a strong handle, failing once the clock has been dropped.
    pub fn upgrade(&self) -> SimulationResult<VirtualClock> {
        self.inner
            .upgrade()
            .map(|inner| VirtualClock { inner })
            .ok_or(SimulationError::SimulationShutdown)
    }
}

/// Cancellation handle for a scheduled callback.
#[derive(Debug, Clone)]
pub struct DelayedCall {
    clock: WeakVirtualClock,
    key: CallbackKey,
}

impl DelayedCall {
    /// Logical time at which the callback is due.
    pub fn due_time(&self) -> Duration {
        self.key.due_time()
    }

    /// Cancels the callback. Safe to call after it fired.
    pub fn cancel(&self) -> bool {
        self.clock
            .upgrade()
            .map(|clock| clock.cancel(self))
            .unwrap_or(false)
    }

    /// Returns `true` if the callback is still pending.
    pub fn is_active(&self) -> bool {
        self.clock
            .upgrade()
            .map(|clock| clock.is_active(self))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn zero_delay_runs_on_next_tick() {
        let clock = VirtualClock::new();
        let fired = Rc::new(Cell::new(false));

        let flag = Rc::clone(&fired);
        clock.schedule(Duration::ZERO, move || flag.set(true));
        assert!(!fired.get());

        clock.run_ready().unwrap();
        assert!(fired.get());
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn advance_moves_time_before_running() {
        let clock = VirtualClock::new();
        let seen = Rc::new(Cell::new(Duration::ZERO));

        let observed = Rc::clone(&seen);
        let handle = clock.clone();
        clock.schedule(Duration::from_millis(50), move || {
            observed.set(handle.now())
        });

        clock.advance(Duration::from_millis(200)).unwrap();
        assert_eq!(seen.get(), Duration::from_millis(200));
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let clock = VirtualClock::new();
        let call = clock.schedule(Duration::ZERO, || {});
        assert!(call.is_active());

        clock.run_ready().unwrap();
        assert!(!call.is_active());
        assert!(!call.cancel());
        assert!(!clock.cancel(&call));
    }

    #[test]
    fn failing_callback_halts_advance() {
        let clock = VirtualClock::new();
        let ran_after = Rc::new(Cell::new(false));

        clock.try_schedule(Duration::ZERO, || {
            Err(SimulationError::InvalidState("boom".to_string()))
        });
        let flag = Rc::clone(&ran_after);
        clock.schedule(Duration::ZERO, move || flag.set(true));

        let result = clock.run_ready();
        assert_eq!(
            result,
            Err(SimulationError::InvalidState("boom".to_string()))
        );
        assert!(!ran_after.get());
        assert_eq!(clock.pending_count(), 1);

        clock.run_ready().unwrap();
        assert!(ran_after.get());
    }

    #[test]
    fn huge_delays_saturate() {
        let clock = VirtualClock::new();
        clock.advance(Duration::from_secs(1)).unwrap();

        let never = clock.schedule(Duration::MAX, || {});
        assert_eq!(never.due_time(), Duration::MAX);

        clock.advance(Duration::from_secs(3600)).unwrap();
        assert!(never.is_active());

        clock.advance(Duration::MAX).unwrap();
        assert_eq!(clock.now(), Duration::MAX);
        assert!(!never.is_active());
    }

    #[test]
    fn weak_handle_fails_after_drop() {
        let clock = VirtualClock::new();
        let weak = clock.downgrade();
        drop(clock);
        assert_eq!(
            weak.upgrade().err(),
            Some(SimulationError::SimulationShutdown)
        );
    }
}
