//! A worker pool that runs everything on the virtual clock.
//!
//! Work submitted here never leaves the test thread. It runs on the next tick,
//! and its completion callback runs on the tick after that, so code written
//! against a real pool sees the same two-step ordering.

use std::{cell::Cell, rc::Rc, time::Duration};

use crate::{
    SimulationResult,
    clock::{VirtualClock, WeakVirtualClock},
    deferred::Deferred,
};

/// Inline substitute for a thread pool.
#[derive(Debug, Clone)]
pub struct SyncWorkPool {
    clock: WeakVirtualClock,
    running: Rc<Cell<bool>>,
}

impl SyncWorkPool {
    /// Creates a stopped pool scheduling on `clock`.
    pub fn new(clock: &VirtualClock) -> Self {
        Self {
            clock: clock.downgrade(),
            running: Rc::new(Cell::new(false)),
        }
    }

    /// Marks the pool as started. Work runs either way.
    pub fn start(&self) {
        tracing::debug!("work pool started");
        self.running.set(true);
    }

    /// Marks the pool as stopped.
    pub fn stop(&self) {
        tracing::debug!("work pool stopped");
        self.running.set(false);
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Runs `work` on the next tick, then `on_complete` with its result on the
    /// tick after.
    ///
    /// `on_complete` is called exactly once and never from inside `submit`.
    /// Submitted work cannot be cancelled.
    pub fn submit<T, E, W, C>(&self, work: W, on_complete: C) -> SimulationResult<()>
    where
        T: 'static,
        E: 'static,
        W: FnOnce() -> Result<T, E> + 'static,
        C: FnOnce(Result<T, E>) + 'static,
    {
        let clock = self.clock.upgrade()?;
        let weak = clock.downgrade();

        clock.try_schedule(Duration::ZERO, move || {
            let result = work();
            tracing::trace!("pooled work finished, ok={}", result.is_ok());
            weak.upgrade()?
                .schedule(Duration::ZERO, move || on_complete(result));
            Ok(())
        });
        Ok(())
    }

    /// Runs `work` like [`submit`](Self::submit) and resolves the returned
    /// deferred with its result.
    pub fn defer<T, E, W>(&self, work: W) -> SimulationResult<Deferred<T, E>>
    where
        T: 'static,
        E: 'static,
        W: FnOnce() -> Result<T, E> + 'static,
    {
        let deferred = Deferred::new();
        let completion = deferred.clone();
        self.submit(work, move |result| {
            if let Err(err) = completion.resolve(result) {
                tracing::warn!("pooled work completed twice: {}", err);
            }
        })?;
        Ok(deferred)
    }
}
