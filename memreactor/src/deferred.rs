//! Deferred results.
//!
//! A [`Deferred`] is a single-assignment cell for the outcome of an operation
//! that completes on a later tick. Continuations registered with
//! [`Deferred::add_callback`] run when the result is set, or immediately if it
//! already is. A deferred can also be awaited; the future completes once the
//! clock has been advanced far enough for the result to be set.

use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{SimulationError, SimulationResult};

type Continuation<T, E> = Box<dyn FnOnce(&Result<T, E>)>;

struct DeferredInner<T, E> {
    result: Option<Rc<Result<T, E>>>,
    callbacks: Vec<Continuation<T, E>>,
    wakers: Vec<Waker>,
}

/// Shared handle onto a result that becomes available later.
pub struct Deferred<T, E = SimulationError> {
    inner: Rc<RefCell<DeferredInner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("resolved", &inner.result.is_some())
            .field("callbacks", &inner.callbacks.len())
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    /// Creates an unresolved deferred.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                result: None,
                callbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Creates a deferred that already succeeded.
    pub fn succeeded(value: T) -> Self {
        let deferred = Self::new();
        deferred.inner.borrow_mut().result = Some(Rc::new(Ok(value)));
        deferred
    }

    /// Creates a deferred that already failed.
    pub fn failed(error: E) -> Self {
        let deferred = Self::new();
        deferred.inner.borrow_mut().result = Some(Rc::new(Err(error)));
        deferred
    }

    /// Sets the result and runs the registered continuations in order.
    ///
    /// Resolving twice is an invalid-state error; the first result is kept.
    pub fn resolve(&self, result: Result<T, E>) -> SimulationResult<()> {
        let (result, callbacks, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.result.is_some() {
                return Err(SimulationError::InvalidState(
                    "deferred already resolved".to_string(),
                ));
            }
            let result = Rc::new(result);
            inner.result = Some(Rc::clone(&result));
            (
                result,
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };

        for callback in callbacks {
            callback(&result);
        }
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    /// Resolves with a successful value.
    pub fn callback(&self, value: T) -> SimulationResult<()> {
        self.resolve(Ok(value))
    }

    /// Resolves with a failure.
    pub fn errback(&self, error: E) -> SimulationResult<()> {
        self.resolve(Err(error))
    }

    /// Returns `true` once a result has been set.
    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().result.is_some()
    }

    /// Registers a continuation for the result.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T, E>) + 'static,
    {
        let ready = {
            let mut inner = self.inner.borrow_mut();
            let existing = inner.result.clone();
            match existing {
                Some(result) => result,
                None => {
                    inner.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };

        callback(&ready);
    }
}

impl<T: Clone, E: Clone> Deferred<T, E> {
    /// Returns a copy of the result if it has been set.
    pub fn result(&self) -> Option<Result<T, E>> {
        self.inner
            .borrow()
            .result
            .as_ref()
            .map(|result| result.as_ref().clone())
    }
}

impl<T: Clone, E: Clone> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        let existing = inner.result.clone();
        match existing {
            Some(result) => Poll::Ready(result.as_ref().clone()),
            None => {
                inner.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
