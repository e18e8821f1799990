//! Outgoing connection attempts.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use crate::protocol::{Address, Protocol};

use super::sim_reactor::ReactorInner;

/// Identifier of a recorded `connect_tcp` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub(crate) u64);

impl AttemptId {
    /// The raw attempt number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Optional parameters of `connect_tcp`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Overrides the reactor's default connect timeout.
    pub timeout: Option<Duration>,
    /// Local address the connection would bind to.
    pub bind_address: Option<Address>,
}

impl ConnectOptions {
    /// Sets the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the local bind address.
    pub fn with_bind_address(mut self, bind_address: Address) -> Self {
        self.bind_address = Some(bind_address);
        self
    }
}

/// A recorded connection attempt waiting to be paired with a server.
#[derive(Clone)]
pub struct ConnectionAttempt {
    pub(crate) id: AttemptId,
    pub(crate) destination: Address,
    pub(crate) protocol: Rc<dyn Protocol>,
    pub(crate) timeout: Duration,
    pub(crate) bind_address: Option<Address>,
}

impl ConnectionAttempt {
    /// Identifier of this attempt.
    pub fn id(&self) -> AttemptId {
        self.id
    }

    /// Host and port that were dialed.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Client protocol built by the factory when the attempt was made.
    pub fn protocol(&self) -> Rc<dyn Protocol> {
        Rc::clone(&self.protocol)
    }

    /// Connect timeout in effect for this attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Local bind address, if one was requested.
    pub fn bind_address(&self) -> Option<&Address> {
        self.bind_address.as_ref()
    }
}

impl fmt::Debug for ConnectionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionAttempt")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("timeout", &self.timeout)
            .field("bind_address", &self.bind_address)
            .finish_non_exhaustive()
    }
}

/// Returned by `connect_tcp`; tracks one pending attempt.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub(crate) reactor: Weak<RefCell<ReactorInner>>,
    pub(crate) attempt_id: AttemptId,
    pub(crate) destination: Address,
}

impl ConnectionHandle {
    /// Host and port being connected to.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Identifier to pass to the pairing helpers.
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Abandons the attempt. Returns `false` if it was already paired or
    /// abandoned.
    pub fn stop_connecting(&self) -> bool {
        let Some(inner) = self.reactor.upgrade() else {
            return false;
        };
        let removed = inner.borrow_mut().attempts.remove(&self.attempt_id).is_some();
        if removed {
            tracing::debug!("{} to {} abandoned", self.attempt_id, self.destination);
        }
        removed
    }

    /// Returns `true` while the attempt waits to be paired.
    pub fn is_pending(&self) -> bool {
        self.reactor
            .upgrade()
            .is_some_and(|inner| inner.borrow().attempts.contains_key(&self.attempt_id))
    }
}
