//! # memreactor
//!
//! A deterministic, virtual-time reactor for driving protocol code in tests.
//!
//! Code under test talks to a [`SimReactor`] the way it would talk to a real
//! event loop: it opens connections, listens on ports, resolves names, posts
//! work to a thread pool and writes to transports. None of that touches the
//! network, spawns a thread or waits on a wall clock. Everything is queued on
//! a [`VirtualClock`] and happens only when the test advances time.
//!
//! ## Core Components
//!
//! - [`VirtualClock`]: Logical time and an ordered queue of delayed callbacks
//! - [`SyncWorkPool`]: Thread-pool substitute running work on the clock
//! - [`SimTransport`]: One direction of a byte-stream connection
//! - [`SimReactor`]: Connection attempts, listeners, DNS and dispatch
//! - [`ResponseSink`] and [`await_completion`]: Capture and drive responses
//!
//! ## Ordering Guarantees
//!
//! - Callbacks run in due-time order; equal due times run in scheduling order
//! - A zero-delay callback runs on the next `advance`/`run_ready`, never inline
//! - Writes reach the peer only through a flush scheduled on the clock
//! - No internal borrow is held while protocol, producer or callback code runs,
//!   so that code may call back into the reactor
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use memreactor::{
//!     AccumulatingProtocol, Address, ConnectOptions, Protocol, SimReactor,
//!     connect_client_pair,
//! };
//!
//! let reactor = SimReactor::new();
//! let factory = |_addr: &Address| -> Rc<dyn Protocol> { Rc::new(AccumulatingProtocol::new()) };
//! let handle = reactor.connect_tcp("server", 8080, &factory, ConnectOptions::default());
//!
//! let (_client, server) = connect_client_pair(&reactor, handle.attempt_id()).unwrap();
//! let to_client = server.transport().unwrap();
//! to_client.write(b"hello").unwrap();
//!
//! reactor.run_ready().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Logical time and delayed-callback scheduling.
pub mod clock;
/// Configuration for the reactor, transports and drive loop.
pub mod config;
/// Single-assignment results with continuations.
pub mod deferred;
/// Error types and utilities for simulation operations.
pub mod error;
/// Request driving and response capture.
pub mod harness;
/// Inline worker pool.
pub mod pool;
/// Protocol, producer and factory interfaces.
pub mod protocol;
/// The simulated reactor.
pub mod reactor;
/// Simulated byte-stream transports.
pub mod transport;

pub use clock::{DelayedCall, VirtualClock, WeakVirtualClock};
pub use config::{
    DEFAULT_FLUSH_RETRY_LIMIT, DEFAULT_MAX_TICKS, DEFAULT_TICK, DriveConfiguration,
    ReactorConfiguration, TransportConfiguration,
};
pub use deferred::Deferred;
pub use error::{ProtocolError, SimulationError, SimulationResult};
pub use harness::{
    RequestEndpoint, ResponseRecord, ResponseSink, SimRequest, await_completion,
    await_completion_with, client_address, connect_client_pair, connect_client_pair_with,
    drive_request, make_request, render,
};
pub use pool::SyncWorkPool;
pub use protocol::{
    AccumulatingProtocol, Address, DatagramProtocol, DisconnectReason, Producer, Protocol,
    ProtocolFactory, Resume,
};
pub use reactor::{
    AttemptId, ConnectOptions, ConnectionAttempt, ConnectionHandle, ListeningPort, PortId,
    PortKind, SimReactor, TcpServer,
};
pub use transport::{SimTransport, TransportArena, TransportId, TransportState};
