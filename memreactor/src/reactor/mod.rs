//! The simulated reactor and its bookkeeping.
//!
//! ## Submodules
//!
//! - `sim_reactor` - [`SimReactor`]: clock, pool, transports, DNS and dispatch
//! - `connect` - Outgoing connection attempts and their handles
//! - `listen` - TCP and UDP listeners

pub mod connect;
pub mod listen;
pub mod sim_reactor;

pub use connect::{AttemptId, ConnectOptions, ConnectionAttempt, ConnectionHandle};
pub use listen::{ListeningPort, PortId, PortKind, TcpServer};
pub use sim_reactor::SimReactor;
