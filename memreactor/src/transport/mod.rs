//! Simulated byte-stream transports.
//!
//! ## Submodules
//!
//! - `state` - Transport records, lifecycle states and the owning arena
//! - `stream` - The [`SimTransport`] handle: writes, flushes, closes, producers

pub mod state;
pub mod stream;

pub use state::{TransportArena, TransportId, TransportState, WeakTransportArena};
pub use stream::SimTransport;
