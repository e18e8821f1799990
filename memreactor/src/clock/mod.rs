//! Virtual time for the simulation.
//!
//! ## Submodules
//!
//! - `queue` - Ordered callback queue with FIFO tie-breaking
//! - `virtual_clock` - The clock, its weak handle and cancellation handles

pub mod queue;
pub mod virtual_clock;

pub use queue::{CallbackKey, CallbackQueue, ScheduledCallback};
pub use virtual_clock::{DelayedCall, VirtualClock, WeakVirtualClock};
