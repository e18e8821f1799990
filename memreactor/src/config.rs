//! Configuration for the simulated reactor, its transports and the drive loop.

use std::time::Duration;

/// Interval between two resumes of a pull-based producer, and the tick used
/// by the drive loop.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Default number of ticks the drive loop waits before timing out.
pub const DEFAULT_MAX_TICKS: u32 = 100;

/// Default number of times a flush is retried while the receiver is not
/// attached.
pub const DEFAULT_FLUSH_RETRY_LIMIT: u32 = 100;

/// Top-level configuration for a [`SimReactor`](crate::SimReactor).
#[derive(Debug, Clone)]
pub struct ReactorConfiguration {
    /// Settings applied to every transport created by the reactor.
    pub transport: TransportConfiguration,
    /// Settings for [`await_completion`](crate::await_completion).
    pub drive: DriveConfiguration,
    /// Timeout recorded on `connect_tcp` attempts when none is given.
    pub connect_timeout: Duration,
}

impl Default for ReactorConfiguration {
    fn default() -> Self {
        Self {
            transport: TransportConfiguration::default(),
            drive: DriveConfiguration::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-transport behaviour.
#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    /// Schedule a flush after every write and after every partial delivery.
    pub autoflush: bool,
    /// Upper bound on bytes handed to the peer in one flush. `None` is unbounded.
    pub max_bytes_per_flush: Option<usize>,
    /// Delay between two resumes of a non-streaming producer.
    pub producer_interval: Duration,
    /// How many times in a row a flush is rescheduled while the receiver has
    /// no transport attached. `None` retries forever, which never returns from
    /// `advance` if the receiver is never attached.
    pub flush_retry_limit: Option<u32>,
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        Self {
            autoflush: true,
            max_bytes_per_flush: None,
            producer_interval: DEFAULT_TICK,
            flush_retry_limit: Some(DEFAULT_FLUSH_RETRY_LIMIT),
        }
    }
}

impl TransportConfiguration {
    /// Deliver at most `max_bytes` per flush, exercising partial writes.
    pub fn chunked(max_bytes: usize) -> Self {
        Self {
            max_bytes_per_flush: Some(max_bytes),
            ..Self::default()
        }
    }

    /// Disable automatic flushing; the test calls `flush` by hand.
    pub fn manual_flush() -> Self {
        Self {
            autoflush: false,
            ..Self::default()
        }
    }
}

/// Settings for the request drive loop.
#[derive(Debug, Clone)]
pub struct DriveConfiguration {
    /// Virtual time advanced per iteration.
    pub tick: Duration,
    /// Iterations allowed before the loop reports a timeout.
    pub max_ticks: u32,
}

impl Default for DriveConfiguration {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            max_ticks: DEFAULT_MAX_TICKS,
        }
    }
}
