use thiserror::Error;

/// Errors that can occur while driving a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// A weak handle outlived the clock or arena it points into.
    #[error("Simulation has been shut down")]
    SimulationShutdown,
    /// The simulation is in an invalid state, usually a bug in the code under test.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),
    /// A name was looked up that is not in the DNS table.
    #[error("DNS lookup failed: unknown host {0}")]
    DnsLookup(String),
    /// The drive loop ran out of ticks before the response completed.
    #[error("Timed out waiting for request to finish after {ticks} ticks")]
    TimedOut {
        /// Number of ticks that were advanced before giving up.
        ticks: u32,
    },
    /// No pending `connect_tcp` attempt carries this id.
    #[error("Unknown connection attempt {0}")]
    UnknownConnectionAttempt(u64),
    /// The response sink has not received any response yet.
    #[error("No result yet")]
    NoResponse,
    /// The response body could not be decoded.
    #[error("Malformed response body: {0}")]
    MalformedBody(String),
}

/// A type alias for `Result<T, SimulationError>`.
pub type SimulationResult<T> = Result<T, SimulationError>;

/// Failure raised by a protocol endpoint or producer.
///
/// Delivery failures are logged by the transport and never propagated to the
/// writer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProtocolError {
    message: String,
}

impl ProtocolError {
    /// Create a new protocol error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        SimulationError::MalformedBody(err.to_string())
    }
}
