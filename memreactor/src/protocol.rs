//! Capability interfaces implemented by the code under test.
//!
//! The reactor and transports only ever talk to protocols, factories and
//! producers through these traits. Methods take `&self`: endpoints keep their
//! own interior mutability, which lets a transport call back into a protocol
//! that is itself in the middle of a call (a protocol closing its transport
//! from inside `data_received`, for example).

use std::{cell::RefCell, fmt, rc::Rc};

use bytes::{Bytes, BytesMut};

use crate::{ProtocolError, deferred::Deferred, transport::SimTransport};

/// Host and port of a simulated endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Hostname or textual IP address.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl Address {
    /// Creates a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed cleanly by the local side.
    Done,
    /// Closed with an explanation.
    Lost(String),
    /// Hard reset, buffered data discarded.
    Aborted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Done => write!(f, "connection done"),
            DisconnectReason::Lost(reason) => write!(f, "connection lost: {}", reason),
            DisconnectReason::Aborted => write!(f, "connection aborted"),
        }
    }
}

/// A byte-stream protocol endpoint.
pub trait Protocol {
    /// Called once the endpoint has a transport to write through.
    fn make_connection(&self, transport: SimTransport);

    /// Called with bytes written by the peer.
    ///
    /// An error is logged by the delivering transport; the bytes stay buffered.
    fn data_received(&self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Called when the local transport is closed or aborted.
    fn connection_lost(&self, reason: &DisconnectReason);
}

/// Builds client protocols for outgoing connections.
pub trait ProtocolFactory {
    /// Builds the protocol for a connection to `addr`.
    fn build_protocol(&self, addr: &Address) -> Rc<dyn Protocol>;
}

impl<F> ProtocolFactory for F
where
    F: Fn(&Address) -> Rc<dyn Protocol>,
{
    fn build_protocol(&self, addr: &Address) -> Rc<dyn Protocol> {
        self(addr)
    }
}

/// Outcome of [`Producer::resume_producing`].
#[derive(Debug, Clone)]
pub enum Resume {
    /// The producer finished this round synchronously.
    Ready,
    /// The round completes when the deferred resolves.
    Pending(Deferred<(), ProtocolError>),
}

/// A flow-control source feeding a consumer.
pub trait Producer {
    /// Asks the producer to stop emitting data for now.
    fn pause_producing(&self);

    /// Asks the producer for more data.
    fn resume_producing(&self) -> Resume;
}

/// Receives datagrams on a listening UDP port.
pub trait DatagramProtocol {
    /// Called with one datagram and the address it came from.
    fn datagram_received(&self, data: &[u8], from: &Address);
}

/// Protocol that records everything it receives.
///
/// Used as the server side of [`connect_client_pair`](crate::connect_client_pair).
#[derive(Debug, Default)]
pub struct AccumulatingProtocol {
    received: RefCell<BytesMut>,
    transport: RefCell<Option<SimTransport>>,
    lost: RefCell<Option<DisconnectReason>>,
}

impl AccumulatingProtocol {
    /// Creates an endpoint with nothing received yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in delivery order.
    pub fn received(&self) -> Bytes {
        Bytes::copy_from_slice(&self.received.borrow())
    }

    /// The transport handed over by `make_connection`.
    pub fn transport(&self) -> Option<SimTransport> {
        self.transport.borrow().clone()
    }

    /// The reason passed to `connection_lost`, if it has been called.
    pub fn lost_reason(&self) -> Option<DisconnectReason> {
        self.lost.borrow().clone()
    }
}

impl Protocol for AccumulatingProtocol {
    fn make_connection(&self, transport: SimTransport) {
        *self.transport.borrow_mut() = Some(transport);
    }

    fn data_received(&self, data: &[u8]) -> Result<(), ProtocolError> {
        self.received.borrow_mut().extend_from_slice(data);
        Ok(())
    }

    fn connection_lost(&self, reason: &DisconnectReason) {
        *self.lost.borrow_mut() = Some(reason.clone());
    }
}
