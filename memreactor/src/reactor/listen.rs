//! Passive TCP and UDP endpoints.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::protocol::{DatagramProtocol, ProtocolFactory};

use super::sim_reactor::ReactorInner;

/// Identifier of a listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) u64);

/// Transport kind of a listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Stream listener.
    Tcp,
    /// Datagram listener.
    Udp,
}

pub(crate) enum Listener {
    Tcp {
        factory: Rc<dyn ProtocolFactory>,
        backlog: u32,
    },
    Udp {
        protocol: Rc<dyn DatagramProtocol>,
        max_packet_size: usize,
    },
}

pub(crate) struct ListenerRecord {
    pub(crate) listener: Listener,
    pub(crate) port: u16,
    pub(crate) interface: String,
    pub(crate) listening: bool,
}

impl ListenerRecord {
    pub(crate) fn kind(&self) -> PortKind {
        match self.listener {
            Listener::Tcp { .. } => PortKind::Tcp,
            Listener::Udp { .. } => PortKind::Udp,
        }
    }
}

impl fmt::Debug for ListenerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRecord")
            .field("kind", &self.kind())
            .field("port", &self.port)
            .field("interface", &self.interface)
            .field("listening", &self.listening)
            .finish()
    }
}

/// A registered TCP listener, as reported by `tcp_servers`.
#[derive(Clone)]
pub struct TcpServer {
    /// Port the listener was registered on.
    pub port: u16,
    /// Factory building server protocols.
    pub factory: Rc<dyn ProtocolFactory>,
    /// Requested accept backlog.
    pub backlog: u32,
    /// Interface the listener is bound to.
    pub interface: String,
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServer")
            .field("port", &self.port)
            .field("backlog", &self.backlog)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Handle onto a listener registered with the reactor.
#[derive(Debug, Clone)]
pub struct ListeningPort {
    pub(crate) reactor: Weak<RefCell<ReactorInner>>,
    pub(crate) id: PortId,
    pub(crate) kind: PortKind,
    pub(crate) port: u16,
    pub(crate) interface: String,
}

impl ListeningPort {
    /// Identifier of this listener.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// TCP or UDP.
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// Port number.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Interface the listener is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Resumes accepting.
    pub fn start_listening(&self) {
        self.set_listening(true);
    }

    /// Stops accepting. Datagrams sent afterwards are dropped.
    pub fn stop_listening(&self) {
        self.set_listening(false);
    }

    /// Returns `true` while the listener accepts.
    pub fn is_listening(&self) -> bool {
        self.reactor.upgrade().is_some_and(|inner| {
            inner
                .borrow()
                .ports
                .get(&self.id)
                .is_some_and(|record| record.listening)
        })
    }

    fn set_listening(&self, listening: bool) {
        let Some(inner) = self.reactor.upgrade() else {
            return;
        };
        if let Some(record) = inner.borrow_mut().ports.get_mut(&self.id) {
            record.listening = listening;
            tracing::debug!(
                "{:?} port {} on {}: listening={}",
                self.kind,
                self.port,
                self.interface,
                listening
            );
        }
    }
}
