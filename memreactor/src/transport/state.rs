//! Transport records and the arena that owns them.
//!
//! Both directions of a connection live in the same [`TransportArena`] and
//! refer to each other by [`TransportId`]. Handles given to protocols are weak,
//! so a protocol holding its transport never keeps the arena alive.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use bytes::{Bytes, BytesMut};

use crate::{
    SimulationError, SimulationResult,
    clock::{VirtualClock, WeakVirtualClock},
    config::TransportConfiguration,
    protocol::{Address, Producer, Protocol},
};

use super::stream::SimTransport;

/// Unique identifier for a transport within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub(crate) u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Lifecycle of a transport.
///
/// ```text
/// Connected --lose_connection--> Disconnecting --drained--> Disconnected
///     |                                                           ^
///     +--------------------abort_connection-----------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Writes are accepted.
    #[default]
    Connected,
    /// Close was requested; buffered bytes are still being flushed.
    Disconnecting,
    /// Terminal. Nothing more is delivered.
    Disconnected,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Connected => write!(f, "connected"),
            TransportState::Disconnecting => write!(f, "disconnecting"),
            TransportState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A producer registered on a transport.
///
/// The generation ties scheduled pumps to one registration, so a pump left
/// over from an earlier producer stops instead of driving the new one.
pub(crate) struct RegisteredProducer {
    pub(crate) producer: Rc<dyn Producer>,
    pub(crate) streaming: bool,
    pub(crate) generation: u64,
}

/// Internal state of one transport direction.
pub(crate) struct TransportRecord {
    pub(crate) id: TransportId,
    /// Protocol that receives the bytes written to this transport.
    pub(crate) receiver: Rc<dyn Protocol>,
    /// Local protocol notified on close.
    pub(crate) owner: Option<Rc<dyn Protocol>>,
    /// Reverse direction of the same connection.
    pub(crate) peer: Option<TransportId>,
    /// Bytes written but not yet delivered.
    pub(crate) buffer: BytesMut,
    pub(crate) producer: Option<RegisteredProducer>,
    pub(crate) producer_generation: u64,
    pub(crate) state: TransportState,
    pub(crate) autoflush: bool,
    pub(crate) max_bytes_per_flush: Option<usize>,
    pub(crate) producer_interval: Duration,
    pub(crate) flush_retry_limit: Option<u32>,
    pub(crate) flush_retries: u32,
    /// Set while a chunk is inside the receiver's `data_received`.
    pub(crate) delivering: bool,
    /// Whether the owner has been handed this transport.
    pub(crate) attached: bool,
    pub(crate) host_address: Option<Address>,
    pub(crate) peer_address: Option<Address>,
    pub(crate) bytes_delivered: u64,
}

impl TransportRecord {
    fn new(
        id: TransportId,
        receiver: Rc<dyn Protocol>,
        owner: Option<Rc<dyn Protocol>>,
        config: &TransportConfiguration,
    ) -> Self {
        Self {
            id,
            receiver,
            owner,
            peer: None,
            buffer: BytesMut::new(),
            producer: None,
            producer_generation: 0,
            state: TransportState::Connected,
            autoflush: config.autoflush,
            max_bytes_per_flush: config.max_bytes_per_flush,
            producer_interval: config.producer_interval,
            flush_retry_limit: config.flush_retry_limit,
            flush_retries: 0,
            delivering: false,
            attached: false,
            host_address: None,
            peer_address: None,
            bytes_delivered: 0,
        }
    }
}

impl fmt::Debug for TransportRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRecord")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("producer_streaming", &self.producer.as_ref().map(|p| p.streaming))
            .field("delivering", &self.delivering)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

/// What a flush should do once the arena borrow is released.
pub(crate) enum FlushStep {
    /// Nothing to deliver.
    Idle,
    /// The receiver is not ready; try again next tick.
    Retry,
    /// Hand `chunk` to `receiver`.
    Deliver {
        receiver: Rc<dyn Protocol>,
        chunk: Bytes,
    },
}

#[derive(Debug)]
pub(crate) struct ArenaInner {
    pub(crate) clock: WeakVirtualClock,
    pub(crate) config: TransportConfiguration,
    pub(crate) records: HashMap<TransportId, TransportRecord>,
    next_id: u64,
}

impl ArenaInner {
    pub(crate) fn record(&self, id: TransportId) -> SimulationResult<&TransportRecord> {
        self.records
            .get(&id)
            .ok_or_else(|| SimulationError::InvalidState(format!("{} not found", id)))
    }

    pub(crate) fn record_mut(&mut self, id: TransportId) -> SimulationResult<&mut TransportRecord> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| SimulationError::InvalidState(format!("{} not found", id)))
    }

    fn insert(
        &mut self,
        receiver: Rc<dyn Protocol>,
        owner: Option<Rc<dyn Protocol>>,
    ) -> TransportId {
        let id = TransportId(self.next_id);
        self.next_id += 1;
        let record = TransportRecord::new(id, receiver, owner, &self.config);
        self.records.insert(id, record);
        id
    }

    /// Decides what a flush of `id` does, without calling into any protocol.
    ///
    /// A flush requested while an earlier chunk is still being delivered is
    /// a no-op; the outer flush reschedules itself for whatever remains.
    pub(crate) fn prepare_flush(
        &mut self,
        id: TransportId,
        max_bytes: Option<usize>,
    ) -> SimulationResult<FlushStep> {
        // A one-way transport has no reverse direction to wait on.
        let receiver_ready = match self.record(id)?.peer {
            None => true,
            Some(peer) => self.records.get(&peer).is_some_and(|p| p.attached),
        };

        let record = self.record_mut(id)?;
        if record.buffer.is_empty()
            || record.state == TransportState::Disconnected
            || max_bytes == Some(0)
        {
            return Ok(FlushStep::Idle);
        }
        if record.delivering {
            tracing::trace!("{}: flush requested during delivery, skipped", id);
            return Ok(FlushStep::Idle);
        }

        if !receiver_ready {
            if !record.autoflush {
                return Ok(FlushStep::Idle);
            }
            if let Some(limit) = record.flush_retry_limit {
                if record.flush_retries >= limit {
                    tracing::warn!(
                        "{}: receiver has no transport after {} retries, {} bytes stay buffered",
                        id,
                        limit,
                        record.buffer.len()
                    );
                    return Ok(FlushStep::Idle);
                }
            }
            record.flush_retries += 1;
            tracing::trace!("{}: receiver has no transport yet, rescheduling flush", id);
            return Ok(FlushStep::Retry);
        }

        let limit = max_bytes
            .or(record.max_bytes_per_flush)
            .unwrap_or(record.buffer.len())
            .max(1)
            .min(record.buffer.len());
        let chunk = Bytes::copy_from_slice(&record.buffer[..limit]);
        record.delivering = true;

        Ok(FlushStep::Deliver {
            receiver: Rc::clone(&record.receiver),
            chunk,
        })
    }

    /// Drops `delivered` bytes from the front of the buffer and finishes a
    /// pending graceful close. Returns whether another flush is needed.
    pub(crate) fn complete_flush(
        &mut self,
        id: TransportId,
        delivered: usize,
    ) -> SimulationResult<bool> {
        let record = self.record_mut(id)?;
        let delivered = delivered.min(record.buffer.len());
        let _ = record.buffer.split_to(delivered);
        record.delivering = false;
        record.flush_retries = 0;
        record.bytes_delivered += delivered as u64;

        if record.buffer.is_empty() && record.state == TransportState::Disconnecting {
            tracing::info!("{}: buffer now empty, completing disconnect", id);
            record.state = TransportState::Disconnected;
        }

        Ok(!record.buffer.is_empty()
            && record.autoflush
            && record.state != TransportState::Disconnected)
    }

    /// Ends a delivery the receiver refused. The chunk stays buffered.
    pub(crate) fn abandon_flush(&mut self, id: TransportId) -> SimulationResult<()> {
        self.record_mut(id)?.delivering = false;
        Ok(())
    }

    fn is_closed(&self, record: &TransportRecord) -> bool {
        let peer_closed = match record.peer {
            None => true,
            Some(peer) => self
                .records
                .get(&peer)
                .is_none_or(|p| p.state == TransportState::Disconnected && !p.delivering),
        };
        record.state == TransportState::Disconnected && !record.delivering && peer_closed
    }
}

/// Owner of every simulated transport in a run.
#[derive(Debug, Clone)]
pub struct TransportArena {
    pub(crate) inner: Rc<RefCell<ArenaInner>>,
}

impl TransportArena {
    /// Creates an empty arena whose transports schedule flushes on `clock`.
    pub fn new(clock: &VirtualClock, config: TransportConfiguration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ArenaInner {
                clock: clock.downgrade(),
                config,
                records: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Opens a one-way transport delivering into `receiver`.
    ///
    /// `owner` is the protocol writing through the transport; it is notified
    /// of connection loss. The caller hands the transport to the writer.
    pub fn open(
        &self,
        receiver: Rc<dyn Protocol>,
        owner: Option<Rc<dyn Protocol>>,
    ) -> SimTransport {
        let id = self.inner.borrow_mut().insert(receiver, owner);
        tracing::debug!("opened {}", id);
        SimTransport::new(self.downgrade(), id)
    }

    /// Creates both directions of a connection between `client` and `server`.
    ///
    /// Returns `(client_transport, server_transport)`: the client writes
    /// through the first, which delivers into the server, and vice versa.
    /// Neither side is attached yet; see [`SimTransport::attach`].
    pub fn pair(
        &self,
        client: Rc<dyn Protocol>,
        server: Rc<dyn Protocol>,
    ) -> (SimTransport, SimTransport) {
        let mut inner = self.inner.borrow_mut();
        let client_id = inner.insert(Rc::clone(&server), Some(Rc::clone(&client)));
        let server_id = inner.insert(client, Some(server));

        if let Some(record) = inner.records.get_mut(&client_id) {
            record.peer = Some(server_id);
        }
        if let Some(record) = inner.records.get_mut(&server_id) {
            record.peer = Some(client_id);
        }
        tracing::debug!("paired {} <-> {}", client_id, server_id);

        let weak = self.downgrade();
        (
            SimTransport::new(weak.clone(), client_id),
            SimTransport::new(weak, server_id),
        )
    }

    /// Returns a handle for an existing transport.
    pub fn get(&self, id: TransportId) -> Option<SimTransport> {
        self.inner
            .borrow()
            .records
            .contains_key(&id)
            .then(|| SimTransport::new(self.downgrade(), id))
    }

    /// Drops every transport whose connection is fully disconnected.
    ///
    /// A pair is removed only once both directions are `Disconnected`.
    /// Handles onto removed transports fail with
    /// [`SimulationError::InvalidState`]. Returns how many were removed.
    pub fn remove_closed(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let closed: Vec<TransportId> = inner
            .records
            .values()
            .filter(|record| inner.is_closed(record))
            .map(|record| record.id)
            .collect();
        for id in &closed {
            inner.records.remove(id);
        }
        if !closed.is_empty() {
            tracing::debug!("removed {} closed transports", closed.len());
        }
        closed.len()
    }

    /// Returns the number of transports still tracked.
    ///
    /// Closed transports are kept until [`remove_closed`](Self::remove_closed).
    pub fn len(&self) -> usize {
        self.inner.borrow().records.len()
    }

    /// Returns `true` if no transport has been opened.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().records.is_empty()
    }

    /// Creates a weak handle onto this arena.
    pub fn downgrade(&self) -> WeakTransportArena {
        WeakTransportArena {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn clock(&self) -> SimulationResult<VirtualClock> {
        self.inner.borrow().clock.upgrade()
    }
}

/// Weak handle onto a [`TransportArena`].
#[derive(Debug, Clone)]
pub struct WeakTransportArena {
    inner: Weak<RefCell<ArenaInner>>,
}

impl WeakTransportArena {
    /// Upgrades to a strong handle, failing once the arena has been dropped.
    pub fn upgrade(&self) -> SimulationResult<TransportArena> {
        self.inner
            .upgrade()
            .map(|inner| TransportArena { inner })
            .ok_or(SimulationError::SimulationShutdown)
    }
}
