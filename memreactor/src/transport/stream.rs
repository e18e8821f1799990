//! The transport handle given to protocols.

use std::{rc::Rc, time::Duration};

use bytes::Bytes;
use tracing::instrument;

use crate::{
    SimulationError, SimulationResult,
    clock::VirtualClock,
    protocol::{Address, DisconnectReason, Producer, Protocol, Resume},
};

use super::state::{
    FlushStep, RegisteredProducer, TransportArena, TransportId, TransportRecord, TransportState,
    WeakTransportArena,
};

/// One direction of a simulated byte-stream connection.
///
/// Bytes written here are buffered and handed to the receiving protocol by a
/// flush scheduled on the clock, never during the write itself.
#[derive(Debug, Clone)]
pub struct SimTransport {
    arena: WeakTransportArena,
    id: TransportId,
}

impl PartialEq for SimTransport {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl SimTransport {
    pub(crate) fn new(arena: WeakTransportArena, id: TransportId) -> Self {
        Self { arena, id }
    }

    /// Identifier of this transport within its arena.
    pub fn id(&self) -> TransportId {
        self.id
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut TransportRecord) -> R) -> SimulationResult<R> {
        let arena = self.arena.upgrade()?;
        let mut inner = arena.inner.borrow_mut();
        let record = inner.record_mut(self.id)?;
        Ok(f(record))
    }

    fn clock(&self) -> SimulationResult<VirtualClock> {
        self.arena.upgrade()?.clock()
    }

    fn schedule_flush(&self) -> SimulationResult<()> {
        let transport = self.clone();
        self.clock()?
            .try_schedule(Duration::ZERO, move || transport.flush());
        Ok(())
    }

    /// Buffers `data` for delivery to the peer.
    ///
    /// Fails once a close has been requested. With autoflush on, a flush is
    /// scheduled for the next tick.
    #[instrument(skip(self, data), fields(transport = %self.id, len = data.len()))]
    pub fn write(&self, data: &[u8]) -> SimulationResult<()> {
        let autoflush = self.with_record(|record| {
            if record.state != TransportState::Connected {
                return Err(SimulationError::InvalidState(format!(
                    "write to {} transport {}",
                    record.state, record.id
                )));
            }
            record.buffer.extend_from_slice(data);
            Ok(record.autoflush)
        })??;

        if autoflush {
            self.schedule_flush()?;
        }
        Ok(())
    }

    /// Writes each chunk in order.
    pub fn write_sequence<I, B>(&self, chunks: I) -> SimulationResult<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for chunk in chunks {
            self.write(chunk.as_ref())?;
        }
        Ok(())
    }

    /// Delivers buffered bytes to the receiving protocol.
    pub fn flush(&self) -> SimulationResult<()> {
        self.flush_at_most(None)
    }

    /// Delivers at most `max_bytes` buffered bytes, or the configured per-flush
    /// limit when `None`. `Some(0)` delivers nothing.
    ///
    /// If the receiver has no transport attached yet the flush is retried on
    /// the next tick. A failing `data_received` is logged and leaves the bytes
    /// buffered.
    pub fn flush_at_most(&self, max_bytes: Option<usize>) -> SimulationResult<()> {
        let arena = self.arena.upgrade()?;
        let step = arena.inner.borrow_mut().prepare_flush(self.id, max_bytes)?;

        match step {
            FlushStep::Idle => Ok(()),
            FlushStep::Retry => self.schedule_flush(),
            FlushStep::Deliver { receiver, chunk } => self.deliver(&arena, receiver, chunk),
        }
    }

    fn deliver(
        &self,
        arena: &TransportArena,
        receiver: Rc<dyn Protocol>,
        chunk: Bytes,
    ) -> SimulationResult<()> {
        tracing::trace!("{}: delivering {} bytes", self.id, chunk.len());
        if let Err(err) = receiver.data_received(&chunk) {
            tracing::error!("{}: exception writing to protocol: {}", self.id, err);
            return arena.inner.borrow_mut().abandon_flush(self.id);
        }

        let again = arena
            .inner
            .borrow_mut()
            .complete_flush(self.id, chunk.len())?;
        if again {
            self.schedule_flush()?;
        }
        Ok(())
    }

    /// Closes gracefully.
    ///
    /// The owner's `connection_lost` is called right away. The transport stays
    /// `Disconnecting` until the buffer has been flushed. Calling this again
    /// does nothing.
    #[instrument(skip(self), fields(transport = %self.id))]
    pub fn lose_connection(&self, reason: DisconnectReason) -> SimulationResult<()> {
        let owner = self.with_record(|record| {
            if record.state != TransportState::Connected {
                return None;
            }
            record.state = TransportState::Disconnecting;
            Some(record.owner.clone())
        })?;
        let Some(owner) = owner else {
            return Ok(());
        };

        tracing::info!("{}: lose_connection({})", self.id, reason);
        if let Some(owner) = owner {
            owner.connection_lost(&reason);
        }

        self.with_record(|record| {
            if !record.buffer.is_empty() {
                tracing::info!(
                    "{}: delaying disconnect until {} buffered bytes are flushed",
                    record.id,
                    record.buffer.len()
                );
            } else if record.state == TransportState::Disconnecting {
                record.state = TransportState::Disconnected;
            }
        })
    }

    /// Closes immediately. Buffered bytes are never delivered.
    ///
    /// The owner is told only if no close had been requested before.
    #[instrument(skip(self), fields(transport = %self.id))]
    pub fn abort_connection(&self) -> SimulationResult<()> {
        let notify = self.with_record(|record| {
            let notify = if record.state == TransportState::Connected {
                record.owner.clone()
            } else {
                None
            };
            record.state = TransportState::Disconnected;
            notify
        })?;

        tracing::info!("{}: abort_connection()", self.id);
        if let Some(owner) = notify {
            owner.connection_lost(&DisconnectReason::Aborted);
        }
        Ok(())
    }

    /// Registers a producer feeding this transport.
    ///
    /// A non-streaming producer is resumed on the next tick and then every
    /// `producer_interval` until it is unregistered. When `resume_producing`
    /// returns a pending deferred, the next resume waits for it to succeed.
    /// Streaming producers are only stored.
    pub fn register_producer(
        &self,
        producer: Rc<dyn Producer>,
        streaming: bool,
    ) -> SimulationResult<()> {
        let generation = self.with_record(|record| {
            record.producer_generation += 1;
            record.producer = Some(RegisteredProducer {
                producer,
                streaming,
                generation: record.producer_generation,
            });
            record.producer_generation
        })?;

        tracing::debug!(
            "{}: registered {} producer",
            self.id,
            if streaming { "streaming" } else { "pull" }
        );
        if !streaming {
            self.schedule_pump(Duration::ZERO, generation)?;
        }
        Ok(())
    }

    /// Removes the registered producer. Pending pumps stop on their next tick.
    pub fn unregister_producer(&self) -> SimulationResult<()> {
        self.with_record(|record| {
            record.producer = None;
        })
    }

    /// Returns `true` if a producer is registered.
    pub fn has_producer(&self) -> SimulationResult<bool> {
        self.with_record(|record| record.producer.is_some())
    }

    fn schedule_pump(&self, delay: Duration, generation: u64) -> SimulationResult<()> {
        let transport = self.clone();
        self.clock()?
            .try_schedule(delay, move || transport.pump_producer(generation));
        Ok(())
    }

    fn pump_producer(&self, generation: u64) -> SimulationResult<()> {
        let current = self.with_record(|record| match &record.producer {
            Some(registered) if registered.generation == generation => Some((
                Rc::clone(&registered.producer),
                record.producer_interval,
            )),
            _ => None,
        })?;
        let Some((producer, interval)) = current else {
            tracing::trace!("{}: producer gone, pump stops", self.id);
            return Ok(());
        };

        match producer.resume_producing() {
            Resume::Ready => self.schedule_pump(interval, generation),
            Resume::Pending(deferred) => {
                let transport = self.clone();
                deferred.add_callback(move |result| match result {
                    Ok(()) => {
                        if let Err(err) = transport.schedule_pump(interval, generation) {
                            tracing::warn!("{}: cannot reschedule producer: {}", transport.id, err);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("{}: producer failed to resume: {}", transport.id, err);
                    }
                });
                Ok(())
            }
        }
    }

    fn producer(&self) -> SimulationResult<Option<Rc<dyn Producer>>> {
        self.with_record(|record| {
            record
                .producer
                .as_ref()
                .map(|registered| Rc::clone(&registered.producer))
        })
    }

    /// Forwards to the registered producer, if any.
    pub fn pause_producing(&self) -> SimulationResult<()> {
        if let Some(producer) = self.producer()? {
            producer.pause_producing();
        }
        Ok(())
    }

    /// Forwards to the registered producer, if any, and returns its answer.
    pub fn resume_producing(&self) -> SimulationResult<Option<Resume>> {
        Ok(self.producer()?.map(|producer| producer.resume_producing()))
    }

    /// Hands this transport to its owner and marks it ready to receive.
    ///
    /// Until the owner is attached, flushes from the peer are retried. Once it
    /// is, anything the peer still has buffered is flushed on the next tick.
    pub fn attach(&self) -> SimulationResult<()> {
        let owner = self.with_record(|record| {
            let owner = record.owner.clone();
            if owner.is_some() {
                record.attached = true;
            }
            owner
        })?;
        let owner = owner.ok_or_else(|| {
            SimulationError::InvalidState(format!("{} has no owner to attach", self.id))
        })?;

        tracing::debug!("{}: attached", self.id);
        owner.make_connection(self.clone());

        // Bytes the peer buffered while waiting for us may have run out of
        // retries.
        if let Some(peer) = self.peer()? {
            peer.kick_flush()?;
        }
        Ok(())
    }

    fn kick_flush(&self) -> SimulationResult<()> {
        let pending = self.with_record(|record| {
            record.autoflush
                && !record.buffer.is_empty()
                && record.state != TransportState::Disconnected
        })?;
        if pending {
            self.schedule_flush()?;
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SimulationResult<TransportState> {
        self.with_record(|record| record.state)
    }

    /// Bytes written but not yet delivered.
    pub fn buffered(&self) -> SimulationResult<Bytes> {
        self.with_record(|record| Bytes::copy_from_slice(&record.buffer))
    }

    /// Total bytes handed to the receiver so far.
    pub fn bytes_delivered(&self) -> SimulationResult<u64> {
        self.with_record(|record| record.bytes_delivered)
    }

    /// Turns scheduling a flush after each write on or off.
    pub fn set_autoflush(&self, autoflush: bool) -> SimulationResult<()> {
        self.with_record(|record| record.autoflush = autoflush)
    }

    /// Caps how many bytes one flush delivers. `None` is unbounded.
    pub fn set_max_bytes_per_flush(&self, max_bytes: Option<usize>) -> SimulationResult<()> {
        self.with_record(|record| record.max_bytes_per_flush = max_bytes)
    }

    /// The reverse direction of this connection, if it was created as a pair.
    pub fn peer(&self) -> SimulationResult<Option<SimTransport>> {
        let peer = self.with_record(|record| record.peer)?;
        Ok(peer.map(|id| SimTransport::new(self.arena.clone(), id)))
    }

    /// Local address of this endpoint.
    pub fn host_address(&self) -> SimulationResult<Option<Address>> {
        self.with_record(|record| record.host_address.clone())
    }

    /// Remote address of this endpoint.
    pub fn peer_address(&self) -> SimulationResult<Option<Address>> {
        self.with_record(|record| record.peer_address.clone())
    }

    /// Records the local and remote addresses.
    pub fn set_addresses(&self, host: Address, peer: Address) -> SimulationResult<()> {
        self.with_record(|record| {
            record.host_address = Some(host);
            record.peer_address = Some(peer);
        })
    }
}
