//! Capturing responses written by an endpoint.

use std::{cell::RefCell, fmt, rc::Rc, time::Duration};

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;

use crate::{
    SimulationError, SimulationResult,
    clock::{VirtualClock, WeakVirtualClock},
    protocol::{Address, Producer, Resume},
};

/// Address reported as the peer of every captured request.
pub fn client_address() -> Address {
    Address::new("127.0.0.1", 3423)
}

/// Everything an endpoint wrote in response to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    /// Protocol version from the status line.
    pub version: Option<String>,
    /// Status code.
    pub code: Option<u16>,
    /// Reason phrase.
    pub reason: Option<String>,
    /// Headers in the order they were written.
    pub headers: Vec<(String, String)>,
    /// Body written so far.
    pub body: BytesMut,
    /// Set once the response is complete.
    pub done: bool,
}

impl ResponseRecord {
    fn is_empty(&self) -> bool {
        self.code.is_none() && self.body.is_empty() && !self.done
    }
}

struct SinkProducer {
    producer: Rc<dyn Producer>,
    streaming: bool,
    generation: u64,
}

#[derive(Default)]
struct SinkInner {
    record: ResponseRecord,
    producer: Option<SinkProducer>,
    generation: u64,
}

impl fmt::Debug for SinkInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkInner")
            .field("record", &self.record)
            .field("producer_streaming", &self.producer.as_ref().map(|p| p.streaming))
            .finish()
    }
}

/// The receiving end of a simulated request.
///
/// Endpoints write the status line, headers and body here and call
/// [`finish`](Self::finish). Cloning yields another handle onto the same
/// response.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    inner: Rc<RefCell<SinkInner>>,
    clock: WeakVirtualClock,
    producer_interval: Duration,
}

impl ResponseSink {
    /// Creates an empty sink whose producers are pumped on `clock` every
    /// `producer_interval`.
    pub fn new(clock: &VirtualClock, producer_interval: Duration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SinkInner::default())),
            clock: clock.downgrade(),
            producer_interval,
        }
    }

    fn ensure_open(&self) -> SimulationResult<()> {
        if self.inner.borrow().record.done {
            return Err(SimulationError::InvalidState(
                "response already finished".to_string(),
            ));
        }
        Ok(())
    }

    /// Records the status line and headers.
    pub fn write_headers(
        &self,
        version: &str,
        code: u16,
        reason: &str,
        headers: Vec<(String, String)>,
    ) -> SimulationResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.borrow_mut();
        inner.record.version = Some(version.to_string());
        inner.record.code = Some(code);
        inner.record.reason = Some(reason.to_string());
        inner.record.headers = headers;
        Ok(())
    }

    /// Appends to the body.
    pub fn write(&self, content: &[u8]) -> SimulationResult<()> {
        self.ensure_open()?;
        self.inner.borrow_mut().record.body.extend_from_slice(content);
        Ok(())
    }

    /// Marks the response complete. Later writes fail.
    pub fn finish(&self) {
        tracing::debug!("response finished");
        self.inner.borrow_mut().record.done = true;
    }

    /// Returns `true` once [`finish`](Self::finish) was called.
    pub fn is_done(&self) -> bool {
        self.inner.borrow().record.done
    }

    /// Registers the producer streaming the body.
    ///
    /// A non-streaming producer is resumed on the next tick and then every
    /// producer interval until unregistered.
    pub fn register_producer(
        &self,
        producer: Rc<dyn Producer>,
        streaming: bool,
    ) -> SimulationResult<()> {
        let generation = {
            let mut inner = self.inner.borrow_mut();
            inner.generation += 1;
            let generation = inner.generation;
            inner.producer = Some(SinkProducer {
                producer,
                streaming,
                generation,
            });
            generation
        };
        if !streaming {
            self.schedule_pump(Duration::ZERO, generation)?;
        }
        Ok(())
    }

    /// Drops the registered producer, if any.
    pub fn unregister_producer(&self) {
        self.inner.borrow_mut().producer = None;
    }

    /// The registered producer, if any.
    pub fn producer(&self) -> Option<Rc<dyn Producer>> {
        self.inner
            .borrow()
            .producer
            .as_ref()
            .map(|registered| Rc::clone(&registered.producer))
    }

    fn schedule_pump(&self, delay: Duration, generation: u64) -> SimulationResult<()> {
        let sink = self.clone();
        self.clock
            .upgrade()?
            .try_schedule(delay, move || sink.pump(generation));
        Ok(())
    }

    fn pump(&self, generation: u64) -> SimulationResult<()> {
        let producer = self.inner.borrow().producer.as_ref().and_then(|registered| {
            (registered.generation == generation).then(|| Rc::clone(&registered.producer))
        });
        let Some(producer) = producer else {
            return Ok(());
        };

        if let Resume::Pending(_) = producer.resume_producing() {
            tracing::trace!("sink producer resumed asynchronously");
        }
        self.schedule_pump(self.producer_interval, generation)
    }

    /// A copy of everything captured so far.
    pub fn record(&self) -> ResponseRecord {
        self.inner.borrow().record.clone()
    }

    fn with_result<R>(&self, f: impl FnOnce(&ResponseRecord) -> R) -> SimulationResult<R> {
        let inner = self.inner.borrow();
        if inner.record.is_empty() {
            return Err(SimulationError::NoResponse);
        }
        Ok(f(&inner.record))
    }

    /// Status code.
    pub fn code(&self) -> SimulationResult<u16> {
        self.with_result(|record| record.code)?
            .ok_or(SimulationError::NoResponse)
    }

    /// Headers in the order they were written.
    pub fn headers(&self) -> SimulationResult<Vec<(String, String)>> {
        self.with_result(|record| record.headers.clone())
    }

    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> SimulationResult<Option<String>> {
        self.with_result(|record| {
            record
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }

    /// Body written so far.
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.borrow().record.body)
    }

    /// Decodes the body as JSON.
    pub fn json_body<T: DeserializeOwned>(&self) -> SimulationResult<T> {
        let body = self.with_result(|record| Bytes::copy_from_slice(&record.body))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Peer address of the simulated connection.
    pub fn peer_address(&self) -> Address {
        client_address()
    }

    /// Local address of the simulated connection; never known.
    pub fn host_address(&self) -> Option<Address> {
        None
    }
}
