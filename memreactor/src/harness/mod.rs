//! Helpers for driving protocol and request code against a [`SimReactor`].
//!
//! ## Submodules
//!
//! - `sink` - [`ResponseSink`] capturing what an endpoint writes back
//! - `request` - [`SimRequest`] for building request bytes
//!
//! The free functions pair recorded connection attempts with servers and run
//! the clock until a response is complete.

pub mod request;
pub mod sink;

use std::rc::Rc;

use bytes::Bytes;
use tracing::instrument;

use crate::{
    SimulationError, SimulationResult,
    clock::VirtualClock,
    config::DriveConfiguration,
    protocol::{AccumulatingProtocol, Protocol},
    reactor::{AttemptId, SimReactor},
};

pub use request::SimRequest;
pub use sink::{ResponseRecord, ResponseSink, client_address};

/// Code that answers requests, such as an HTTP resource.
pub trait RequestEndpoint {
    /// Handles one request. The response may be written to `sink` now or on
    /// a later tick.
    fn request_received(&self, request: Bytes, sink: ResponseSink);
}

/// Connects a pending attempt to a fresh [`AccumulatingProtocol`] server.
///
/// Returns the client protocol built by `connect_tcp` and the server.
pub fn connect_client_pair(
    reactor: &SimReactor,
    attempt_id: AttemptId,
) -> SimulationResult<(Rc<dyn Protocol>, Rc<AccumulatingProtocol>)> {
    let server = Rc::new(AccumulatingProtocol::new());
    let client = connect_client_pair_with(reactor, attempt_id, server.clone())?;
    Ok((client, server))
}

/// Connects a pending attempt to `server`.
///
/// Builds both directions of the connection, hands the server its transport
/// first and then the client, and returns the client protocol.
#[instrument(skip(reactor, server))]
pub fn connect_client_pair_with(
    reactor: &SimReactor,
    attempt_id: AttemptId,
    server: Rc<dyn Protocol>,
) -> SimulationResult<Rc<dyn Protocol>> {
    let attempt = reactor.take_connection_attempt(attempt_id)?;
    let client = attempt.protocol();
    let (client_transport, server_transport) =
        reactor.transports().pair(Rc::clone(&client), server);

    let client_addr = client_address();
    let server_addr = attempt.destination().clone();
    client_transport.set_addresses(client_addr.clone(), server_addr.clone())?;
    server_transport.set_addresses(server_addr, client_addr)?;

    server_transport.attach()?;
    client_transport.attach()?;
    tracing::info!("{} connected to {}", attempt_id, attempt.destination());

    Ok(client)
}

/// Feeds `request` to `endpoint` with a fresh sink and returns the sink.
///
/// Nothing is awaited; see [`await_completion`].
pub fn drive_request(
    reactor: &SimReactor,
    endpoint: &dyn RequestEndpoint,
    request: &[u8],
) -> ResponseSink {
    let sink = ResponseSink::new(reactor.clock(), reactor.config().drive.tick);
    endpoint.request_received(Bytes::copy_from_slice(request), sink.clone());
    sink
}

/// Advances `clock` one default tick at a time until `sink` is finished.
///
/// Fails with [`SimulationError::TimedOut`] after `max_ticks` advances.
pub fn await_completion(
    clock: &VirtualClock,
    sink: &ResponseSink,
    max_ticks: u32,
) -> SimulationResult<()> {
    await_completion_with(
        clock,
        sink,
        &DriveConfiguration {
            max_ticks,
            ..DriveConfiguration::default()
        },
    )
}

/// Like [`await_completion`] with an explicit tick length and budget.
///
/// Ready callbacks run first. Each iteration then resumes the sink's
/// producer, if any, and advances by one tick.
#[instrument(skip(clock, sink))]
pub fn await_completion_with(
    clock: &VirtualClock,
    sink: &ResponseSink,
    config: &DriveConfiguration,
) -> SimulationResult<()> {
    clock.run_ready()?;
    let mut ticks = 0;

    while !sink.is_done() {
        if let Some(producer) = sink.producer() {
            let _ = producer.resume_producing();
        }

        if ticks >= config.max_ticks {
            tracing::warn!("response still pending after {} ticks", ticks);
            return Err(SimulationError::TimedOut { ticks });
        }

        clock.advance(config.tick)?;
        ticks += 1;
    }

    tracing::debug!("response finished after {} ticks", ticks);
    Ok(())
}

/// Sends `request` to `endpoint` and waits for the response, using the
/// reactor's drive configuration.
pub fn make_request(
    reactor: &SimReactor,
    endpoint: &dyn RequestEndpoint,
    request: &SimRequest,
) -> SimulationResult<ResponseSink> {
    render(reactor, endpoint, &request.to_bytes())
}

/// Feeds raw `request` bytes to `endpoint` and waits for the response.
pub fn render(
    reactor: &SimReactor,
    endpoint: &dyn RequestEndpoint,
    request: &[u8],
) -> SimulationResult<ResponseSink> {
    let sink = drive_request(reactor, endpoint, request);
    await_completion_with(reactor.clock(), &sink, &reactor.config().drive)?;
    Ok(sink)
}

