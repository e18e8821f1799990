//! Tests for the request drive loop and response capture.
//!
//! Validates that:
//! - A response written inline completes without advancing time
//! - Responses finished on a later tick are waited for
//! - Pull producers stream a body tick by tick
//! - A response that never finishes times out after exactly `max_ticks`

mod common;

use std::{cell::Cell, rc::Rc, time::Duration};

use bytes::Bytes;
use common::init_tracing;
use memreactor::{
    DriveConfiguration, Producer, ReactorConfiguration, RequestEndpoint, ResponseSink, Resume,
    SimReactor, SimRequest, SimulationError, SyncWorkPool, VirtualClock, await_completion,
    drive_request, make_request, render,
};
use serde_json::{Value, json};

/// Echoes the request line back as JSON, synchronously.
struct EchoEndpoint;

impl RequestEndpoint for EchoEndpoint {
    fn request_received(&self, request: Bytes, sink: ResponseSink) {
        let text = String::from_utf8_lossy(&request).to_string();
        let line = text.lines().next().unwrap_or_default().to_string();
        let body = json!({ "request_line": line }).to_string();

        sink.write_headers(
            "HTTP/1.1",
            200,
            "OK",
            vec![("Content-Type".to_string(), "application/json".to_string())],
        )
        .unwrap();
        sink.write(body.as_bytes()).unwrap();
        sink.finish();
    }
}

/// An inline response completes without moving the clock.
#[test]
fn test_inline_response_needs_no_ticks() {
    init_tracing();
    let reactor = SimReactor::new();
    let request = SimRequest::new("GET", "/versions").bearer("tok");

    let sink = make_request(&reactor, &EchoEndpoint, &request).unwrap();
    assert_eq!(sink.code(), Ok(200));
    assert_eq!(
        sink.json_body::<Value>().unwrap(),
        json!({ "request_line": "GET /versions HTTP/1.1" })
    );
    assert_eq!(reactor.clock().now(), Duration::ZERO);
}

/// Answers from the worker pool, two hops after the request.
struct PooledEndpoint {
    pool: SyncWorkPool,
}

impl RequestEndpoint for PooledEndpoint {
    fn request_received(&self, _request: Bytes, sink: ResponseSink) {
        self.pool
            .submit(
                || Ok::<_, String>(b"computed".to_vec()),
                move |result| {
                    let body = result.unwrap();
                    sink.write_headers("HTTP/1.1", 201, "Created", Vec::new())
                        .unwrap();
                    sink.write(&body).unwrap();
                    sink.finish();
                },
            )
            .unwrap();
    }
}

/// Work finished by the pool is picked up by the initial ready pass.
#[test]
fn test_pool_response_completes_in_ready_pass() {
    init_tracing();
    let reactor = SimReactor::new();
    let endpoint = PooledEndpoint {
        pool: reactor.thread_pool().clone(),
    };

    let sink = render(&reactor, &endpoint, b"POST /work HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(sink.code(), Ok(201));
    assert_eq!(sink.body(), Bytes::from_static(b"computed"));
    assert_eq!(reactor.clock().now(), Duration::ZERO);
}

/// Finishes the response after a fixed delay.
struct SlowEndpoint {
    clock: VirtualClock,
    delay: Duration,
}

impl RequestEndpoint for SlowEndpoint {
    fn request_received(&self, _request: Bytes, sink: ResponseSink) {
        self.clock.schedule(self.delay, move || {
            sink.write_headers("HTTP/1.1", 204, "No Content", Vec::new())
                .unwrap();
            sink.finish();
        });
    }
}

/// The loop advances whole ticks until the delayed response lands.
#[test]
fn test_delayed_response_waits_whole_ticks() {
    init_tracing();
    let reactor = SimReactor::new();
    let endpoint = SlowEndpoint {
        clock: reactor.clock().clone(),
        delay: Duration::from_millis(350),
    };

    let sink = drive_request(&reactor, &endpoint, b"GET / HTTP/1.1\r\n\r\n");
    assert!(!sink.is_done());
    await_completion(reactor.clock(), &sink, 10).unwrap();

    assert_eq!(sink.code(), Ok(204));
    assert_eq!(reactor.clock().now(), Duration::from_millis(400));
}

/// Writes one chunk per resume and finishes after three.
struct ChunkProducer {
    sink: ResponseSink,
    sent: Cell<u32>,
}

impl Producer for ChunkProducer {
    fn pause_producing(&self) {}

    fn resume_producing(&self) -> Resume {
        if self.sink.is_done() {
            return Resume::Ready;
        }
        let next = self.sent.get() + 1;
        self.sent.set(next);
        self.sink
            .write(format!("chunk{};", next).as_bytes())
            .unwrap();
        if next == 3 {
            self.sink.unregister_producer();
            self.sink.finish();
        }
        Resume::Ready
    }
}

struct StreamingEndpoint;

impl RequestEndpoint for StreamingEndpoint {
    fn request_received(&self, _request: Bytes, sink: ResponseSink) {
        sink.write_headers("HTTP/1.1", 200, "OK", Vec::new()).unwrap();
        let producer = Rc::new(ChunkProducer {
            sink: sink.clone(),
            sent: Cell::new(0),
        });
        sink.register_producer(producer, false).unwrap();
    }
}

/// A pull producer streams the whole body before the response finishes.
#[test]
fn test_producer_streams_body() {
    init_tracing();
    let reactor = SimReactor::new();

    let sink = render(&reactor, &StreamingEndpoint, b"GET /stream HTTP/1.1\r\n\r\n").unwrap();
    assert!(sink.is_done());
    assert_eq!(sink.body(), Bytes::from_static(b"chunk1;chunk2;chunk3;"));
    assert!(sink.producer().is_none());
}

/// Never answers.
struct SilentEndpoint;

impl RequestEndpoint for SilentEndpoint {
    fn request_received(&self, _request: Bytes, _sink: ResponseSink) {}
}

/// A response that never finishes times out after exactly `max_ticks`
/// advances, not before.
#[test]
fn test_timeout_after_exactly_max_ticks() {
    init_tracing();
    let reactor = SimReactor::new();
    let sink = drive_request(&reactor, &SilentEndpoint, b"GET / HTTP/1.1\r\n\r\n");

    let result = await_completion(reactor.clock(), &sink, 5);
    assert_eq!(result, Err(SimulationError::TimedOut { ticks: 5 }));
    assert_eq!(reactor.clock().now(), Duration::from_millis(500));
    assert_eq!(sink.code(), Err(SimulationError::NoResponse));
}

/// The reactor's drive configuration controls `render`.
#[test]
fn test_render_uses_reactor_drive_config() {
    init_tracing();
    let reactor = SimReactor::with_config(ReactorConfiguration {
        drive: DriveConfiguration {
            tick: Duration::from_millis(250),
            max_ticks: 3,
        },
        ..ReactorConfiguration::default()
    });

    let result = render(&reactor, &SilentEndpoint, b"GET / HTTP/1.1\r\n\r\n");
    assert!(matches!(result, Err(SimulationError::TimedOut { ticks: 3 })));
    assert_eq!(reactor.clock().now(), Duration::from_millis(750));
}

/// A finished response reports the fixed peer address.
#[test]
fn test_sink_reports_peer_address() {
    init_tracing();
    let reactor = SimReactor::new();
    let sink = drive_request(&reactor, &EchoEndpoint, b"GET / HTTP/1.1\r\n\r\n");

    assert!(sink.is_done());
    assert_eq!(sink.peer_address().to_string(), "127.0.0.1:3423");
    assert_eq!(sink.host_address(), None);
}
