//! Tests for the simulated reactor.
//!
//! Covers name resolution, connection intercepts, cross-thread dispatch,
//! the inline worker pool and UDP listeners.

mod common;

use std::{
    cell::{Cell, RefCell},
    net::{IpAddr, Ipv4Addr},
    rc::Rc,
    time::Duration,
};

use bytes::Bytes;
use common::init_tracing;
use memreactor::{
    AccumulatingProtocol, Address, ConnectOptions, DatagramProtocol, PortKind, Protocol,
    SimReactor, SimulationError, connect_client_pair,
};

fn accumulating(_addr: &Address) -> Rc<dyn Protocol> {
    Rc::new(AccumulatingProtocol::new())
}

/// Registered names resolve; unknown names fail with a lookup error.
#[test]
fn test_dns_registered_and_unknown_names() {
    init_tracing();
    let reactor = SimReactor::new();
    let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
    reactor.register_dns("example.test", addr);

    let found = reactor.resolve_name("example.test");
    assert_eq!(found.result(), Some(Ok(addr)));

    let missing = reactor.resolve_name("nope.test");
    assert_eq!(
        missing.result(),
        Some(Err(SimulationError::DnsLookup("nope.test".to_string())))
    );
}

/// Resolution results can be awaited.
#[tokio::test]
async fn test_resolve_name_is_awaitable() {
    init_tracing();
    let reactor = SimReactor::new();
    let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    reactor.register_dns("localhost", addr);

    assert_eq!(reactor.resolve_name("localhost").await, Ok(addr));
    assert!(reactor.resolve_name("elsewhere").await.is_err());
}

/// The intercept sees the attempt before `connect_tcp` returns, and the
/// attempt can then be paired with a server.
#[test]
fn test_intercept_then_pair() {
    init_tracing();
    let reactor = SimReactor::new();
    let intercepted = Rc::new(RefCell::new(Vec::new()));

    let log = Rc::clone(&intercepted);
    reactor.register_connect_intercept("matrix.test", 8448, move |id| log.borrow_mut().push(id));
    let handle = reactor.connect_tcp("matrix.test", 8448, &accumulating, ConnectOptions::default());
    assert_eq!(*intercepted.borrow(), vec![handle.attempt_id()]);

    let (_client, server) = connect_client_pair(&reactor, handle.attempt_id()).unwrap();
    assert!(!handle.is_pending());
    assert!(reactor.pending_connections().is_empty());

    let server_side = server.transport().unwrap();
    let client_side = server_side.peer().unwrap().unwrap();
    assert_eq!(
        client_side.peer_address().unwrap(),
        Some(Address::new("matrix.test", 8448))
    );
    assert_eq!(
        client_side.host_address().unwrap(),
        Some(Address::new("127.0.0.1", 3423))
    );
}

/// Re-registering an intercept for the same address replaces the old one.
#[test]
fn test_intercept_replaced() {
    init_tracing();
    let reactor = SimReactor::new();
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));

    let counter = Rc::clone(&first);
    reactor.register_connect_intercept("host", 1, move |_| counter.set(counter.get() + 1));
    let counter = Rc::clone(&second);
    reactor.register_connect_intercept("host", 1, move |_| counter.set(counter.get() + 1));

    reactor.connect_tcp("host", 1, &accumulating, ConnectOptions::default());
    assert_eq!((first.get(), second.get()), (0, 1));
}

/// An abandoned attempt can no longer be paired.
#[test]
fn test_stop_connecting_forgets_attempt() {
    init_tracing();
    let reactor = SimReactor::new();
    let handle = reactor.connect_tcp("gone", 80, &accumulating, ConnectOptions::default());

    assert!(handle.stop_connecting());
    assert!(!handle.stop_connecting());
    assert_eq!(
        connect_client_pair(&reactor, handle.attempt_id()).err(),
        Some(SimulationError::UnknownConnectionAttempt(
            handle.attempt_id().as_u64()
        ))
    );
}

/// `call_from_thread` runs on the next tick, never inline.
#[tokio::test]
async fn test_call_from_thread_runs_next_tick() {
    init_tracing();
    let reactor = SimReactor::new();
    let ran = Rc::new(Cell::new(false));

    let flag = Rc::clone(&ran);
    let done = reactor.call_from_thread(move || flag.set(true));
    assert!(!ran.get());
    assert!(!done.is_resolved());

    reactor.run_ready().unwrap();
    assert!(ran.get());
    assert_eq!(done.await, Ok(()));
}

/// Pooled work resolves its deferred after the clock runs.
#[tokio::test]
async fn test_thread_pool_defer() {
    init_tracing();
    let reactor = SimReactor::new();
    let pool = reactor.thread_pool();
    pool.start();

    let result = pool.defer(|| Ok::<_, String>(6 * 7)).unwrap();
    assert!(!result.is_resolved());

    reactor.run_ready().unwrap();
    assert_eq!(result.await, Ok(42));
    assert_eq!(reactor.clock().now(), Duration::ZERO);
}

#[derive(Default)]
struct Collector {
    datagrams: RefCell<Vec<(Bytes, Address)>>,
}

impl DatagramProtocol for Collector {
    fn datagram_received(&self, data: &[u8], from: &Address) {
        self.datagrams
            .borrow_mut()
            .push((Bytes::copy_from_slice(data), from.clone()));
    }
}

/// Datagrams reach a listening UDP port on the next tick, truncated to the
/// packet size, and stop once the port stops listening.
#[test]
fn test_udp_delivery_and_stop_listening() {
    init_tracing();
    let reactor = SimReactor::new();
    let collector = Rc::new(Collector::default());
    let port = reactor.listen_udp(5353, collector.clone(), "0.0.0.0", 4);
    assert_eq!(port.kind(), PortKind::Udp);

    let from = Address::new("10.0.0.9", 40000);
    assert!(reactor.send_datagram(5353, b"abcdefgh", from.clone()));
    assert!(!reactor.send_datagram(5354, b"nobody", from.clone()));
    assert!(collector.datagrams.borrow().is_empty());

    reactor.run_ready().unwrap();
    assert_eq!(
        *collector.datagrams.borrow(),
        vec![(Bytes::from_static(b"abcd"), from.clone())]
    );

    assert!(reactor.send_datagram(5353, b"late", from.clone()));
    port.stop_listening();
    reactor.run_ready().unwrap();
    assert_eq!(collector.datagrams.borrow().len(), 1);
    assert!(!port.is_listening());

    port.start_listening();
    assert!(reactor.send_datagram(5353, b"back", from));
    reactor.run_ready().unwrap();
    assert_eq!(collector.datagrams.borrow().len(), 2);
}

/// TCP listeners are reported with their parameters.
#[test]
fn test_listen_tcp_recorded() {
    init_tracing();
    let reactor = SimReactor::new();
    let port = reactor.listen_tcp(8008, Rc::new(accumulating), 50, "127.0.0.1");

    assert!(port.is_listening());
    let servers = reactor.tcp_servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(
        (servers[0].port, servers[0].backlog, servers[0].interface.as_str()),
        (8008, 50, "127.0.0.1")
    );
}
