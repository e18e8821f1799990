//! The simulated reactor.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fmt,
    net::IpAddr,
    rc::Rc,
    time::Duration,
};
use tracing::instrument;

use crate::{
    SimulationError, SimulationResult,
    clock::{DelayedCall, VirtualClock},
    config::ReactorConfiguration,
    deferred::Deferred,
    pool::SyncWorkPool,
    protocol::{Address, DatagramProtocol, ProtocolFactory},
    transport::TransportArena,
};

use super::{
    connect::{AttemptId, ConnectOptions, ConnectionAttempt, ConnectionHandle},
    listen::{Listener, ListenerRecord, ListeningPort, PortId, PortKind, TcpServer},
};

type ConnectIntercept = Rc<dyn Fn(AttemptId)>;

/// Bookkeeping shared by the reactor and the handles it returns.
#[derive(Default)]
pub(crate) struct ReactorInner {
    pub(crate) dns: HashMap<String, IpAddr>,
    pub(crate) intercepts: HashMap<(String, u16), ConnectIntercept>,
    pub(crate) attempts: BTreeMap<AttemptId, ConnectionAttempt>,
    pub(crate) ports: BTreeMap<PortId, ListenerRecord>,
    next_attempt: u64,
    next_port: u64,
}

impl fmt::Debug for ReactorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorInner")
            .field("dns", &self.dns)
            .field("intercepts", &self.intercepts.keys().collect::<Vec<_>>())
            .field("attempts", &self.attempts)
            .field("ports", &self.ports)
            .finish()
    }
}

/// Deterministic stand-in for an event reactor.
///
/// Combines a [`VirtualClock`], a [`SyncWorkPool`] and a [`TransportArena`]
/// with the bookkeeping protocol code expects from a reactor: listeners,
/// outgoing connection attempts, a DNS table and cross-thread dispatch.
/// Nothing touches the network and nothing happens until the clock is
/// advanced.
#[derive(Debug, Clone)]
pub struct SimReactor {
    inner: Rc<RefCell<ReactorInner>>,
    clock: VirtualClock,
    pool: SyncWorkPool,
    transports: TransportArena,
    config: ReactorConfiguration,
}

impl Default for SimReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimReactor {
    /// Creates a reactor with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ReactorConfiguration::default())
    }

    /// Creates a reactor with a custom configuration.
    pub fn with_config(config: ReactorConfiguration) -> Self {
        let clock = VirtualClock::new();
        let pool = SyncWorkPool::new(&clock);
        let transports = TransportArena::new(&clock, config.transport.clone());
        Self {
            inner: Rc::new(RefCell::new(ReactorInner::default())),
            clock,
            pool,
            transports,
            config,
        }
    }

    /// The reactor's clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// The inline worker pool.
    pub fn thread_pool(&self) -> &SyncWorkPool {
        &self.pool
    }

    /// The arena holding every transport created for this reactor.
    pub fn transports(&self) -> &TransportArena {
        &self.transports
    }

    /// Configuration the reactor was built with.
    pub fn config(&self) -> &ReactorConfiguration {
        &self.config
    }

    /// Current logical time in seconds.
    pub fn seconds(&self) -> f64 {
        self.clock.now().as_secs_f64()
    }

    /// Schedules `action` after `delay`.
    pub fn call_later<F>(&self, delay: Duration, action: F) -> DelayedCall
    where
        F: FnOnce() + 'static,
    {
        self.clock.schedule(delay, action)
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) -> SimulationResult<()> {
        self.clock.advance(delta)
    }

    /// Runs everything already due.
    pub fn run_ready(&self) -> SimulationResult<()> {
        self.clock.run_ready()
    }

    /// Runs `callback` on the next tick, as if posted from another thread.
    ///
    /// The returned deferred succeeds once the callback has run.
    pub fn call_from_thread<F>(&self, callback: F) -> Deferred<()>
    where
        F: FnOnce() + 'static,
    {
        let deferred = Deferred::new();
        let completion = deferred.clone();
        self.clock.try_schedule(Duration::ZERO, move || {
            callback();
            completion.callback(())
        });
        deferred
    }

    /// Maps `name` to `addr` for [`resolve_name`](Self::resolve_name).
    pub fn register_dns(&self, name: impl Into<String>, addr: IpAddr) {
        let name = name.into();
        tracing::debug!("dns: {} -> {}", name, addr);
        self.inner.borrow_mut().dns.insert(name, addr);
    }

    /// Looks `name` up in the DNS table.
    ///
    /// The deferred is already resolved on return: with the address, or with
    /// [`SimulationError::DnsLookup`] for an unknown name.
    pub fn resolve_name(&self, name: &str) -> Deferred<IpAddr> {
        match self.inner.borrow().dns.get(name) {
            Some(addr) => Deferred::succeeded(*addr),
            None => {
                tracing::debug!("dns: unknown host {}", name);
                Deferred::failed(SimulationError::DnsLookup(name.to_string()))
            }
        }
    }

    /// Registers `callback` to run whenever `connect_tcp` targets
    /// `host:port`. A second registration for the same key replaces the first.
    pub fn register_connect_intercept<F>(&self, host: impl Into<String>, port: u16, callback: F)
    where
        F: Fn(AttemptId) + 'static,
    {
        self.inner
            .borrow_mut()
            .intercepts
            .insert((host.into(), port), Rc::new(callback));
    }

    /// Records an outgoing TCP connection attempt.
    ///
    /// The client protocol is built immediately. A registered intercept for
    /// `host:port` is called with the attempt id before this returns. No
    /// transport is created; pair the attempt with a server to connect it.
    #[instrument(skip(self, factory, options))]
    pub fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        factory: &dyn ProtocolFactory,
        options: ConnectOptions,
    ) -> ConnectionHandle {
        let destination = Address::new(host, port);
        let protocol = factory.build_protocol(&destination);

        let (attempt_id, intercept) = {
            let mut inner = self.inner.borrow_mut();
            let attempt_id = AttemptId(inner.next_attempt);
            inner.next_attempt += 1;
            inner.attempts.insert(
                attempt_id,
                ConnectionAttempt {
                    id: attempt_id,
                    destination: destination.clone(),
                    protocol,
                    timeout: options.timeout.unwrap_or(self.config.connect_timeout),
                    bind_address: options.bind_address,
                },
            );
            let intercept = inner.intercepts.get(&(host.to_string(), port)).cloned();
            (attempt_id, intercept)
        };

        tracing::info!("{} to {} recorded", attempt_id, destination);
        if let Some(intercept) = intercept {
            intercept(attempt_id);
        }

        ConnectionHandle {
            reactor: Rc::downgrade(&self.inner),
            attempt_id,
            destination,
        }
    }

    /// Attempts not yet paired or abandoned, oldest first.
    pub fn pending_connections(&self) -> Vec<AttemptId> {
        self.inner.borrow().attempts.keys().copied().collect()
    }

    /// Returns a copy of a pending attempt.
    pub fn connection_attempt(&self, attempt_id: AttemptId) -> Option<ConnectionAttempt> {
        self.inner.borrow().attempts.get(&attempt_id).cloned()
    }

    /// Removes a pending attempt so it can be paired.
    pub fn take_connection_attempt(
        &self,
        attempt_id: AttemptId,
    ) -> SimulationResult<ConnectionAttempt> {
        self.inner
            .borrow_mut()
            .attempts
            .remove(&attempt_id)
            .ok_or(SimulationError::UnknownConnectionAttempt(attempt_id.as_u64()))
    }

    fn add_listener(&self, listener: Listener, port: u16, interface: &str) -> ListeningPort {
        let mut inner = self.inner.borrow_mut();
        let id = PortId(inner.next_port);
        inner.next_port += 1;
        let record = ListenerRecord {
            listener,
            port,
            interface: interface.to_string(),
            listening: true,
        };
        let kind = record.kind();
        inner.ports.insert(id, record);
        tracing::info!("listening on {:?} {}:{}", kind, interface, port);

        ListeningPort {
            reactor: Rc::downgrade(&self.inner),
            id,
            kind,
            port,
            interface: interface.to_string(),
        }
    }

    /// Registers a TCP listener.
    pub fn listen_tcp(
        &self,
        port: u16,
        factory: Rc<dyn ProtocolFactory>,
        backlog: u32,
        interface: &str,
    ) -> ListeningPort {
        self.add_listener(Listener::Tcp { factory, backlog }, port, interface)
    }

    /// Registers a UDP listener.
    pub fn listen_udp(
        &self,
        port: u16,
        protocol: Rc<dyn DatagramProtocol>,
        interface: &str,
        max_packet_size: usize,
    ) -> ListeningPort {
        self.add_listener(
            Listener::Udp {
                protocol,
                max_packet_size,
            },
            port,
            interface,
        )
    }

    /// Every TCP listener registered so far, in registration order.
    pub fn tcp_servers(&self) -> Vec<TcpServer> {
        self.inner
            .borrow()
            .ports
            .values()
            .filter_map(|record| match &record.listener {
                Listener::Tcp { factory, backlog } => Some(TcpServer {
                    port: record.port,
                    factory: Rc::clone(factory),
                    backlog: *backlog,
                    interface: record.interface.clone(),
                }),
                Listener::Udp { .. } => None,
            })
            .collect()
    }

    /// Sends a datagram to the UDP listener on `port`.
    ///
    /// Delivery happens on the next tick, truncated to the listener's maximum
    /// packet size, and only if the listener is still listening then. Returns
    /// `false` when no listening UDP port matches at send time.
    pub fn send_datagram(&self, port: u16, data: &[u8], from: Address) -> bool {
        let target = self
            .inner
            .borrow()
            .ports
            .iter()
            .find(|(_, record)| {
                record.port == port && record.listening && record.kind() == PortKind::Udp
            })
            .map(|(id, _)| *id);
        let Some(port_id) = target else {
            tracing::debug!("datagram to {} dropped: nobody listening", port);
            return false;
        };

        let reactor = Rc::downgrade(&self.inner);
        let payload = data.to_vec();
        self.clock.schedule(Duration::ZERO, move || {
            let Some(inner) = reactor.upgrade() else {
                return;
            };
            let delivery = match inner.borrow().ports.get(&port_id) {
                Some(ListenerRecord {
                    listener:
                        Listener::Udp {
                            protocol,
                            max_packet_size,
                        },
                    listening: true,
                    ..
                }) => Some((Rc::clone(protocol), *max_packet_size)),
                _ => None,
            };
            match delivery {
                Some((protocol, max_packet_size)) => {
                    let len = payload.len().min(max_packet_size);
                    protocol.datagram_received(&payload[..len], &from);
                }
                None => tracing::debug!("datagram to {} dropped: listener stopped", port),
            }
        });
        true
    }
}
