//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::{cell::Cell, rc::Rc};

use memreactor::{
    AccumulatingProtocol, Address, ConnectOptions, Producer, Protocol, Resume, SimReactor,
    connect_client_pair_with,
};

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Dials `server:8080`, pairs the attempt and returns `(client, server)`.
pub fn connected_pair(
    reactor: &SimReactor,
) -> (Rc<AccumulatingProtocol>, Rc<AccumulatingProtocol>) {
    let client = Rc::new(AccumulatingProtocol::new());
    let built = Rc::clone(&client);
    let factory = move |_addr: &Address| -> Rc<dyn Protocol> { built.clone() };

    let handle = reactor.connect_tcp("server", 8080, &factory, ConnectOptions::default());
    let server = Rc::new(AccumulatingProtocol::new());
    connect_client_pair_with(reactor, handle.attempt_id(), server.clone()).unwrap();
    (client, server)
}

/// Producer that only counts how often it is resumed.
#[derive(Debug, Default)]
pub struct CountingProducer {
    pub resumes: Cell<u32>,
    pub pauses: Cell<u32>,
}

impl Producer for CountingProducer {
    fn pause_producing(&self) {
        self.pauses.set(self.pauses.get() + 1);
    }

    fn resume_producing(&self) -> Resume {
        self.resumes.set(self.resumes.get() + 1);
        Resume::Ready
    }
}
