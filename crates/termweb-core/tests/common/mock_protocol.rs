//! Protocol handler and socket doubles.
//!
//! The handler only records which connections it was asked to start and
//! stop; tests then play the peer by calling into the engine directly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use termweb_core::keepalive::{Socket, Transport};
use termweb_core::scheduler::{ConnId, ProtocolHandler};
use termweb_core::Engine;

#[derive(Debug, Default)]
pub struct MockHandler {
    started: RefCell<Vec<ConnId>>,
    stopped: RefCell<Vec<ConnId>>,
}

impl MockHandler {
    pub fn started(&self) -> Vec<ConnId> {
        self.started.borrow().clone()
    }

    pub fn start_count(&self) -> usize {
        self.started.borrow().len()
    }

    pub fn stopped(&self) -> Vec<ConnId> {
        self.stopped.borrow().clone()
    }
}

impl ProtocolHandler for MockHandler {
    fn start(&self, _engine: &mut Engine, conn: ConnId) {
        self.started.borrow_mut().push(conn);
    }

    fn stop(&self, _engine: &mut Engine, conn: ConnId) {
        self.stopped.borrow_mut().push(conn);
    }
}

/// Socket whose readability is controlled by the test.
#[derive(Debug)]
pub struct FakeSocket {
    fd: i64,
    readable: Rc<Cell<bool>>,
}

impl Transport for FakeSocket {
    fn can_read(&self) -> bool {
        self.readable.get()
    }

    fn handle(&self) -> i64 {
        self.fd
    }
}

pub fn fake_socket(fd: i64) -> (Socket, Rc<Cell<bool>>) {
    let readable = Rc::new(Cell::new(false));
    let socket = FakeSocket {
        fd,
        readable: Rc::clone(&readable),
    };
    (Box::new(socket), readable)
}
