//! Socket reuse through the keepalive pool.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::mock_protocol::fake_socket;
use common::{config, conn_of, harness, request, uri};
use termweb_core::scheduler::{ConnId, ConnectPhase, ConnectionState, Priority};
use termweb_core::ReclaimHook;

const IDLE: Duration = Duration::from_secs(60);

#[test]
fn kept_socket_is_reused_by_the_next_request() {
    let mut h = harness(config(10, 2));
    let first = request(&mut h.engine, &uri("http://a.example/1"), Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, first);
    h.engine.set_socket(conn, fake_socket(42).0);
    h.engine.receive(conn, b"one").unwrap();

    h.engine.keep_alive(conn, IDLE, None);
    assert_eq!(h.engine.keepalive_count(), 1);
    assert_eq!(h.engine.active_connections(), 0);
    assert_eq!(
        h.engine.download(first).unwrap().state(),
        &ConnectionState::Done(Ok(()))
    );
    let entry = h.engine.download(first).unwrap().cached().unwrap();
    assert!(!h.engine.cache().get(entry).unwrap().is_incomplete());

    let second = request(&mut h.engine, &uri("http://a.example/2"), Priority::Main);
    h.engine.tick();
    let next = conn_of(&h.engine, second);
    let c = h.engine.connection(next).unwrap();
    assert_eq!(c.socket().map(|s| s.handle()), Some(42));
    assert_eq!(c.state(), &ConnectionState::Connecting(ConnectPhase::Connect));
    assert_eq!(h.engine.keepalive_count(), 0);
}

#[test]
fn other_hosts_do_not_get_the_socket() {
    let mut h = harness(config(10, 2));
    let first = request(&mut h.engine, &uri("http://a.example/"), Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, first);
    h.engine.set_socket(conn, fake_socket(7).0);
    h.engine.keep_alive(conn, IDLE, None);

    let other = request(&mut h.engine, &uri("http://b.example/"), Priority::Main);
    h.engine.tick();
    let c = h.engine.connection(conn_of(&h.engine, other)).unwrap();
    assert!(!c.has_socket());
    assert_eq!(c.state(), &ConnectionState::Connecting(ConnectPhase::Dns));
    assert_eq!(h.engine.keepalive_count(), 1);
}

#[test]
fn readable_idle_sockets_are_closed_on_the_next_check() {
    let mut h = harness(config(10, 2));
    let d = request(&mut h.engine, &uri("http://a.example/"), Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, d);
    let (socket, readable) = fake_socket(3);
    h.engine.set_socket(conn, socket);
    h.engine.keep_alive(conn, IDLE, None);
    assert!(h.engine.next_deadline().is_some());

    readable.set(true);
    h.engine.tick();
    assert_eq!(h.engine.keepalive_count(), 0);
    assert!(h.engine.next_deadline().is_none());
}

#[test]
fn expired_socket_with_hook_gets_a_goodbye_connection() {
    let mut h = harness(config(10, 2));
    let d = request(&mut h.engine, &uri("http://ftp.example/pub/"), Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, d);
    h.engine.set_socket(conn, fake_socket(9).0);

    let seen: Rc<RefCell<Vec<(ConnId, Priority, Option<i64>)>>> = Rc::default();
    let record = Rc::clone(&seen);
    let hook = ReclaimHook::new(move |engine, goodbye| {
        let c = engine.connection(goodbye).unwrap();
        record
            .borrow_mut()
            .push((goodbye, c.priority(), c.socket().map(|s| s.handle())));
        engine.abort(goodbye, Ok(()));
    });
    h.engine.keep_alive(conn, Duration::from_secs(5), Some(hook));
    h.engine.tick();
    assert_eq!(h.engine.keepalive_count(), 1);

    let interval = Duration::from_millis(h.engine.config().keepalive.check_interval_ms);
    h.clock.advance(interval + Duration::from_secs(1));
    h.engine.tick();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, Priority::Cancel);
    assert_eq!(seen[0].2, Some(9));
    assert_eq!(h.engine.keepalive_count(), 0);
    assert_eq!(h.engine.connections_count(), 0);
    assert_eq!(h.engine.active_connections(), 0);
    assert_eq!(h.http.start_count(), 1);
}

#[test]
fn pool_overflow_evicts_the_oldest_sockets() {
    let mut cfg = config(10, 10);
    cfg.keepalive.max_connections = 2;
    let mut h = harness(cfg);
    for (i, host) in ["a", "b", "c"].iter().enumerate() {
        let d = request(&mut h.engine, &uri(&format!("http://{host}.example/")), Priority::Main);
        h.engine.tick();
        let conn = conn_of(&h.engine, d);
        h.engine.set_socket(conn, fake_socket(i as i64).0);
        h.engine.keep_alive(conn, IDLE, None);
    }
    h.engine.tick();
    assert_eq!(h.engine.keepalive_count(), 2);

    // The oldest (host a) is gone, so a new request dials again.
    let d = request(&mut h.engine, &uri("http://a.example/x"), Priority::Main);
    h.engine.tick();
    assert!(!h.engine.connection(conn_of(&h.engine, d)).unwrap().has_socket());
}

#[test]
fn abort_all_closes_pooled_sockets() {
    let mut h = harness(config(10, 2));
    let d = request(&mut h.engine, &uri("http://a.example/"), Priority::Main);
    h.engine.tick();
    let conn = conn_of(&h.engine, d);
    h.engine.set_socket(conn, fake_socket(1).0);
    h.engine.keep_alive(conn, IDLE, None);

    h.engine.abort_all();
    assert_eq!(h.engine.keepalive_count(), 0);
    assert!(h.engine.next_deadline().is_none());
}
