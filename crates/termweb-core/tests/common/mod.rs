//! Shared helpers for engine integration tests.

#![allow(dead_code)]

pub mod mock_protocol;

use std::rc::Rc;

use termweb_core::cache::CacheMode;
use termweb_core::clock::ManualClock;
use termweb_core::config::EngineConfig;
use termweb_core::scheduler::{ConnId, DownloadId, Priority};
use termweb_core::{Engine, Uri};

use mock_protocol::MockHandler;

/// An engine on a manual clock with a recording handler for `http`.
pub struct Harness {
    pub engine: Engine,
    pub clock: ManualClock,
    pub http: Rc<MockHandler>,
}

pub fn harness(cfg: EngineConfig) -> Harness {
    let clock = ManualClock::new();
    let mut engine = Engine::new(cfg).with_clock(clock.clone());
    let http = Rc::new(MockHandler::default());
    engine.register_handler("http", http.clone());
    Harness {
        engine,
        clock,
        http,
    }
}

pub fn config(max_connections: usize, max_connections_to_host: usize) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.connection.max_connections = max_connections;
    cfg.connection.max_connections_to_host = max_connections_to_host;
    cfg
}

pub fn uri(s: &str) -> Uri {
    Uri::parse(s).unwrap()
}

/// Request `uri` for a fresh download.
pub fn request(engine: &mut Engine, uri: &Uri, pri: Priority) -> DownloadId {
    let d = engine.create_download();
    engine
        .load_uri(uri, None, Some(d), pri, CacheMode::Normal, 0)
        .unwrap();
    d
}

pub fn conn_of(engine: &Engine, d: DownloadId) -> ConnId {
    engine
        .download(d)
        .and_then(|d| d.connection())
        .expect("download has a connection")
}

pub fn is_running(engine: &Engine, conn: ConnId) -> bool {
    engine.connection(conn).is_some_and(|c| c.is_running())
}
