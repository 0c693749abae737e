//! The engine: cache, connection queue, keepalive pool and timers in one
//! explicit context.
//!
//! Everything runs on the caller's thread. The external event loop calls
//! [`Engine::tick`] when a deadline from [`Engine::next_deadline`] passes (or
//! after any call into the engine) and drains [`Engine::poll_events`].
//! Protocol handlers get `&mut Engine` and report through it.

mod admission;
mod cache_ops;
mod downloads;
mod lifecycle;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use crate::arena::Arena;
use crate::cache::CacheTable;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::host_limit::HostLimiter;
use crate::keepalive::KeepalivePool;
use crate::scheduler::queue::ConnQueue;
use crate::scheduler::{
    ActiveBudget, ConnId, Connection, DirectProxy, Download, DownloadEvent, ProtocolHandler,
    ProxyResolver, RetryPolicy,
};
use crate::timer::{TimerId, Timers};

/// Goodbye routine for a pooled socket that is about to be dropped (e.g. an
/// FTP `QUIT`). It runs on a fresh background connection that owns the
/// socket and must finish that connection.
pub struct ReclaimHook(Box<dyn FnOnce(&mut Engine, ConnId)>);

impl ReclaimHook {
    pub fn new(f: impl FnOnce(&mut Engine, ConnId) + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl fmt::Debug for ReclaimHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReclaimHook")
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerEvent {
    Receive(ConnId),
    Progress(ConnId),
    KeepaliveSweep,
}

pub struct Engine {
    cfg: EngineConfig,
    clock: Box<dyn Clock>,
    proxy: Box<dyn ProxyResolver>,
    handlers: HashMap<String, Rc<dyn ProtocolHandler>>,
    cache: CacheTable,
    connections: Arena<Connection>,
    queue: ConnQueue,
    downloads: Arena<Download>,
    events: VecDeque<DownloadEvent>,
    hosts: HostLimiter,
    budget: ActiveBudget,
    retry_policy: RetryPolicy,
    keepalive: KeepalivePool<ReclaimHook>,
    keepalive_timer: Option<TimerId>,
    timers: Timers<TimerEvent>,
    /// A queue check is due on the next tick.
    check_pending: bool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("connections", &self.queue.len())
            .field("active", &self.budget.in_use())
            .field("cache_entries", &self.cache.len())
            .field("cache_size", &self.cache.size())
            .field("keepalive", &self.keepalive.len())
            .field("check_pending", &self.check_pending)
            .finish()
    }
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cache: CacheTable::new(cfg.cache.clone()),
            budget: ActiveBudget::new(cfg.connection.max_connections),
            retry_policy: RetryPolicy {
                max_tries: cfg.connection.retries,
            },
            cfg,
            clock: Box::new(SystemClock),
            proxy: Box::new(DirectProxy),
            handlers: HashMap::new(),
            connections: Arena::new(),
            queue: ConnQueue::default(),
            downloads: Arena::new(),
            events: VecDeque::new(),
            hosts: HostLimiter::new(),
            keepalive: KeepalivePool::new(),
            keepalive_timer: None,
            timers: Timers::new(),
            check_pending: false,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_proxy(mut self, proxy: impl ProxyResolver + 'static) -> Self {
        self.proxy = Box::new(proxy);
        self
    }

    /// Route URIs with this scheme to `handler`.
    pub fn register_handler(&mut self, scheme: &str, handler: Rc<dyn ProtocolHandler>) {
        self.handlers.insert(scheme.to_ascii_lowercase(), handler);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Queued connections, most urgent first.
    pub fn queue(&self) -> &[ConnId] {
        self.queue.as_slice()
    }

    /// Connections in the queue (running or waiting).
    pub fn connections_count(&self) -> usize {
        self.queue.len()
    }

    pub fn connecting_count(&self) -> usize {
        self.count_queued(|c| c.state().is_connecting())
    }

    pub fn transferring_count(&self) -> usize {
        self.count_queued(|c| c.state().is_transferring())
    }

    pub fn keepalive_count(&self) -> usize {
        self.keepalive.len()
    }

    /// Running connections.
    pub fn active_connections(&self) -> usize {
        self.budget.in_use()
    }

    /// Running connections to the host of `uri`.
    pub fn host_connections(&self, uri: &crate::uri::Uri) -> usize {
        self.hosts.count(uri)
    }

    fn count_queued(&self, pred: impl Fn(&Connection) -> bool) -> usize {
        self.queue
            .as_slice()
            .iter()
            .filter_map(|&id| self.connections.get(id))
            .filter(|c| pred(c))
            .count()
    }

    /// Take the notifications queued since the last call, oldest first.
    pub fn poll_events(&mut self) -> Vec<DownloadEvent> {
        self.events.drain(..).collect()
    }

    /// Earliest pending timer, for the event loop's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// A queue check is waiting for the next [`Engine::tick`].
    pub fn has_pending_work(&self) -> bool {
        self.check_pending
    }

    /// Run due timers, then the deferred queue check.
    pub fn tick(&mut self) {
        let now = self.now();
        for (id, event) in self.timers.expire(now) {
            self.fire(id, event);
        }
        if self.check_pending {
            self.check_queue();
        }
    }

    fn fire(&mut self, id: TimerId, event: TimerEvent) {
        match event {
            TimerEvent::Receive(conn) => {
                let Some(c) = self.connections.get_mut(conn) else {
                    return;
                };
                if c.receive_timer != Some(id) {
                    return;
                }
                c.receive_timer = None;
                self.connection_timeout(conn);
            }
            TimerEvent::Progress(conn) => {
                let Some(c) = self.connections.get_mut(conn) else {
                    return;
                };
                if c.progress_timer != Some(id) {
                    return;
                }
                c.progress_timer = None;
                self.stat_timer(conn);
            }
            TimerEvent::KeepaliveSweep => {
                if self.keepalive_timer == Some(id) {
                    self.keepalive_timer = None;
                    self.check_keepalive_connections();
                }
            }
        }
    }

    /// Queue a check of the connection queue for the next tick.
    fn register_check_queue(&mut self) {
        self.check_pending = true;
    }

    /// Consistency checks on the queue; violations are logged.
    fn check_queue_bugs(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        if !self.queue.is_sorted(&self.connections) {
            tracing::error!("connection queue is not sorted");
        }
        let mut running = 0;
        for &id in self.queue.as_slice() {
            match self.connections.get(id) {
                Some(conn) => {
                    running += usize::from(conn.running);
                    if conn.state.is_result() {
                        tracing::error!(conn = %id, uri = %conn.uri, "finished connection on queue");
                    }
                }
                None => tracing::error!(conn = %id, "stale connection on queue"),
            }
        }
        if running != self.budget.in_use() {
            tracing::error!(
                counted = running,
                stored = self.budget.in_use(),
                "bad number of active connections"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use super::*;
    use crate::cache::CacheMode;
    use crate::clock::ManualClock;
    use crate::error::ConnError;
    use crate::scheduler::{ConnectionState, DownloadId, Priority, ProxyRoute};
    use crate::uri::Uri;

    #[derive(Default)]
    struct Recorder {
        started: RefCell<Vec<ConnId>>,
    }

    impl ProtocolHandler for Recorder {
        fn start(&self, _engine: &mut Engine, conn: ConnId) {
            self.started.borrow_mut().push(conn);
        }
    }

    struct FailingProxy;

    impl ProxyResolver for FailingProxy {
        fn resolve(&self, _uri: &Uri) -> Result<ProxyRoute, ConnError> {
            Err(ConnError::Proxy("no route".to_string()))
        }
    }

    fn uri(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    fn engine() -> (Engine, ManualClock, Rc<Recorder>) {
        let clock = ManualClock::new();
        let mut engine = Engine::new(EngineConfig::default()).with_clock(clock.clone());
        let recorder = Rc::new(Recorder::default());
        engine.register_handler("http", recorder.clone());
        (engine, clock, recorder)
    }

    fn load(engine: &mut Engine, u: &Uri, pri: Priority) -> DownloadId {
        let d = engine.create_download();
        engine
            .load_uri(u, None, Some(d), pri, CacheMode::Normal, 0)
            .unwrap();
        d
    }

    #[test]
    fn queued_connection_starts_on_tick() {
        let (mut engine, _clock, recorder) = engine();
        let d = load(&mut engine, &uri("http://example.com/"), Priority::Main);
        assert!(engine.has_pending_work());
        assert!(recorder.started.borrow().is_empty());

        engine.tick();
        let conn = engine.download(d).unwrap().connection().unwrap();
        assert_eq!(*recorder.started.borrow(), vec![conn]);
        assert_eq!(engine.active_connections(), 1);
        assert_eq!(engine.connecting_count(), 1);
        assert!(!engine.has_pending_work());

        let states: Vec<_> = engine.poll_events().into_iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Waiting,
                ConnectionState::Connecting(crate::scheduler::ConnectPhase::Dns)
            ]
        );
    }

    #[test]
    fn completed_transfer_is_served_from_cache() {
        let (mut engine, _clock, recorder) = engine();
        let u = uri("http://example.com/page");
        let first = load(&mut engine, &u, Priority::Main);
        engine.tick();
        let conn = engine.download(first).unwrap().connection().unwrap();
        engine.receive(conn, b"hello").unwrap();
        engine.abort(conn, Ok(()));

        let entry = engine.download(first).unwrap().cached().unwrap();
        assert!(!engine.cache().get(entry).unwrap().is_incomplete());
        assert_eq!(engine.connections_count(), 0);
        assert_eq!(engine.active_connections(), 0);
        engine.poll_events();

        let second = load(&mut engine, &u, Priority::Main);
        let events = engine.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].download, second);
        assert_eq!(events[0].state, ConnectionState::Done(Ok(())));
        assert_eq!(events[0].cached, Some(entry));
        assert_eq!(recorder.started.borrow().len(), 1);
    }

    #[test]
    fn missing_handler_finishes_with_unknown_protocol() {
        let (mut engine, _clock, _recorder) = engine();
        let d = load(&mut engine, &uri("gopher://example.com/"), Priority::Main);
        engine.tick();

        let download = engine.download(d).unwrap();
        assert_eq!(
            download.state(),
            &ConnectionState::Done(Err(ConnError::UnknownProtocol("gopher".into())))
        );
        assert!(download.connection().is_none());
        assert_eq!(engine.connections_count(), 0);
        assert_eq!(engine.active_connections(), 0);
    }

    #[test]
    fn proxy_failure_is_reported_to_the_download() {
        let (engine, _clock, _recorder) = engine();
        let mut engine = engine.with_proxy(FailingProxy);
        let d = engine.create_download();
        let err = engine
            .load_uri(
                &uri("http://example.com/"),
                None,
                Some(d),
                Priority::Main,
                CacheMode::Normal,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, ConnError::Proxy(_)));
        let events = engine.poll_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_final());
        assert_eq!(engine.connections_count(), 0);
    }

    #[test]
    fn retry_remembers_the_previous_error() {
        let (mut engine, _clock, recorder) = engine();
        let d = load(&mut engine, &uri("http://example.com/"), Priority::Main);
        engine.tick();
        let conn = engine.download(d).unwrap().connection().unwrap();

        engine.retry(conn, ConnError::Transport("reset".into()));
        assert_eq!(recorder.started.borrow().len(), 2);
        let c = engine.connection(conn).unwrap();
        assert_eq!(c.tries(), 1);
        assert!(c.is_running());
        assert_eq!(
            engine.download(d).unwrap().prev_error(),
            Some(&ConnError::Transport("reset".into()))
        );
        assert_eq!(engine.active_connections(), 1);
    }

    #[test]
    fn receive_timeout_retries_then_gives_up() {
        let (mut engine, clock, recorder) = engine();
        let d = load(&mut engine, &uri("http://example.com/"), Priority::Main);
        engine.tick();
        let conn = engine.download(d).unwrap().connection().unwrap();
        engine.set_state(conn, ConnectionState::Connecting(crate::scheduler::ConnectPhase::Sent));

        let timeout = engine.config().connection.receive_timeout(false);
        for _ in 0..3 {
            clock.advance(timeout + Duration::from_secs(1));
            engine.tick();
        }
        // Restarted connections begin in the DNS phase, where a timeout is final.
        assert_eq!(recorder.started.borrow().len(), 2);
        assert_eq!(
            engine.download(d).unwrap().state(),
            &ConnectionState::Done(Err(ConnError::Timeout))
        );
        assert_eq!(engine.connections_count(), 0);
    }

    #[test]
    fn progress_is_sampled_while_transferring() {
        let (mut engine, clock, _recorder) = engine();
        let d = load(&mut engine, &uri("http://example.com/big"), Priority::Main);
        engine.tick();
        let conn = engine.download(d).unwrap().connection().unwrap();
        engine.set_est_length(conn, Some(1000));
        engine.receive(conn, &[0; 100]).unwrap();
        engine.poll_events();

        clock.advance(crate::scheduler::SAMPLE_INTERVAL);
        engine.tick();
        let events = engine.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, ConnectionState::Transferring);
        let progress = engine.download(d).unwrap().progress().unwrap();
        assert_eq!(progress.pos, 100);
        assert_eq!(progress.size, Some(1000));
        assert_eq!(engine.transferring_count(), 1);
    }

    #[test]
    fn detach_requires_a_large_object_with_one_requester() {
        let (mut engine, _clock, _recorder) = engine();
        let threshold = engine.config().cache.detach_threshold();
        let d = load(&mut engine, &uri("http://example.com/iso"), Priority::Main);
        engine.tick();
        let conn = engine.download(d).unwrap().connection().unwrap();
        engine.receive(conn, &[7; 4096]).unwrap();

        engine.detach_connection(d, 1024);
        assert!(!engine.connection(conn).unwrap().is_detached());

        engine.set_est_length(conn, Some(threshold * 2));
        engine.detach_connection(d, 1024);
        assert!(engine.connection(conn).unwrap().is_detached());
        let entry = engine.connection(conn).unwrap().cached().unwrap();
        assert!(!engine.cache().get(entry).unwrap().is_valid());
        assert_eq!(engine.cache().get(entry).unwrap().data_size(), 4096 - 1024);

        // A detached connection is not shared.
        let other = load(&mut engine, &uri("http://example.com/iso"), Priority::Main);
        assert_ne!(engine.download(other).unwrap().connection(), Some(conn));
    }

    #[test]
    fn released_download_cancels_its_connection_in_the_background() {
        let (mut engine, _clock, _recorder) = engine();
        let d = load(&mut engine, &uri("http://example.com/"), Priority::Main);
        engine.tick();
        let conn = engine.download(d).unwrap().connection().unwrap();

        engine.release_download(d);
        assert!(engine.download(d).is_none());
        let c = engine.connection(conn).unwrap();
        assert_eq!(c.priority(), Priority::Cancel);
        assert!(c.is_running());

        engine.abort_background();
        assert_eq!(engine.connections_count(), 0);
        assert_eq!(engine.active_connections(), 0);
    }
}
