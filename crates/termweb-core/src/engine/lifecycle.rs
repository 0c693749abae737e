//! Connection state changes, timers and the ways a connection ends.

use std::time::Duration;

use crate::cache::CacheMode;
use crate::error::ConnError;
use crate::keepalive::{Pooled, Socket};
use crate::scheduler::{
    ConnId, ConnectPhase, Connection, ConnectionState, DownloadEvent, Priority, PriorityCounts,
    RetryDecision, SAMPLE_INTERVAL,
};

use super::{Engine, ReclaimHook, TimerEvent};

impl Engine {
    /// Move a connection to `state` and tell its downloads.
    ///
    /// Leaving a result for a progress state (a retry) remembers the error.
    /// Progress is sampled only while transferring. Only progress states are
    /// announced here; results are announced once, when the connection is
    /// finished.
    pub fn set_state(&mut self, id: ConnId, state: ConnectionState) {
        let now = self.now();
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        if !conn.running && state.is_progress() && state != ConnectionState::Waiting {
            tracing::debug!(conn = %id, ?state, "ignoring progress of a stopped connection");
            return;
        }

        if conn.state.is_result() && state.is_progress() {
            conn.prev_error = conn.state.error().cloned();
        }
        conn.state = state.clone();

        if state.is_transferring() {
            if conn.progress_timer.is_none() {
                conn.progress
                    .update(now, conn.received, conn.est_length, conn.from);
                conn.progress_timer = Some(
                    self.timers
                        .install(now + SAMPLE_INTERVAL, TimerEvent::Progress(id)),
                );
            }
        } else {
            self.timers.kill(&mut conn.progress_timer);
        }

        for &did in &conn.downloads {
            if let Some(download) = self.downloads.get_mut(did) {
                download.state = state.clone();
                download.prev_error = conn.prev_error.clone();
            }
        }

        if state.is_progress() {
            self.notify(id);
        }
    }

    fn notify(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        for &did in &conn.downloads {
            let Some(download) = self.downloads.get_mut(did) else {
                continue;
            };
            download.cached = conn.cached;
            download.progress = Some(conn.progress.clone());
            self.events.push_back(DownloadEvent {
                download: did,
                state: download.state.clone(),
                cached: conn.cached,
            });
        }
    }

    /// (Re)arm the receive timeout. Handlers call this whenever the peer
    /// shows signs of life.
    pub fn set_timeout(&mut self, id: ConnId) {
        let now = self.now();
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        let timeout = self.cfg.connection.receive_timeout(conn.unrestartable);
        self.timers.kill(&mut conn.receive_timer);
        conn.receive_timer = Some(self.timers.install(now + timeout, TimerEvent::Receive(id)));
    }

    pub(super) fn connection_timeout(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        tracing::info!(conn = %id, uri = %conn.uri, state = ?conn.state, "connection timed out");
        if conn.state == ConnectionState::Connecting(ConnectPhase::Dns) {
            self.abort(id, Err(ConnError::Timeout));
        } else {
            self.retry(id, ConnError::Timeout);
        }
    }

    pub(super) fn stat_timer(&mut self, id: ConnId) {
        let now = self.now();
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        conn.progress
            .update(now, conn.received, conn.est_length, conn.from);
        if conn.state.is_transferring() {
            conn.progress_timer = Some(
                self.timers
                    .install(now + SAMPLE_INTERVAL, TimerEvent::Progress(id)),
            );
        }
        self.notify(id);
    }

    /// Release what a running connection holds: its host slot and its global
    /// unit, then stop its handler and close its socket. The connection stays
    /// queued.
    pub(super) fn interrupt_connection(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        if !conn.running {
            tracing::error!(conn = %id, "interrupting a connection that is not running");
            return;
        }
        conn.running = false;
        self.timers.kill(&mut conn.receive_timer);
        self.timers.kill(&mut conn.progress_timer);
        let scheme = conn.uri.scheme().to_ascii_lowercase();
        if let Some(host) = conn.host_slot.take() {
            self.hosts.release(&host);
        }
        self.budget.release();

        // The handler may still look at the socket while tearing down.
        if let Some(handler) = self.handlers.get(&scheme).cloned() {
            handler.stop(self, id);
        }
        if let Some(conn) = self.connections.get_mut(id) {
            conn.socket = None;
        }
    }

    /// Remove a connection and deliver its result to every download.
    pub(super) fn done_connection(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        if !conn.state.is_result() {
            tracing::error!(conn = %id, state = ?conn.state, "finishing connection without a result");
            self.set_state(id, ConnectionState::Done(Err(ConnError::Internal("no result"))));
        }
        if self.connections.get(id).is_some_and(|c| c.running) {
            self.interrupt_connection(id);
        }

        self.queue.remove(id);
        let Some(mut conn) = self.connections.remove(id) else {
            return;
        };
        self.timers.kill(&mut conn.receive_timer);
        self.timers.kill(&mut conn.progress_timer);
        if let Some(entry) = conn.cached {
            self.cache.detach_loader(entry);
        }

        tracing::debug!(conn = %id, uri = %conn.uri, state = ?conn.state, "connection done");
        self.finish_downloads(conn);
    }

    fn finish_downloads(&mut self, conn: Connection) {
        for did in conn.downloads {
            let Some(download) = self.downloads.get_mut(did) else {
                continue;
            };
            download.cached = conn.cached;
            download.conn = None;
            download.state = conn.state.clone();
            download.prev_error = conn.prev_error.clone();
            download.progress = Some(conn.progress.clone());
            self.events.push_back(DownloadEvent {
                download: did,
                state: conn.state.clone(),
                cached: conn.cached,
            });
        }
    }

    /// Finish a connection with `result`. A successful transfer makes its
    /// cache entry complete at the bytes received.
    pub fn abort(&mut self, id: ConnId, result: Result<(), ConnError>) {
        let now = self.now();
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        if result.is_ok() {
            if let Some(entry) = conn.cached {
                let length = conn.from;
                self.cache.normalize(entry, length, now);
            }
        }
        self.set_state(id, ConnectionState::Done(result));
        if self.connections.get(id).is_some_and(|c| c.running) {
            self.interrupt_connection(id);
        }
        self.done_connection(id);
        self.register_check_queue();
    }

    /// Report a failure that may be worth another try. Requests with POST
    /// data and connections out of tries are finished with `err`.
    pub fn retry(&mut self, id: ConnId, err: ConnError) {
        self.set_state(id, ConnectionState::Done(Err(err.clone())));
        if self.connections.get(id).is_some_and(|c| c.running) {
            self.interrupt_connection(id);
        }

        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        match self.retry_policy.decide(conn.uri.has_post(), conn.tries) {
            RetryDecision::NoRetry => {
                tracing::info!(conn = %id, uri = %conn.uri, error = %err, tries = conn.tries, "giving up");
                self.done_connection(id);
                self.register_check_queue();
            }
            RetryDecision::Retry { tries } => {
                tracing::debug!(conn = %id, uri = %conn.uri, error = %err, tries, "retrying");
                conn.tries = tries;
                conn.prev_error = Some(err);
                self.run_connection(id);
            }
        }
    }

    /// Finish successfully and park the socket for reuse. `hook`, if given,
    /// runs instead of a plain close when the pool evicts the socket.
    pub fn keep_alive(&mut self, id: ConnId, timeout: Duration, hook: Option<ReclaimHook>) {
        let now = self.now();
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        match conn.socket.take() {
            Some(socket) => {
                if let Err(socket) = self.keepalive.store(&conn.uri, socket, now, timeout, hook) {
                    tracing::debug!(uri = %conn.uri, fd = socket.handle(), "cannot pool socket");
                }
            }
            None => tracing::error!(conn = %id, "keep-alive without a socket"),
        }
        if let Some(entry) = conn.cached {
            let length = conn.from;
            self.cache.normalize(entry, length, now);
        }

        self.set_state(id, ConnectionState::Done(Ok(())));
        if self.connections.get(id).is_some_and(|c| c.running) {
            self.interrupt_connection(id);
        }
        self.done_connection(id);
        self.register_check_queue();
        self.arm_keepalive_timer();
    }

    /// Sweep the keepalive pool. Evicted sockets with a hook are handed to
    /// a background connection that runs the hook.
    pub(super) fn check_keepalive_connections(&mut self) {
        let now = self.now();
        let evicted = self
            .keepalive
            .sweep(now, self.cfg.keepalive.max_connections);
        for pooled in evicted {
            let Pooled {
                uri, socket, hook, ..
            } = pooled;
            if let Some(hook) = hook {
                self.run_reclaim_hook(uri, socket, hook);
            }
        }
        self.timers.kill(&mut self.keepalive_timer);
        self.arm_keepalive_timer();
    }

    fn arm_keepalive_timer(&mut self) {
        if self.keepalive_timer.is_some() || self.keepalive.is_empty() {
            return;
        }
        let at = self.now() + Duration::from_millis(self.cfg.keepalive.check_interval_ms);
        self.keepalive_timer = Some(self.timers.install(at, TimerEvent::KeepaliveSweep));
    }

    fn run_reclaim_hook(&mut self, uri: crate::uri::Uri, socket: Socket, hook: ReclaimHook) {
        let conn = match Connection::new(
            uri.clone(),
            uri.clone(),
            None,
            0,
            CacheMode::Never,
            PriorityCounts::single(Priority::Cancel),
        ) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "cannot create reclaim connection");
                return;
            }
        };
        let id = self.connections.insert(conn);
        self.queue.enqueue(id, &self.connections);

        let host_slot = self.hosts.acquire(&uri);
        self.budget.acquire();
        if let Some(conn) = self.connections.get_mut(id) {
            conn.socket = Some(socket);
            conn.host_slot = host_slot;
            conn.running = true;
        }
        tracing::debug!(conn = %id, uri = %uri, "running reclaim hook");

        self.set_state(id, ConnectionState::Connecting(ConnectPhase::Connect));
        self.set_timeout(id);
        (hook.0)(self, id);
    }

    /// Interrupt every connection and close every pooled socket. Pending
    /// reclaim hooks are dropped without running.
    pub fn abort_all(&mut self) {
        for id in self.queue.snapshot() {
            self.abort(id, Err(ConnError::Interrupted));
        }
        let dropped = self.keepalive.drain().len();
        self.timers.kill(&mut self.keepalive_timer);
        tracing::debug!(pooled = dropped, "all connections aborted");
    }

    /// Interrupt connections nobody is waiting for (priority `Cancel`).
    pub fn abort_background(&mut self) {
        for id in self.queue.snapshot() {
            let background = self
                .connections
                .get(id)
                .is_some_and(|c| c.priority() >= Priority::Cancel);
            if background {
                self.abort(id, Err(ConnError::Interrupted));
            }
        }
    }

    /// Record the expected total length reported by the peer.
    pub fn set_est_length(&mut self, id: ConnId, length: Option<u64>) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.est_length = length;
        }
    }

    /// Mark a request that cannot be repeated safely; it gets the longer
    /// receive timeout from the next [`Engine::set_timeout`] on.
    pub fn set_unrestartable(&mut self, id: ConnId, unrestartable: bool) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.unrestartable = unrestartable;
        }
    }

    /// Give a connection the socket its handler opened.
    pub fn set_socket(&mut self, id: ConnId, socket: Socket) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.socket = Some(socket);
        }
    }
}
