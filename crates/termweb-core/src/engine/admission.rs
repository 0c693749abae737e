//! Admission: which waiting connections run, and who makes room for them.

use crate::host_limit::HostKey;
use crate::scheduler::{ConnId, ConnectPhase, ConnectionState, Priority};

use super::Engine;

impl Engine {
    fn priority(&self, id: ConnId) -> Priority {
        self.connections
            .get(id)
            .map_or(Priority::Cancel, |c| c.priority())
    }

    fn is_waiting(&self, id: ConnId) -> bool {
        self.connections
            .get(id)
            .is_some_and(|c| c.state == ConnectionState::Waiting)
    }

    /// Admit waiting connections while limits allow, most urgent first.
    ///
    /// Within each priority class, connections that can reuse a pooled
    /// socket go first. Any admission or suspension restarts the scan.
    /// Afterwards, waiting connections nobody wants any more (priority
    /// `Cancel`) are interrupted.
    pub fn check_queue(&mut self) {
        self.check_pending = false;

        'again: loop {
            self.check_queue_bugs();
            self.check_keepalive_connections();

            let snapshot = self.queue.snapshot();
            let mut start = 0;
            while start < snapshot.len() {
                let pri = self.priority(snapshot[start]);
                let end = snapshot[start..]
                    .iter()
                    .position(|&c| self.priority(c) != pri)
                    .map_or(snapshot.len(), |n| start + n);
                let class = &snapshot[start..end];

                for &id in class {
                    let reusable = self
                        .connections
                        .get(id)
                        .is_some_and(|c| self.keepalive.has(&c.uri));
                    if self.is_waiting(id) && reusable && self.try_connection(id) {
                        continue 'again;
                    }
                }
                for &id in class {
                    if self.is_waiting(id) && self.try_connection(id) {
                        continue 'again;
                    }
                }
                start = end;
            }
            break;
        }

        loop {
            let victim = self
                .queue
                .as_slice()
                .iter()
                .rev()
                .take_while(|&&id| self.priority(id) >= Priority::Cancel)
                .copied()
                .find(|&id| self.is_waiting(id));
            let Some(id) = victim else {
                break;
            };
            tracing::debug!(conn = %id, "dropping unwanted waiting connection");
            self.set_state(id, ConnectionState::interrupted());
            self.done_connection(id);
        }

        self.check_queue_bugs();
    }

    /// Start `id` if limits allow, otherwise try to suspend a less urgent
    /// connection. Returns true if anything changed.
    fn try_connection(&mut self, id: ConnId) -> bool {
        let Some(conn) = self.connections.get(id) else {
            return false;
        };
        let max_to_host = self.cfg.connection.max_connections_to_host;

        if let Some(host) = HostKey::from_uri(&conn.uri) {
            if self.hosts.count(&conn.uri) >= max_to_host {
                return self.try_to_suspend_connection(id, Some(&host));
            }
        }
        if self.budget.is_full() {
            return self.try_to_suspend_connection(id, None);
        }

        self.run_connection(id);
        true
    }

    /// Suspend the least urgent running connection that is strictly less
    /// urgent than `id` (on `host`, if given). POST requests are only
    /// suspended when nobody wants them any more.
    fn try_to_suspend_connection(&mut self, id: ConnId, host: Option<&HostKey>) -> bool {
        let pri = self.priority(id);
        let mut victim = None;
        for &c in self.queue.as_slice().iter().rev() {
            if self.priority(c) <= pri {
                return false;
            }
            let Some(conn) = self.connections.get(c) else {
                continue;
            };
            if conn.state == ConnectionState::Waiting {
                continue;
            }
            if conn.uri.has_post() && self.priority(c) < Priority::Cancel {
                continue;
            }
            if let Some(host) = host {
                if HostKey::from_uri(&conn.uri).as_ref() != Some(host) {
                    continue;
                }
            }
            victim = Some(c);
            break;
        }

        match victim {
            Some(c) => {
                tracing::debug!(conn = %c, for_conn = %id, "suspending connection");
                self.suspend_connection(c);
                true
            }
            None => false,
        }
    }

    fn suspend_connection(&mut self, id: ConnId) {
        self.interrupt_connection(id);
        self.set_state(id, ConnectionState::Waiting);
    }

    /// Take a host slot and a global unit, reuse a pooled socket if there is
    /// one, and hand the connection to its protocol handler.
    pub(super) fn run_connection(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        if conn.running {
            tracing::error!(conn = %id, "connection already running");
            return;
        }
        let scheme = conn.uri.scheme().to_ascii_lowercase();
        let Some(handler) = self.handlers.get(&scheme).cloned() else {
            self.set_state(
                id,
                ConnectionState::Done(Err(crate::error::ConnError::UnknownProtocol(scheme))),
            );
            self.done_connection(id);
            self.register_check_queue();
            return;
        };

        let reused = self.keepalive.try_reclaim(&conn.uri);
        let host_slot = self.hosts.acquire(&conn.uri);
        self.budget.acquire();

        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        conn.host_slot = host_slot;
        conn.running = true;
        let phase = match reused {
            Some(socket) => {
                conn.socket = Some(socket);
                ConnectPhase::Connect
            }
            None if conn.socket.is_some() => ConnectPhase::Connect,
            None => ConnectPhase::Dns,
        };
        tracing::debug!(
            conn = %id,
            uri = %conn.uri,
            tries = conn.tries,
            reused = phase == ConnectPhase::Connect,
            "running connection"
        );

        self.set_state(id, ConnectionState::Connecting(phase));
        self.set_timeout(id);
        handler.start(self, id);
    }
}
