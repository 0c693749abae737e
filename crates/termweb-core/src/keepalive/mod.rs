//! Pool of idle sockets kept open for reuse.
//!
//! The pool is generic over the reclaim hook `H`: a protocol that must say
//! goodbye before a pooled socket is closed (e.g. FTP `QUIT`) leaves a hook,
//! and the evicted entry is handed back to the caller instead of being closed.

mod key;
mod transport;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub use key::KeepaliveKey;
pub use transport::{Socket, Transport};

use crate::uri::Uri;

#[derive(Debug)]
pub struct Pooled<H> {
    pub key: KeepaliveKey,
    /// URI of the connection that left the socket behind.
    pub uri: Uri,
    pub socket: Socket,
    pub creation: Instant,
    pub timeout: Duration,
    pub hook: Option<H>,
}

#[derive(Debug)]
pub struct KeepalivePool<H> {
    /// Newest first.
    entries: VecDeque<Pooled<H>>,
}

impl<H> Default for KeepalivePool<H> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<H> KeepalivePool<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Park `socket` for reuse by later connections to the same identity.
    /// Host-less URIs cannot be pooled; the socket is handed back.
    pub fn store(
        &mut self,
        uri: &Uri,
        socket: Socket,
        now: Instant,
        timeout: Duration,
        hook: Option<H>,
    ) -> Result<(), Socket> {
        let Some(key) = KeepaliveKey::from_uri(uri) else {
            return Err(socket);
        };
        tracing::debug!(
            host = %key.host,
            fd = socket.handle(),
            timeout_secs = timeout.as_secs(),
            "socket kept alive"
        );
        self.entries.push_front(Pooled {
            key,
            uri: uri.clone(),
            socket,
            creation: now,
            timeout,
            hook,
        });
        Ok(())
    }

    pub fn has(&self, uri: &Uri) -> bool {
        KeepaliveKey::from_uri(uri).is_some_and(|key| self.entries.iter().any(|e| e.key == key))
    }

    /// Take a pooled socket matching `uri`. Its reclaim hook is dropped since
    /// the socket lives on.
    pub fn try_reclaim(&mut self, uri: &Uri) -> Option<Socket> {
        let key = KeepaliveKey::from_uri(uri)?;
        let pos = self.entries.iter().position(|e| e.key == key)?;
        let pooled = self.entries.remove(pos)?;
        tracing::debug!(host = %key.host, fd = pooled.socket.handle(), "socket reused");
        Some(pooled.socket)
    }

    /// Evict sockets that became readable (the peer spoke or hung up) or
    /// outlived their timeout, then the oldest ones above `max`. Evicted
    /// entries are returned; dropping them closes their sockets.
    pub fn sweep(&mut self, now: Instant, max: usize) -> Vec<Pooled<H>> {
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for pooled in self.entries.drain(..) {
            let age = now.saturating_duration_since(pooled.creation);
            if pooled.socket.can_read() || age > pooled.timeout {
                evicted.push(pooled);
            } else {
                kept.push_back(pooled);
            }
        }
        self.entries = kept;

        while self.entries.len() > max {
            match self.entries.pop_back() {
                Some(pooled) => evicted.push(pooled),
                None => break,
            }
        }

        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), kept = self.entries.len(), "keepalive sweep");
        }
        evicted
    }

    /// Remove everything, e.g. on shutdown.
    pub fn drain(&mut self) -> Vec<Pooled<H>> {
        self.entries.drain(..).collect()
    }
}
