//! Per-host active connection counts used for admission control.

mod key;

use std::collections::HashMap;

pub use key::HostKey;

use crate::uri::Uri;

#[derive(Debug, Default)]
pub struct HostLimiter {
    counts: HashMap<HostKey, usize>,
}

impl HostLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot for the host of `uri`. Returns the key to release later,
    /// or `None` for host-less URIs.
    pub fn acquire(&mut self, uri: &Uri) -> Option<HostKey> {
        let key = HostKey::from_uri(uri)?;
        *self.counts.entry(key.clone()).or_insert(0) += 1;
        Some(key)
    }

    /// Give back a slot; the host is forgotten when its count reaches zero.
    pub fn release(&mut self, key: &HostKey) {
        match self.counts.get_mut(key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.counts.remove(key);
            }
            None => {
                tracing::error!(host = %key.host, "host connection count underflow");
            }
        }
    }

    /// Active connections to the host of `uri` (0 for host-less URIs).
    pub fn count(&self, uri: &Uri) -> usize {
        HostKey::from_uri(uri)
            .and_then(|key| self.counts.get(&key).copied())
            .unwrap_or(0)
    }

    /// Number of hosts with at least one active connection.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
