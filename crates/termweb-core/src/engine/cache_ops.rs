//! The cache as seen through the engine: lookups for clients, and the
//! write path for protocol handlers.

use crate::cache::{CacheMode, CacheTable, EntryId, GcReport};
use crate::error::ConnError;
use crate::scheduler::{ConnId, ConnectionState};
use crate::uri::Uri;

use super::Engine;

impl Engine {
    pub fn cache(&self) -> &CacheTable {
        &self.cache
    }

    /// Direct access for metadata updates (headers, content type, ...).
    pub fn cache_mut(&mut self) -> &mut CacheTable {
        &mut self.cache
    }

    pub fn find_in_cache(&mut self, uri: &Uri) -> Option<EntryId> {
        self.cache.find(uri)
    }

    pub fn get_validated_cache_entry(&mut self, uri: &Uri, mode: CacheMode) -> Option<EntryId> {
        let now = self.now();
        self.cache.get_validated(uri, mode, now)
    }

    pub fn follow_cached_redirects(&mut self, entry: EntryId) -> Option<EntryId> {
        self.cache.follow_redirects(entry)
    }

    pub fn redirect_cache(
        &mut self,
        entry: EntryId,
        location: &str,
        get: bool,
        incomplete: Option<bool>,
    ) -> Result<Uri, ConnError> {
        self.cache.redirect(entry, location, get, incomplete)
    }

    pub fn cache_size(&self) -> u64 {
        self.cache.size()
    }

    pub fn cache_entry_count(&self) -> usize {
        self.cache.len()
    }

    pub fn garbage_collection(&mut self, force_all: bool) -> GcReport {
        self.cache.collect(force_all)
    }

    /// The cache entry a connection writes into, created on first use.
    pub fn connection_cache_entry(&mut self, id: ConnId) -> Result<EntryId, ConnError> {
        let now = self.now();
        let conn = self
            .connections
            .get(id)
            .ok_or(ConnError::Internal("unknown connection"))?;
        if let Some(entry) = conn.cached.filter(|&e| self.cache.contains(e)) {
            return Ok(entry);
        }

        let (uri, proxied) = (conn.uri.clone(), conn.proxied_uri.clone());
        let entry = self.cache.get_or_create(&uri, &proxied, now);
        self.cache.attach_loader(entry);
        if let Some(conn) = self.connections.get_mut(id) {
            conn.cached = Some(entry);
            for &did in &conn.downloads {
                if let Some(download) = self.downloads.get_mut(did) {
                    download.cached = Some(entry);
                }
            }
        }
        Ok(entry)
    }

    /// Store bytes received by a connection at its current position.
    ///
    /// Counts as a sign of life for the receive timeout. Allocation failure
    /// is returned for the handler to finish the connection with. Data for a
    /// connection that is not running (suspended, being retried) is refused
    /// with [`ConnError::Interrupted`].
    pub fn receive(&mut self, id: ConnId, data: &[u8]) -> Result<(), ConnError> {
        let running = self
            .connections
            .get(id)
            .map(|c| c.running)
            .ok_or(ConnError::Internal("unknown connection"))?;
        if !running {
            tracing::debug!(conn = %id, len = data.len(), "dropping data for a stopped connection");
            return Err(ConnError::Interrupted);
        }
        let entry = self.connection_cache_entry(id)?;
        let from = self
            .connections
            .get(id)
            .map(|c| c.from)
            .ok_or(ConnError::Internal("unknown connection"))?;

        self.cache.add_fragment(entry, from, data)?;

        let transferring = match self.connections.get_mut(id) {
            Some(conn) => {
                let len = data.len() as u64;
                conn.from += len;
                conn.received += len;
                conn.state.is_transferring()
            }
            None => return Err(ConnError::Internal("unknown connection")),
        };
        if !transferring {
            self.set_state(id, ConnectionState::Transferring);
        }
        self.set_timeout(id);
        Ok(())
    }
}
