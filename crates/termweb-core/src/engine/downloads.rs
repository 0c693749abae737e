//! Client-facing entry points: requesting, cancelling, moving and
//! detaching downloads.

use crate::cache::CacheMode;
use crate::error::ConnError;
use crate::scheduler::{
    Connection, ConnectionState, Download, DownloadEvent, DownloadId, Priority, PriorityCounts,
};
use crate::uri::Uri;

use super::Engine;

impl Engine {
    /// A new, idle download handle to pass to [`Engine::load_uri`].
    pub fn create_download(&mut self) -> DownloadId {
        self.downloads.insert(Download::default())
    }

    pub fn download(&self, id: DownloadId) -> Option<&Download> {
        self.downloads.get(id)
    }

    /// Forget a download handle, cancelling it first if it is still loading.
    pub fn release_download(&mut self, id: DownloadId) {
        self.cancel_download(id, false);
        self.downloads.remove(id);
    }

    fn finish_download_early(&mut self, id: DownloadId, state: ConnectionState) {
        let Some(download) = self.downloads.get_mut(id) else {
            return;
        };
        download.state = state.clone();
        self.events.push_back(DownloadEvent {
            download: id,
            state,
            cached: download.cached,
        });
    }

    /// Request `uri` on behalf of `download`.
    ///
    /// A usable cache entry answers at once. Otherwise the download joins the
    /// connection already fetching the same URI, or a new connection is
    /// queued and admitted on the next [`Engine::tick`]. Errors are also
    /// delivered to the download as a final event.
    pub fn load_uri(
        &mut self,
        uri: &Uri,
        referrer: Option<&Uri>,
        download: Option<DownloadId>,
        pri: Priority,
        cache_mode: CacheMode,
        start: u64,
    ) -> Result<(), ConnError> {
        let now = self.now();

        if let Some(did) = download {
            let Some(d) = self.downloads.get_mut(did) else {
                return Err(ConnError::Internal("unknown download"));
            };
            if let Some(conn) = d.conn {
                tracing::error!(download = %did, conn = %conn, "download is already assigned");
                return Err(ConnError::Internal("download already assigned"));
            }
            *d = Download {
                pri,
                ..Download::default()
            };
        }

        if let Some(entry) = self.cache.get_validated(uri, cache_mode, now) {
            tracing::debug!(uri = %uri, entry = %entry, "served from cache");
            if let Some(did) = download {
                if let Some(d) = self.downloads.get_mut(did) {
                    d.cached = Some(entry);
                }
                self.finish_download_early(did, ConnectionState::Done(Ok(())));
            }
            return Ok(());
        }

        let route = self.proxy.resolve(uri).and_then(|route| {
            if route.connect.requires_host() && route.connect.host().is_none() {
                Err(ConnError::BadUrl)
            } else {
                Ok(route)
            }
        });
        let route = match route {
            Ok(route) => route,
            Err(e) => {
                tracing::info!(uri = %uri, error = %e, "cannot load");
                if let Some(did) = download {
                    self.finish_download_early(did, ConnectionState::Done(Err(e.clone())));
                }
                return Err(e);
            }
        };

        let key = route.connect.cache_key();
        let existing = self.queue.as_slice().iter().copied().find(|&id| {
            self.connections
                .get(id)
                .is_some_and(|c| !c.detached && c.uri.cache_key() == key)
        });

        if let Some(id) = existing {
            let Some(conn) = self.connections.get_mut(id) else {
                return Err(ConnError::Internal("queued connection vanished"));
            };
            let more_urgent = conn.priority() > pri;
            conn.counts.add(pri);
            if let Some(did) = download {
                conn.downloads.push(did);
                let (cached, progress) = (conn.cached, conn.progress.clone());
                if let Some(d) = self.downloads.get_mut(did) {
                    d.conn = Some(id);
                    d.cached = cached;
                    d.progress = Some(progress);
                }
            }
            if more_urgent {
                self.queue.requeue(id, &self.connections);
                self.register_check_queue();
            }
            tracing::debug!(conn = %id, uri = %uri, ?pri, "joined running connection");
            if download.is_some() {
                let state = self
                    .connections
                    .get(id)
                    .map_or(ConnectionState::Waiting, |c| c.state.clone());
                self.set_state(id, state);
            }
            self.check_queue_bugs();
            return Ok(());
        }

        let mut conn = Connection::new(
            route.connect,
            route.target,
            referrer.cloned(),
            start,
            cache_mode,
            PriorityCounts::single(pri),
        )?;
        if cache_mode < CacheMode::ForceReload {
            if let Some(prefix) = self
                .cache
                .find(&conn.uri)
                .and_then(|entry| self.cache.get(entry))
                .and_then(|entry| entry.store().prefix_len())
            {
                conn.from = prefix;
            }
        }

        let id = self.connections.insert(conn);
        if let Some(did) = download {
            if let Some(conn) = self.connections.get_mut(id) {
                conn.downloads.push(did);
                let progress = conn.progress.clone();
                if let Some(d) = self.downloads.get_mut(did) {
                    d.conn = Some(id);
                    d.progress = Some(progress);
                }
            }
        }
        self.queue.enqueue(id, &self.connections);
        tracing::debug!(conn = %id, uri = %uri, ?pri, ?cache_mode, "connection queued");

        self.set_state(id, ConnectionState::Waiting);
        self.check_queue_bugs();
        self.register_check_queue();
        Ok(())
    }

    /// Withdraw a download from its connection. A connection nobody wants
    /// any more drops to priority `Cancel`; it is interrupted right away if
    /// `interrupt` is set or it streams without caching, otherwise it keeps
    /// loading in the background.
    pub fn cancel_download(&mut self, id: DownloadId, interrupt: bool) {
        let Some(download) = self.downloads.get_mut(id) else {
            return;
        };
        if download.state.is_result() {
            return;
        }
        let conn_id = download.conn.take();
        let pri = download.pri;
        download.state = ConnectionState::interrupted();

        let Some(conn_id) = conn_id else {
            return;
        };
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        conn.downloads.retain(|&d| d != id);
        conn.counts.remove(pri);
        tracing::debug!(download = %id, conn = %conn_id, "download cancelled");

        if conn.downloads.is_empty() {
            conn.counts.add(Priority::Cancel);
            if conn.detached || interrupt {
                self.abort(conn_id, Err(ConnError::Interrupted));
            }
        }

        self.queue.sort(&self.connections);
        self.check_queue_bugs();
        self.register_check_queue();
    }

    /// Hand the request of `old` over to `new` (with priority `pri`) and
    /// cancel `old`.
    pub fn move_download(&mut self, old: DownloadId, new: DownloadId, pri: Priority) {
        let Some(source) = self.downloads.get(old).cloned() else {
            return;
        };
        let Some(target) = self.downloads.get_mut(new) else {
            return;
        };
        *target = Download { pri, ..source };

        let Some(conn_id) = target.conn else {
            let event = DownloadEvent {
                download: new,
                state: target.state.clone(),
                cached: target.cached,
            };
            self.events.push_back(event);
            return;
        };

        match self.connections.get_mut(conn_id) {
            Some(conn) => {
                conn.counts.add(pri);
                conn.downloads.push(new);
            }
            None => {
                tracing::error!(download = %old, conn = %conn_id, "moving download of a vanished connection");
                target.conn = None;
                return;
            }
        }
        self.cancel_download(old, false);
    }

    /// Stream the rest of a large transfer without keeping it: the entry is
    /// taken out of the cache and bytes before `pos` are released.
    ///
    /// Only objects above the detach threshold that nobody else uses are
    /// detached. Once detached, further calls just release data.
    pub fn detach_connection(&mut self, id: DownloadId, pos: u64) {
        let Some(download) = self.downloads.get(id) else {
            return;
        };
        if download.state.is_result() {
            return;
        }
        let Some(conn_id) = download.conn else {
            return;
        };
        let threshold = self.cfg.cache.detach_threshold();
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        let Some(entry) = conn.cached else {
            return;
        };

        if !conn.detached {
            let total = conn.est_length.unwrap_or(conn.from);
            if total < threshold {
                return;
            }
            let pinned = self.cache.get(entry).is_some_and(|e| e.is_pinned());
            if conn.counts.total_below_cancel() != 1 || pinned {
                return;
            }
            conn.detached = true;
            self.cache.invalidate(entry);
            tracing::debug!(conn = %conn_id, uri = %conn.uri, total, "connection detached");
        }

        self.cache.free_to(entry, pos);
    }
}
