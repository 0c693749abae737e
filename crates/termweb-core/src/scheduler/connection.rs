//! One fetch, queued or running, shared by every download of its URI.

use crate::arena::Id;
use crate::cache::{CacheMode, EntryId};
use crate::error::ConnError;
use crate::host_limit::HostKey;
use crate::keepalive::Socket;
use crate::timer::TimerId;
use crate::uri::Uri;

use super::download::DownloadId;
use super::priority::{Priority, PriorityCounts};
use super::progress::Progress;
use super::state::ConnectionState;

pub type ConnId = Id<Connection>;

#[derive(Debug)]
pub struct Connection {
    /// What is actually connected to (a `proxy:` URI when proxied).
    pub(crate) uri: Uri,
    /// The resource being fetched.
    pub(crate) proxied_uri: Uri,
    pub(crate) referrer: Option<Uri>,
    pub(crate) counts: PriorityCounts,
    pub(crate) state: ConnectionState,
    pub(crate) prev_error: Option<ConnError>,
    pub(crate) tries: u32,
    /// Bytes received from the network in this run.
    pub(crate) received: u64,
    /// Offset the next received byte is stored at.
    pub(crate) from: u64,
    pub(crate) est_length: Option<u64>,
    pub(crate) downloads: Vec<DownloadId>,
    pub(crate) cached: Option<EntryId>,
    pub(crate) socket: Option<Socket>,
    pub(crate) running: bool,
    pub(crate) host_slot: Option<HostKey>,
    pub(crate) detached: bool,
    pub(crate) unrestartable: bool,
    pub(crate) cache_mode: CacheMode,
    pub(crate) receive_timer: Option<TimerId>,
    pub(crate) progress_timer: Option<TimerId>,
    pub(crate) progress: Progress,
}

impl Connection {
    /// A connection always serves at least one requester.
    pub(crate) fn new(
        uri: Uri,
        proxied_uri: Uri,
        referrer: Option<Uri>,
        start: u64,
        cache_mode: CacheMode,
        counts: PriorityCounts,
    ) -> Result<Self, ConnError> {
        if counts.is_empty() {
            return Err(ConnError::Internal("connection without requesters"));
        }

        // A local referrer is only passed on to local resources.
        let referrer = referrer.filter(|r| r.scheme() != "file" || uri.scheme() == "file");

        Ok(Self {
            uri,
            proxied_uri,
            referrer,
            counts,
            state: ConnectionState::Waiting,
            prev_error: None,
            tries: 0,
            received: 0,
            from: 0,
            est_length: None,
            downloads: Vec::new(),
            cached: None,
            socket: None,
            running: false,
            host_slot: None,
            detached: false,
            unrestartable: false,
            cache_mode,
            receive_timer: None,
            progress_timer: None,
            progress: Progress::new(start),
        })
    }

    /// Most urgent class with requesters.
    pub fn priority(&self) -> Priority {
        match self.counts.highest() {
            Some(pri) => pri,
            None => {
                tracing::error!(uri = %self.uri, "connection has no owner");
                Priority::Cancel
            }
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn proxied_uri(&self) -> &Uri {
        &self.proxied_uri
    }

    pub fn referrer(&self) -> Option<&Uri> {
        self.referrer.as_ref()
    }

    pub fn counts(&self) -> &PriorityCounts {
        &self.counts
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn prev_error(&self) -> Option<&ConnError> {
        self.prev_error.as_ref()
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn from(&self) -> u64 {
        self.from
    }

    pub fn est_length(&self) -> Option<u64> {
        self.est_length
    }

    pub fn downloads(&self) -> &[DownloadId] {
        &self.downloads
    }

    pub fn cached(&self) -> Option<EntryId> {
        self.cached
    }

    /// A socket is attached (possibly reused from the keepalive pool).
    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub fn socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn is_unrestartable(&self) -> bool {
        self.unrestartable
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}
