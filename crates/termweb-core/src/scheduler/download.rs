//! A client's interest in a connection's result.

use crate::arena::Id;
use crate::cache::EntryId;
use crate::error::ConnError;

use super::connection::ConnId;
use super::priority::Priority;
use super::progress::Progress;
use super::state::ConnectionState;

pub type DownloadId = Id<Download>;

#[derive(Debug, Clone)]
pub struct Download {
    pub(crate) conn: Option<ConnId>,
    pub(crate) cached: Option<EntryId>,
    pub(crate) pri: Priority,
    pub(crate) state: ConnectionState,
    pub(crate) prev_error: Option<ConnError>,
    pub(crate) progress: Option<Progress>,
}

impl Default for Download {
    fn default() -> Self {
        Self {
            conn: None,
            cached: None,
            pri: Priority::Main,
            state: ConnectionState::Waiting,
            prev_error: None,
            progress: None,
        }
    }
}

impl Download {
    /// The connection serving this download while it is in progress.
    pub fn connection(&self) -> Option<ConnId> {
        self.conn
    }

    /// The cache entry holding the result, once known.
    pub fn cached(&self) -> Option<EntryId> {
        self.cached
    }

    pub fn priority(&self) -> Priority {
        self.pri
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn prev_error(&self) -> Option<&ConnError> {
        self.prev_error.as_ref()
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_result()
    }
}

/// Notification queued for the owner of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub download: DownloadId,
    pub state: ConnectionState,
    pub cached: Option<EntryId>,
}

impl DownloadEvent {
    pub fn is_final(&self) -> bool {
        self.state.is_result()
    }
}
