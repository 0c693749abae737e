//! Connection and download states.

use crate::error::ConnError;

/// Step of connection setup a running connection is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectPhase {
    Dns,
    Connect,
    SslNegotiation,
    Sent,
    Login,
    GetHeaders,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Queued, not running.
    Waiting,
    Connecting(ConnectPhase),
    Transferring,
    /// Final outcome. A connection is removed right after reaching it.
    Done(Result<(), ConnError>),
}

impl ConnectionState {
    pub fn interrupted() -> Self {
        ConnectionState::Done(Err(ConnError::Interrupted))
    }

    pub fn is_result(&self) -> bool {
        matches!(self, ConnectionState::Done(_))
    }

    pub fn is_progress(&self) -> bool {
        !self.is_result()
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting(_))
    }

    pub fn is_transferring(&self) -> bool {
        matches!(self, ConnectionState::Transferring)
    }

    /// Waiting or still setting up.
    pub fn is_queued(&self) -> bool {
        matches!(self, ConnectionState::Waiting | ConnectionState::Connecting(_))
    }

    pub fn error(&self) -> Option<&ConnError> {
        match self {
            ConnectionState::Done(Err(e)) => Some(e),
            _ => None,
        }
    }
}
