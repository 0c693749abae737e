//! Error kinds reported by the cache and the connection scheduler.

/// Failure of a cache operation. The entry is left in a consistent (possibly
/// incomplete) state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("out of memory while growing cache entry (requested {requested} bytes)")]
    OutOfMemory { requested: usize },
    #[error("cache entry no longer exists")]
    StaleEntry,
}

/// Terminal error of a connection, delivered to every attached download.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("bad URL syntax")]
    BadUrl,
    #[error("proxy error: {0}")]
    Proxy(String),
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("receive timeout")]
    Timeout,
    #[error("interrupted")]
    Interrupted,
    #[error("internal error: {0}")]
    Internal(&'static str),
    /// Opaque error forwarded from a protocol handler.
    #[error("{0}")]
    Transport(String),
}

impl From<CacheError> for ConnError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::OutOfMemory { .. } => ConnError::OutOfMemory,
            CacheError::StaleEntry => ConnError::Internal("cache entry disappeared"),
        }
    }
}

impl From<url::ParseError> for ConnError {
    fn from(_: url::ParseError) -> Self {
        ConnError::BadUrl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_oom_maps_to_connection_oom() {
        let e: ConnError = CacheError::OutOfMemory { requested: 16 }.into();
        assert_eq!(e, ConnError::OutOfMemory);
    }

    #[test]
    fn transport_errors_display_verbatim() {
        let e = ConnError::Transport("connection reset by peer".to_string());
        assert_eq!(e.to_string(), "connection reset by peer");
    }
}
