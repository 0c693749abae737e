use crate::uri::Uri;

/// Key used to count connections per remote host.
///
/// Only the host name matters: connections to different ports or schemes on
/// the same machine share one limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub host: String,
}

impl HostKey {
    /// Construct a host key from a URI. Host-less URIs (`file:`, `data:`)
    /// have no key and are never limited.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let host = uri.host()?;
        Some(Self {
            host: host.to_ascii_lowercase(),
        })
    }
}
