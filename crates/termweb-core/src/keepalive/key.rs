use crate::uri::Uri;

/// Identity under which an idle socket may be reused: same scheme,
/// credentials, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeepaliveKey {
    pub scheme: String,
    pub username: String,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl KeepaliveKey {
    /// Host-less URIs have no reusable connection.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let url = uri.url();
        let host = uri.host()?.to_ascii_lowercase();
        Some(Self {
            scheme: url.scheme().to_string(),
            username: url.username().to_string(),
            password: url.password().map(str::to_string),
            host,
            port: url.port_or_known_default(),
        })
    }
}
