//! Seams to the collaborators that perform actual I/O.

use crate::engine::Engine;
use crate::error::ConnError;
use crate::uri::Uri;

use super::connection::ConnId;

/// Performs the I/O for one URI scheme.
///
/// `start` is called each time the engine admits (or restarts) a connection.
/// The handler drives it to completion through the engine: data via
/// [`Engine::receive`], progress via [`Engine::set_state`], and the outcome
/// via [`Engine::abort`], [`Engine::retry`] or [`Engine::keep_alive`]. It may
/// return before the connection is finished.
///
/// `stop` is called whenever the engine takes a running connection back
/// (suspension, retry, finish). The attempt in flight must end there: data
/// it delivers afterwards is refused with [`ConnError::Interrupted`]. `stop`
/// must not finish or restart the connection itself.
pub trait ProtocolHandler {
    fn start(&self, engine: &mut Engine, conn: ConnId);

    fn stop(&self, _engine: &mut Engine, _conn: ConnId) {}
}

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// The URI actually connected to (`proxy:` URI when proxied).
    pub connect: Uri,
    /// The resource itself.
    pub target: Uri,
}

pub trait ProxyResolver {
    fn resolve(&self, uri: &Uri) -> Result<ProxyRoute, ConnError>;
}

/// No proxy: every request goes straight to its target.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectProxy;

impl ProxyResolver for DirectProxy {
    fn resolve(&self, uri: &Uri) -> Result<ProxyRoute, ConnError> {
        Ok(ProxyRoute {
            connect: uri.clone(),
            target: uri.clone(),
        })
    }
}
