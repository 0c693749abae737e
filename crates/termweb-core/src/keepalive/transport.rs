//! Raw socket handles as seen by the engine.

use std::fmt;

/// A connected socket owned by a connection or the keepalive pool.
/// Dropping it closes the socket.
pub trait Transport: fmt::Debug {
    /// True if the peer sent data or closed the connection. An idle pooled
    /// socket in this state can no longer be reused.
    fn can_read(&self) -> bool;

    /// OS-level handle, for logging and identity checks.
    fn handle(&self) -> i64;
}

pub type Socket = Box<dyn Transport>;

#[cfg(unix)]
mod unix {
    use std::os::fd::{AsRawFd, OwnedFd};

    use super::Transport;

    impl Transport for OwnedFd {
        fn can_read(&self) -> bool {
            let mut pfd = libc::pollfd {
                fd: self.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `pfd` is a valid pollfd for the duration of the call and
            // the descriptor is owned by `self`.
            let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
            if ready < 0 {
                tracing::debug!(
                    fd = pfd.fd,
                    "poll failed: {}",
                    std::io::Error::last_os_error()
                );
                return true;
            }
            ready > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
        }

        fn handle(&self) -> i64 {
            i64::from(self.as_raw_fd())
        }
    }

}
