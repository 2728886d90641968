//! Socket layer used underneath TLS streams
//!
//! The TLS layer never owns a socket. It borrows one through the [`Socket`]
//! trait, switches it to non-blocking mode and drives all of its I/O:
//!
//! - `recv`/`send` move ciphertext and may fail with `WouldBlock`
//! - `poll` blocks the calling thread until the socket is ready
//! - `close` ends the socket and must wake any thread blocked in `poll`
//!
//! [`TcpSocket`] is the stock implementation over a connected TCP socket.

pub mod tcp;

pub use tcp::TcpSocket;

use std::io;
use std::os::fd::AsRawFd;

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

impl PollEvents {
    /// Whether the wait completes on readability
    pub fn wants_read(self) -> bool {
        matches!(self, PollEvents::Read | PollEvents::Both)
    }

    /// Whether the wait completes on writability
    pub fn wants_write(self) -> bool {
        matches!(self, PollEvents::Write | PollEvents::Both)
    }
}

/// Socket operations trait
///
/// Implementations must be usable from several threads at once: one thread
/// may sit in `poll` while another calls `close`.
pub trait Socket: AsRawFd + Send + Sync {
    /// Switch the socket into non-blocking mode
    fn make_non_blocking(&self) -> io::Result<()>;

    /// Block until the socket is ready for `events`
    ///
    /// Returns an error once the socket has been closed, or when the
    /// implementation's own wait deadline expires.
    fn poll(&self, events: PollEvents) -> io::Result<()>;

    /// Receive bytes; `WouldBlock` when nothing is pending
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send bytes; `WouldBlock` when the send buffer is full
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Close the socket. Must be idempotent and must wake pending polls.
    fn close(&self) -> io::Result<()>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_events_interest() {
        assert!(PollEvents::Both.wants_read());
        assert!(PollEvents::Both.wants_write());
        assert!(!PollEvents::Read.wants_write());
        assert!(!PollEvents::Write.wants_read());
    }
}
