//! TCP socket implementation of [`Socket`]
//!
//! Polls in bounded slices so a concurrent `close` is noticed even on
//! platforms where `shutdown` does not wake a pending `poll(2)`.

use super::{PollEvents, Socket};
use socket2::{Domain, Protocol, Type};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default length of a single `poll(2)` slice
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(100);

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Connected TCP socket
///
/// `close` shuts the connection down and marks the socket closed; the file
/// descriptor itself is released on drop, so it cannot be reused while
/// another thread still polls it.
pub struct TcpSocket {
    inner: socket2::Socket,
    closed: AtomicBool,
    poll_timeout: Option<Duration>,
    poll_slice: Duration,
}

impl TcpSocket {
    /// Connect to `addr` (blocking connect)
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect(&addr.into())?;
        Ok(Self::from_socket(socket))
    }

    fn from_socket(inner: socket2::Socket) -> Self {
        TcpSocket {
            inner,
            closed: AtomicBool::new(false),
            poll_timeout: None,
            poll_slice: DEFAULT_POLL_SLICE,
        }
    }

    /// Bound every `poll` call; `None` waits until ready or closed
    pub fn set_poll_timeout(&mut self, timeout: Option<Duration>) {
        self.poll_timeout = timeout;
    }

    /// Set how long a single `poll(2)` call may block before the closed flag
    /// is checked again
    pub fn set_poll_slice(&mut self, slice: Duration) {
        self.poll_slice = slice.max(Duration::from_millis(1));
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket"))
    }

    /// Peer address of the socket
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket"))
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
    }
}

impl From<TcpStream> for TcpSocket {
    fn from(stream: TcpStream) -> Self {
        Self::from_socket(socket2::Socket::from(stream))
    }
}

impl AsRawFd for TcpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Socket for TcpSocket {
    fn make_non_blocking(&self) -> io::Result<()> {
        self.inner.set_nonblocking(true)
    }

    fn poll(&self, events: PollEvents) -> io::Result<()> {
        use libc::{poll, pollfd, POLLIN, POLLNVAL, POLLOUT};

        let deadline = self.poll_timeout.map(|t| Instant::now() + t);

        let mut interest = 0;
        if events.wants_read() {
            interest |= POLLIN;
        }
        if events.wants_write() {
            interest |= POLLOUT;
        }

        loop {
            if self.is_closed() {
                return Err(Self::closed_error());
            }

            let mut slice = self.poll_slice;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "poll timed out"));
                }
                slice = slice.min(deadline - now);
            }

            let mut pfd = pollfd {
                fd: self.inner.as_raw_fd(),
                events: interest,
                revents: 0,
            };

            let timeout_ms = slice.as_millis().clamp(1, i32::MAX as u128) as i32;

            let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

            if result < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if result > 0 {
                if pfd.revents & POLLNVAL != 0 {
                    return Err(Self::closed_error());
                }
                return Ok(());
            }
        }
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        (&self.inner).read(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        self.inner.send_with_flags(buf, SEND_FLAGS)
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.inner.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
