//! TLS stream over a non-blocking socket
//!
//! `TlsStream` turns OpenSSL's non-blocking calls into blocking operations.
//! Every operation runs the same loop: make the engine call, and when the
//! engine reports `WANT_READ`/`WANT_WRITE`, wait on the socket and try again.
//!
//! # Locking
//!
//! Two locks are involved:
//!
//! - the operation lock serializes whole handshake/read/write/close calls
//! - the session lock guards single engine calls, so certificate accessors
//!   can run while an operation is in flight
//!
//! The session lock is never held across a socket wait.
//!
//! # Closing under load
//!
//! `close` queues behind a write that owns the operation lock, so the peer
//! receives every byte before `close_notify`. A read or handshake parked on
//! readability is cut short instead: `close` closes the socket first, which
//! wakes the parked thread.

use super::cert::CertInfo;
use super::config::TlsContext;
use super::engine::{self, ConnectionTag, Outcome, Role, SocketIo};
use super::error::{EngineFailure, TlsError};
use super::info::SessionInfo;
use crate::net::{PollEvents, Socket};
use openssl::error::ErrorStack;
use openssl::ssl::{self, ShutdownResult, Ssl, SslStream};
use openssl::x509::{X509Ref, X509};
use parking_lot::Mutex;
use std::fmt;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Upper bound on `SSL_shutdown` calls made by [`TlsStream::close`]
pub const MAX_SHUTDOWN_ATTEMPTS: usize = 5;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Result of driving one engine call to completion
enum Progress<T> {
    Done(T),
    /// Peer sent close_notify
    PeerClosed,
    /// A concurrent `close` ended the operation
    Interrupted,
}

/// Counts a thread parked in an interruptible readability wait
struct Parked<'a>(&'a AtomicUsize);

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Set while a write owns the operation lock
struct Writing<'a>(&'a AtomicBool);

impl Drop for Writing<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// TLS stream over a caller-owned non-blocking socket
pub struct TlsStream<S: Socket> {
    session: Mutex<SslStream<SocketIo<S>>>,
    io_lock: Mutex<()>,
    socket: Arc<S>,
    role: Role,
    eof: AtomicBool,
    parked: AtomicUsize,
    writing: AtomicBool,
    id: u64,
}

impl<S: Socket> TlsStream<S> {
    /// Create a stream over `socket`
    ///
    /// Puts the socket into non-blocking mode. No I/O happens until
    /// [`handshake`](Self::handshake) is called.
    pub fn new(socket: Arc<S>, role: Role, context: &TlsContext) -> Result<Self, TlsError> {
        if context.role != role {
            return Err(TlsError::InvalidConfig(format!(
                "{} context used for a {} stream",
                context.role.as_str(),
                role.as_str()
            )));
        }

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

        let mut ssl = Ssl::new(&context.ctx).map_err(|e| init_failure(id, "SSL_new", &e))?;
        ssl.set_ex_data(engine::connection_index()?, ConnectionTag { id, role });

        if let Some(name) = context.servername() {
            ssl.set_hostname(name)
                .map_err(|e| init_failure(id, "SSL_set_tlsext_host_name", &e))?;
        }

        socket.make_non_blocking()?;

        match role {
            Role::Server => ssl.set_accept_state(),
            Role::Client => ssl.set_connect_state(),
        }

        let session = SslStream::new(ssl, SocketIo::new(Arc::clone(&socket)))
            .map_err(|e| init_failure(id, "SSL_set_bio", &e))?;

        debug!(connection = id, role = role.as_str(), fd = socket.as_raw_fd(), "TLS session created");

        Ok(TlsStream {
            session: Mutex::new(session),
            io_lock: Mutex::new(()),
            socket,
            role,
            eof: AtomicBool::new(false),
            parked: AtomicUsize::new(0),
            writing: AtomicBool::new(false),
            id,
        })
    }

    /// Run the TLS handshake
    ///
    /// A peer that closes the connection during the handshake is not an
    /// error: the stream ends up closed and this returns `Ok`.
    pub fn handshake(&self) -> Result<(), TlsError> {
        let _io = self.io_lock.lock();

        if self.is_closed() {
            return Err(TlsError::Closed);
        }

        match self.drive("SSL_do_handshake", true, |session| session.do_handshake()) {
            Ok(Progress::Done(())) => {
                debug!(connection = self.id, role = self.role.as_str(), "TLS handshake complete");
                Ok(())
            }
            Ok(Progress::PeerClosed) => {
                debug!(connection = self.id, "peer closed during handshake");
                self.shutdown_locked();
                Ok(())
            }
            Ok(Progress::Interrupted) => Err(TlsError::Closed),
            Err(failure) => {
                error!(connection = self.id, "{}", failure);
                Err(TlsError::Handshake(failure))
            }
        }
    }

    /// Read until `buf` is full or the peer closes the stream
    ///
    /// Returns the number of bytes read. Fewer than `buf.len()` bytes means
    /// the stream is now closed; once closed, reads return 0 immediately.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TlsError> {
        if buf.is_empty() || self.is_closed() {
            return Ok(0);
        }

        // Wait before taking the operation lock. Skipped when the session
        // already holds decrypted bytes, which the socket would not signal.
        if self.session.lock().ssl().pending() == 0 {
            self.park();
        }

        let _io = self.io_lock.lock();

        if self.is_closed() {
            return Ok(0);
        }

        let mut filled = 0;
        while filled < buf.len() {
            match self.drive("SSL_read", true, |session| session.ssl_read(&mut buf[filled..])) {
                Ok(Progress::Done(n)) => filled += n,
                Ok(Progress::PeerClosed) => {
                    debug!(connection = self.id, bytes = filled, "peer closed stream during read");
                    self.shutdown_locked();
                    break;
                }
                Ok(Progress::Interrupted) => break,
                Err(failure) => {
                    error!(connection = self.id, "{}", failure);
                    return Err(TlsError::Read(failure));
                }
            }
        }

        Ok(filled)
    }

    /// Write all of `buf`
    ///
    /// If the peer closes the stream part way through, this returns `Ok` and
    /// leaves the stream closed; check [`is_closed`](Self::is_closed).
    pub fn write(&self, buf: &[u8]) -> Result<(), TlsError> {
        if self.is_closed() {
            return Err(TlsError::Closed);
        }
        if buf.is_empty() {
            return Ok(());
        }

        self.wait(PollEvents::Write);

        let _io = self.io_lock.lock();
        let _writing = self.begin_write();

        if self.is_closed() {
            return Err(TlsError::Closed);
        }

        let mut sent = 0;
        while sent < buf.len() {
            match self.drive("SSL_write", false, |session| session.ssl_write(&buf[sent..])) {
                Ok(Progress::Done(n)) => sent += n,
                Ok(Progress::PeerClosed) => {
                    debug!(connection = self.id, bytes = sent, "peer closed stream during write");
                    self.shutdown_locked();
                    break;
                }
                Ok(Progress::Interrupted) => return Err(TlsError::Closed),
                Err(failure) => {
                    error!(connection = self.id, "{}", failure);
                    return Err(TlsError::Write(failure));
                }
            }
        }

        Ok(())
    }

    /// Shut the session down and close the socket
    ///
    /// Never fails and may be called any number of times. A write in progress
    /// on another thread finishes first. A read or handshake parked waiting
    /// for data is woken by closing the socket first; it then returns as if
    /// the stream had been closed, and no `close_notify` is sent.
    ///
    /// Otherwise `close` sends `close_notify` and waits for the peer's reply,
    /// at most [`MAX_SHUTDOWN_ATTEMPTS`] times. Each of those waits is a
    /// [`Socket::poll`]; on a [`TcpSocket`](crate::net::TcpSocket) they are
    /// unbounded unless `set_poll_timeout` is set, so a peer that never
    /// answers keeps `close` waiting.
    pub fn close(&self) {
        self.eof.store(true, Ordering::SeqCst);

        // Pairs with `park` and `begin_write`: a parked thread is either seen
        // here or sees `eof` before it waits, and a write that starts after
        // this check sees `eof` before it sends anything.
        if self.parked.load(Ordering::SeqCst) > 0 && !self.writing.load(Ordering::SeqCst) {
            debug!(connection = self.id, "interrupting parked read");
            self.close_socket();
        }

        let _io = self.io_lock.lock();
        self.shutdown_locked();
    }

    /// Whether the stream has been closed, locally or by the peer
    pub fn is_closed(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    /// Run `f` on the certificate this end presents
    ///
    /// The certificate lives inside the session, so it is only lent out for
    /// the duration of the call.
    pub fn with_local_certificate<R>(&self, f: impl FnOnce(Option<&X509Ref>) -> R) -> R {
        let session = self.session.lock();
        f(session.ssl().certificate())
    }

    /// Summary of the certificate this end presents
    pub fn local_certificate_info(&self) -> Option<CertInfo> {
        self.with_local_certificate(|cert| cert.map(CertInfo::from_x509))
    }

    /// Certificate presented by the peer, if any
    pub fn peer_certificate(&self) -> Option<X509> {
        self.session.lock().ssl().peer_certificate()
    }

    /// Negotiated session parameters
    pub fn session_info(&self) -> SessionInfo {
        SessionInfo::from_ssl(self.session.lock().ssl())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Process-unique id, as used in log records
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn socket(&self) -> &Arc<S> {
        &self.socket
    }

    fn begin_write(&self) -> Writing<'_> {
        self.writing.store(true, Ordering::SeqCst);
        Writing(&self.writing)
    }

    /// Repeat `call` until it succeeds, the peer closes, or it fails for good
    ///
    /// An `interruptible` call parks on readability and gives up once the
    /// stream is closed; otherwise it runs to completion.
    fn drive<T>(
        &self,
        function: &'static str,
        interruptible: bool,
        mut call: impl FnMut(&mut SslStream<SocketIo<S>>) -> Result<T, ssl::Error>,
    ) -> Result<Progress<T>, EngineFailure> {
        loop {
            let outcome = {
                let mut session = self.session.lock();
                match call(&mut *session) {
                    Ok(value) => return Ok(Progress::Done(value)),
                    Err(err) => engine::classify(function, &err),
                }
            };

            match outcome {
                Outcome::RetryRead if interruptible => self.park(),
                Outcome::RetryRead => self.wait(PollEvents::Read),
                Outcome::RetryWrite => self.wait(PollEvents::Write),
                Outcome::PeerClosed => return Ok(Progress::PeerClosed),
                // A concurrent close shuts the socket under a parked call;
                // that is not a protocol failure.
                Outcome::Fatal(_) if interruptible && self.is_closed() => {
                    return Ok(Progress::Interrupted)
                }
                Outcome::Fatal(failure) => return Err(failure),
            }

            if interruptible && self.is_closed() {
                return Ok(Progress::Interrupted);
            }
        }
    }

    /// Readability wait that `close` may cut short; skipped once closed
    fn park(&self) {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let _parked = Parked(&self.parked);

        if !self.is_closed() {
            self.wait(PollEvents::Read);
        }
    }

    /// Wait for socket readiness; errors are ignored because the next engine
    /// call reports the real state
    fn wait(&self, events: PollEvents) {
        trace!(connection = self.id, ?events, "waiting on socket");
        if let Err(e) = self.socket.poll(events) {
            trace!(connection = self.id, ?events, error = %e, "socket wait failed");
        }
    }

    /// Bounded `SSL_shutdown` exchange followed by closing the socket.
    /// Caller holds the operation lock.
    fn shutdown_locked(&self) {
        self.eof.store(true, Ordering::SeqCst);

        if !self.socket.is_closed() {
            for attempt in 1..=MAX_SHUTDOWN_ATTEMPTS {
                let result = self.session.lock().shutdown();

                match result {
                    Ok(ShutdownResult::Received) => break,
                    Ok(ShutdownResult::Sent) => continue,
                    Err(err) => match engine::classify("SSL_shutdown", &err) {
                        Outcome::RetryRead => self.wait(PollEvents::Read),
                        Outcome::RetryWrite => self.wait(PollEvents::Write),
                        Outcome::PeerClosed => break,
                        Outcome::Fatal(failure) => {
                            debug!(connection = self.id, attempt, "{}", failure);
                            break;
                        }
                    },
                }
            }
        }

        self.close_socket();
    }

    fn close_socket(&self) {
        if let Err(e) = self.socket.close() {
            debug!(connection = self.id, error = %e, "socket close failed");
        }
    }
}

impl<S: Socket> Drop for TlsStream<S> {
    fn drop(&mut self) {
        if self.eof.swap(true, Ordering::SeqCst) {
            return;
        }

        // Best effort close_notify without waiting for the peer
        if !self.socket.is_closed() {
            if let Err(err) = self.session.get_mut().shutdown() {
                trace!(connection = self.id, error = %err, "shutdown on drop failed");
            }
        }

        self.close_socket();
    }
}

impl<S: Socket> fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("fd", &self.socket.as_raw_fd())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn init_failure(id: u64, function: &'static str, stack: &ErrorStack) -> TlsError {
    let failure = EngineFailure::from_stack(function, stack);
    error!(connection = id, "{}", failure);
    TlsError::Init(failure)
}
