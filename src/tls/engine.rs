//! Binding between OpenSSL sessions and sockets
//!
//! Holds the pieces every stream operation shares: the `SSL_get_error`
//! classification, the process-wide ex-data slot that links a session back to
//! its stream, and the `Read`/`Write` adapter a session is bound to.

use super::error::{EngineFailure, TlsError};
use crate::net::Socket;
use openssl::ex_data::Index;
use openssl::ssl::{self, ErrorCode, Ssl, SslRef};
use std::io::{self, Read, Write};
use std::sync::{Arc, OnceLock};

/// Connection role, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake (connect state)
    Client,
    /// Answers the handshake (accept state)
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Identity of a stream, stored as ex-data on its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTag {
    pub id: u64,
    pub role: Role,
}

/// What an `SSL_*` failure means for the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Wait for the socket to become readable, then repeat the call
    RetryRead,
    /// Wait for the socket to become writable, then repeat the call
    RetryWrite,
    /// The peer sent close_notify
    PeerClosed,
    Fatal(EngineFailure),
}

/// Classify a failed `SSL_do_handshake`/`SSL_read`/`SSL_write`/`SSL_shutdown`
pub(crate) fn classify(function: &'static str, err: &ssl::Error) -> Outcome {
    match err.code() {
        ErrorCode::WANT_READ => Outcome::RetryRead,
        ErrorCode::WANT_WRITE => Outcome::RetryWrite,
        ErrorCode::ZERO_RETURN => Outcome::PeerClosed,
        _ => Outcome::Fatal(EngineFailure::from_ssl_error(function, err)),
    }
}

static CONNECTION_INDEX: OnceLock<Index<Ssl, ConnectionTag>> = OnceLock::new();

/// Ex-data slot for [`ConnectionTag`], allocated on first use
pub(crate) fn connection_index() -> Result<Index<Ssl, ConnectionTag>, TlsError> {
    if let Some(index) = CONNECTION_INDEX.get() {
        return Ok(*index);
    }

    let index = Ssl::new_ex_index::<ConnectionTag>()
        .map_err(|e| TlsError::Init(EngineFailure::from_stack("SSL_get_ex_new_index", &e)))?;

    // A racing thread may have won; its index is the one everyone uses.
    Ok(*CONNECTION_INDEX.get_or_init(|| index))
}

/// Look up the stream a session belongs to
pub fn connection_tag(ssl: &SslRef) -> Option<&ConnectionTag> {
    let index = CONNECTION_INDEX.get()?;
    ssl.ex_data(*index)
}

/// Adapter binding a session to a socket's descriptor
///
/// `WouldBlock` from the socket surfaces from OpenSSL as `WANT_READ` or
/// `WANT_WRITE`.
pub(crate) struct SocketIo<S: Socket> {
    socket: Arc<S>,
}

impl<S: Socket> SocketIo<S> {
    pub(crate) fn new(socket: Arc<S>) -> Self {
        SocketIo { socket }
    }
}

impl<S: Socket> Read for SocketIo<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl<S: Socket> Write for SocketIo<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
