//! TLS streams over non-blocking sockets
//!
//! This module wraps an OpenSSL session around a [`Socket`](crate::net::Socket)
//! and exposes a blocking, thread-safe byte stream on top of it.
//!
//! # Architecture
//!
//! 1. `TlsContext` is the shared, immutable template (versions, identity,
//!    trust store, peer verification)
//! 2. `TlsStream` owns one session created from a context and drives the
//!    caller's socket through it
//! 3. The `engine` module maps OpenSSL's `SSL_get_error` codes onto a small
//!    set of outcomes: wait for read, wait for write, peer closed, or fatal
//!
//! Would-block conditions never reach the caller. A peer that closes the
//! stream is not an error either: reads come back short and the stream
//! reports [`TlsStream::is_closed`].
//!
//! # Examples
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::sync::Arc;
//! use tlsstream::net::TcpSocket;
//! use tlsstream::tls::{TlsContext, TlsVersion};
//!
//! let ctx = TlsContext::client()?
//!     .version(TlsVersion::Tls13)?
//!     .ca_file("ca.pem")?
//!     .servername("example.com")?
//!     .build()?;
//!
//! let socket = Arc::new(TcpSocket::from(TcpStream::connect("example.com:443")?));
//! let stream = ctx.connect(socket)?;
//!
//! stream.write(b"ping")?;
//! let mut buf = [0u8; 4];
//! let n = stream.read(&mut buf)?;
//! stream.close();
//! # let _ = n;
//! # Ok::<(), tlsstream::tls::TlsError>(())
//! ```

pub mod builtin_cert;
pub mod cert;
pub mod config;
pub mod engine;
pub mod error;
pub mod info;
pub mod stream;

pub use cert::CertInfo;
pub use config::{ContextBuilder, PeerVerify, TlsContext, TlsVersion};
pub use engine::{ConnectionTag, Role};
pub use error::{EngineFailure, TlsError};
pub use info::SessionInfo;
pub use stream::{TlsStream, MAX_SHUTDOWN_ATTEMPTS};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
