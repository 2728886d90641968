//! TLS error types

use openssl::error::ErrorStack;
use openssl::ssl;
use std::fmt;

/// A failed OpenSSL call: which function, the library error code and its
/// human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub function: &'static str,
    pub code: u64,
    pub message: String,
}

impl EngineFailure {
    /// Capture the first entry of an OpenSSL error stack
    pub fn from_stack(function: &'static str, stack: &ErrorStack) -> Self {
        match stack.errors().first() {
            Some(err) => EngineFailure {
                function,
                code: err.code() as u64,
                message: err.to_string(),
            },
            None => EngineFailure {
                function,
                code: 0,
                message: "no error recorded by OpenSSL".to_string(),
            },
        }
    }

    /// Capture an error returned by an `SSL_*` I/O call
    ///
    /// Falls back to the `SSL_get_error` code when the library did not push
    /// anything onto its error stack (e.g. a socket error or unexpected EOF).
    pub fn from_ssl_error(function: &'static str, err: &ssl::Error) -> Self {
        if let Some(first) = err.ssl_error().and_then(|stack| stack.errors().first()) {
            return EngineFailure {
                function,
                code: first.code() as u64,
                message: first.to_string(),
            };
        }

        let message = match err.io_error() {
            Some(io) => io.to_string(),
            None => err.to_string(),
        };

        EngineFailure {
            function,
            code: err.code().as_raw() as u64,
            message,
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}() failed with code {}, \"{}\"", self.function, self.code, self.message)
    }
}

impl std::error::Error for EngineFailure {}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Session could not be created from the context
    #[error("TLS session setup failed: {0}")]
    Init(EngineFailure),

    /// Non-recoverable handshake failure
    #[error("TLS handshake failed: {0}")]
    Handshake(EngineFailure),

    /// Non-recoverable failure while reading; the stream should be closed
    #[error("TLS read failed: {0}")]
    Read(EngineFailure),

    /// Non-recoverable failure while writing; the stream should be closed
    #[error("TLS write failed: {0}")]
    Write(EngineFailure),

    #[error("TLS stream is closed")]
    Closed,

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl TlsError {
    /// The engine failure behind a session, handshake, read or write error
    pub fn engine_failure(&self) -> Option<&EngineFailure> {
        match self {
            TlsError::Init(f) | TlsError::Handshake(f) | TlsError::Read(f) | TlsError::Write(f) => Some(f),
            _ => None,
        }
    }
}
