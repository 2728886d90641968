//! tlsstream - TLS byte streams over non-blocking sockets
//!
//! This crate drives an OpenSSL session over a non-blocking socket and turns
//! the engine's would-block codes into readiness waits, so callers get a
//! plain blocking read/write/close interface that is safe to share between
//! threads.

pub mod net;
pub mod tls;
