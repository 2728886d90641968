//! Negotiated session parameters

use super::cert::{peer_chain, CertInfo};
use openssl::ssl::{NameType, SslRef};

/// Snapshot of a session's negotiated parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Protocol version (e.g. "TLSv1.3"); "unknown" before the handshake
    pub version: String,
    /// Negotiated cipher suite
    pub cipher: Option<String>,
    /// SNI servername
    pub servername: Option<String>,
    /// Peer certificate chain, leaf first
    pub peer_chain: Vec<CertInfo>,
    /// Whether the session was resumed
    pub session_reused: bool,
}

impl SessionInfo {
    pub(crate) fn from_ssl(ssl: &SslRef) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl.current_cipher().map(|c| c.name().to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            peer_chain: peer_chain(ssl),
            session_reused: ssl.session_reused(),
        }
    }

    /// Leaf certificate presented by the peer
    pub fn peer(&self) -> Option<&CertInfo> {
        self.peer_chain.first()
    }
}
