//! TLS context configuration
//!
//! A [`TlsContext`] is the shared template every [`TlsStream`] session is
//! created from: protocol versions, identity, trust store and peer
//! verification. It is immutable once built and cheap to clone.

use super::engine::{self, Role};
use super::error::TlsError;
use super::stream::TlsStream;
use crate::net::Socket;
use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::{X509StoreContext, X509StoreContextRef, X509};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    fn to_openssl_version(self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// Peer certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerVerify {
    /// Don't request or check a peer certificate
    None,
    /// Check the peer certificate if one is presented
    Optional,
    /// Require a valid peer certificate; fail the handshake without one
    #[default]
    Required,
}

impl PeerVerify {
    fn to_openssl_mode(self) -> SslVerifyMode {
        match self {
            PeerVerify::None => SslVerifyMode::NONE,
            PeerVerify::Optional => SslVerifyMode::PEER,
            PeerVerify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        }
    }
}

/// Shared TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsContext {
    pub(crate) ctx: SslContext,
    pub(crate) role: Role,
    pub(crate) servername: Option<String>,
    pub(crate) verify: PeerVerify,
}

impl TlsContext {
    /// Create a new client configuration builder
    pub fn client() -> Result<ContextBuilder, TlsError> {
        ContextBuilder::new(Role::Client)
    }

    /// Create a new server configuration builder
    pub fn server() -> Result<ContextBuilder, TlsError> {
        ContextBuilder::new(Role::Server)
    }

    /// Role this context was built for
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer verification mode applied to every session
    pub fn peer_verify(&self) -> PeerVerify {
        self.verify
    }

    /// SNI name sent by client sessions
    pub fn servername(&self) -> Option<&str> {
        self.servername.as_deref()
    }

    /// Wrap `socket` in a client stream and run the handshake
    pub fn connect<S: Socket>(&self, socket: Arc<S>) -> Result<TlsStream<S>, TlsError> {
        let stream = TlsStream::new(socket, Role::Client, self)?;
        stream.handshake()?;
        Ok(stream)
    }

    /// Wrap `socket` in a server stream and run the handshake
    pub fn accept<S: Socket>(&self, socket: Arc<S>) -> Result<TlsStream<S>, TlsError> {
        let stream = TlsStream::new(socket, Role::Server, self)?;
        stream.handshake()?;
        Ok(stream)
    }
}

/// Context builder for either role
pub struct ContextBuilder {
    ctx_builder: SslContextBuilder,
    role: Role,
    has_cert: bool,
    servername: Option<String>,
    verify: PeerVerify,
}

impl ContextBuilder {
    fn new(role: Role) -> Result<Self, TlsError> {
        let method = match role {
            Role::Client => SslMethod::tls_client(),
            Role::Server => SslMethod::tls_server(),
        };

        Ok(ContextBuilder {
            ctx_builder: SslContextBuilder::new(method)?,
            role,
            has_cert: false,
            servername: None,
            verify: PeerVerify::default(),
        })
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Result<Self, TlsError> {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        if min > max {
            return Err(TlsError::InvalidConfig(format!(
                "minimum version {} is above maximum {}",
                min.as_str(),
                max.as_str()
            )));
        }
        self.ctx_builder.set_min_proto_version(Some(min.to_openssl_version()))?;
        self.ctx_builder.set_max_proto_version(Some(max.to_openssl_version()))?;
        Ok(self)
    }

    /// Load certificate and private key from a PEM file
    pub fn cert_file<P: AsRef<Path>>(self, path: P) -> Result<Self, TlsError> {
        let pem = fs::read(path.as_ref())?;
        self.cert_pem(&pem)
    }

    /// Load certificate and private key from a PEM bundle
    pub fn cert_pem(mut self, pem: &[u8]) -> Result<Self, TlsError> {
        let cert = X509::from_pem(pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
        let key = PKey::private_key_from_pem(pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;

        self.ctx_builder.set_certificate(&cert)?;
        self.ctx_builder.set_private_key(&key)?;
        self.ctx_builder.check_private_key()?;

        self.has_cert = true;
        Ok(self)
    }

    /// Trust the CA certificates in a PEM file
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        self.ctx_builder.set_ca_file(path.as_ref())?;
        Ok(self)
    }

    /// Trust every certificate in a PEM buffer
    pub fn trust_pem(mut self, pem: &[u8]) -> Result<Self, TlsError> {
        let certs = X509::stack_from_pem(pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load trust anchors: {}", e)))?;
        if certs.is_empty() {
            return Err(TlsError::Certificate("no certificate in trust PEM".to_string()));
        }

        for cert in certs {
            self.ctx_builder.cert_store_mut().add_cert(cert)?;
        }
        Ok(self)
    }

    /// Present the built-in test certificate and trust it as a CA
    pub fn builtin_identity(self) -> Result<Self, TlsError> {
        let pem = super::builtin_cert::BUILTIN_CERT.as_bytes();
        self.cert_pem(pem)?.trust_pem(pem)
    }

    /// Set peer certificate verification mode
    pub fn peer_verify(mut self, mode: PeerVerify) -> Self {
        self.verify = mode;
        self
    }

    /// Set SNI servername (client only)
    pub fn servername(mut self, name: impl Into<String>) -> Result<Self, TlsError> {
        if self.role != Role::Client {
            return Err(TlsError::InvalidConfig(
                "servername is only sent by clients".to_string(),
            ));
        }
        self.servername = Some(name.into());
        Ok(self)
    }

    /// Build the TLS context
    pub fn build(mut self) -> Result<TlsContext, TlsError> {
        // Servers without an explicit identity fall back to the built-in one
        if self.role == Role::Server && !self.has_cert {
            self = self.builtin_identity()?;
        }

        self.ctx_builder
            .set_verify_callback(self.verify.to_openssl_mode(), log_rejected_certificate);

        Ok(TlsContext {
            ctx: self.ctx_builder.build(),
            role: self.role,
            servername: self.servername,
            verify: self.verify,
        })
    }
}

/// Verify callback: keeps OpenSSL's verdict, logs rejections per connection
fn log_rejected_certificate(preverify_ok: bool, x509_ctx: &mut X509StoreContextRef) -> bool {
    if !preverify_ok {
        let tag = X509StoreContext::ssl_idx()
            .ok()
            .and_then(|idx| x509_ctx.ex_data(idx))
            .and_then(engine::connection_tag)
            .copied();

        warn!(
            connection = ?tag.map(|t| t.id),
            role = ?tag.map(|t| t.role.as_str()),
            depth = x509_ctx.error_depth(),
            error = %x509_ctx.error(),
            "peer certificate rejected"
        );
    }

    preverify_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::builtin_cert::BUILTIN_CERT;
    use std::io::Write;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!(TlsVersion::from_str("TLSv1.2").unwrap(), TlsVersion::Tls12);
        assert_eq!(TlsVersion::from_str("tlsv1.3").unwrap(), TlsVersion::Tls13);
        assert_eq!(TlsVersion::from_str("TLS1.0").unwrap(), TlsVersion::Tls10);
        assert!(matches!(TlsVersion::from_str("SSLv3"), Err(TlsError::InvalidVersion(_))));
    }

    #[test]
    fn test_client_context_defaults() {
        let ctx = TlsContext::client().unwrap().build().unwrap();

        assert_eq!(ctx.role(), Role::Client);
        assert_eq!(ctx.peer_verify(), PeerVerify::Required);
        assert!(ctx.servername().is_none());
    }

    #[test]
    fn test_client_context_builder() {
        let ctx = TlsContext::client()
            .unwrap()
            .version(TlsVersion::Tls13)
            .unwrap()
            .servername("localhost")
            .unwrap()
            .peer_verify(PeerVerify::Optional)
            .builtin_identity()
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(ctx.servername(), Some("localhost"));
        assert_eq!(ctx.peer_verify(), PeerVerify::Optional);
    }

    #[test]
    fn test_server_context_uses_builtin_cert() {
        let ctx = TlsContext::server()
            .unwrap()
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(ctx.role(), Role::Server);
        assert!(ctx.ctx.certificate().is_some());
    }

    #[test]
    fn test_invalid_version_range() {
        let result = TlsContext::client()
            .unwrap()
            .version_range(TlsVersion::Tls13, TlsVersion::Tls12);
        assert!(matches!(result, Err(TlsError::InvalidConfig(_))));
    }

    #[test]
    fn test_servername_rejected_on_server() {
        let result = TlsContext::server().unwrap().servername("localhost");
        assert!(matches!(result, Err(TlsError::InvalidConfig(_))));
    }

    #[test]
    fn test_cert_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BUILTIN_CERT.as_bytes()).unwrap();

        let ctx = TlsContext::server()
            .unwrap()
            .cert_file(file.path())
            .unwrap()
            .ca_file(file.path())
            .unwrap()
            .build()
            .unwrap();

        assert!(ctx.ctx.certificate().is_some());
    }

    #[test]
    fn test_cert_pem_rejects_garbage() {
        let result = TlsContext::client().unwrap().cert_pem(b"not a pem");
        assert!(matches!(result, Err(TlsError::Certificate(_))));

        let result = TlsContext::client().unwrap().trust_pem(b"");
        assert!(matches!(result, Err(TlsError::Certificate(_))));
    }
}
