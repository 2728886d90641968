//! Certificate summaries
//!
//! Flattens X.509 certificates into the few fields callers usually log or
//! assert on.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                if let Ok(octets) = <[u8; 4]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv4Addr::from(octets)));
                } else if let Ok(octets) = <[u8; 16]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv6Addr::from(octets)));
                }
            }
        }
    }

    names
}

/// Peer certificate chain of a session, leaf first
pub fn peer_chain(ssl: &SslRef) -> Vec<CertInfo> {
    let mut chain = Vec::new();

    if let Some(peer_cert) = ssl.peer_certificate() {
        chain.push(CertInfo::from_x509(&peer_cert));
    }

    // Server side: the stack excludes the leaf. Client side: it includes it.
    if let Some(stack) = ssl.peer_cert_chain() {
        for cert in stack {
            let info = CertInfo::from_x509(cert);
            if chain.first() != Some(&info) {
                chain.push(info);
            }
        }
    }

    chain
}
