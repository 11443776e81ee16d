//! Client identity
//!
//! A client is identified by two independent signals: its network address
//! (IPv6 grouped by /64) and a short fingerprint of a few request headers.
//! Abuse counters are kept under both, so rotating one signal alone does not
//! reset them.

use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;

/// Prefix length used to group IPv6 clients
pub const IPV6_GROUP_PREFIX: u8 = 64;

/// Raw client metadata taken from the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Peer address
    pub addr: IpAddr,
    /// `User-Agent` header
    pub user_agent: Option<String>,
    /// `Accept-Language` header
    pub accept_language: Option<String>,
    /// `Accept-Encoding` header
    pub accept_encoding: Option<String>,
}

impl ClientMetadata {
    /// Metadata with only an address
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            user_agent: None,
            accept_language: None,
            accept_encoding: None,
        }
    }

    /// Set user agent
    pub fn with_user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Set accept-language
    pub fn with_accept_language(mut self, lang: &str) -> Self {
        self.accept_language = Some(lang.to_string());
        self
    }

    /// Set accept-encoding
    pub fn with_accept_encoding(mut self, enc: &str) -> Self {
        self.accept_encoding = Some(enc.to_string());
        self
    }
}

/// Derived client identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId {
    addr: IpAddr,
    network: String,
    fingerprint: String,
}

impl ClientId {
    /// Derive identifier from request metadata
    pub fn derive(meta: &ClientMetadata) -> Self {
        let addr = normalize_ip(meta.addr);
        Self {
            addr,
            network: network_key(addr),
            fingerprint: fingerprint(meta),
        }
    }

    /// Normalized peer address
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Address-based key (IPv4 address or IPv6 /64)
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Header fingerprint (16 hex chars)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Key abuse counters are tracked under: network and fingerprint together
    pub fn tracking_key(&self) -> String {
        format!("{}#{}", self.network, self.fingerprint)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.network, self.fingerprint)
    }
}

/// Unwrap IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`)
pub fn normalize_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn network_key(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match Ipv6Network::new(v6, IPV6_GROUP_PREFIX) {
            Ok(net) => format!("{}/{}", net.network(), IPV6_GROUP_PREFIX),
            Err(_) => v6.to_string(),
        },
    }
}

fn fingerprint(meta: &ClientMetadata) -> String {
    let mut hasher = Sha256::new();
    for part in [&meta.user_agent, &meta.accept_language, &meta.accept_encoding] {
        hasher.update(part.as_deref().unwrap_or("").trim().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser(addr: &str) -> ClientMetadata {
        ClientMetadata::new(addr.parse().unwrap())
            .with_user_agent("Mozilla/5.0")
            .with_accept_language("en-US")
            .with_accept_encoding("gzip")
    }

    #[test]
    fn test_ip_rotation_keeps_fingerprint() {
        let a = ClientId::derive(&browser("203.0.113.7"));
        let b = ClientId::derive(&browser("198.51.100.20"));

        assert_ne!(a.network(), b.network());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_ipv6_grouped_by_prefix() {
        let a = ClientId::derive(&browser("2001:db8:1:2::1"));
        let b = ClientId::derive(&browser("2001:db8:1:2:ffff::9"));
        assert_eq!(a.network(), "2001:db8:1:2::/64");
        assert_eq!(a.network(), b.network());
    }

    #[test]
    fn test_mapped_ipv4_normalized() {
        let id = ClientId::derive(&browser("::ffff:192.0.2.1"));
        assert_eq!(id.network(), "192.0.2.1");
        assert_eq!(id.addr(), "192.0.2.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_tracking_key_combines_network_and_fingerprint() {
        let id = ClientId::derive(&ClientMetadata::new("10.1.1.1".parse().unwrap()));
        let key = id.tracking_key();
        assert!(key.starts_with("10.1.1.1#"));
        assert!(key.ends_with(id.fingerprint()));

        // same headers on another network is a different client
        let a = ClientId::derive(&browser("203.0.113.66"));
        let b = ClientId::derive(&browser("198.51.100.23"));
        assert_ne!(a.tracking_key(), b.tracking_key());
    }
}
