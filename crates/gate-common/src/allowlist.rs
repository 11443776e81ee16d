//! Per-tenant IP allowlists
//!
//! Entries are plain addresses or CIDR ranges. An empty list means the tenant
//! declares no address restriction.

use crate::client::normalize_ip;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Allowlist parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid allowlist entry '{entry}': {reason}")]
pub struct AllowlistError {
    /// Offending entry
    pub entry: String,
    /// Parser message
    pub reason: String,
}

/// Set of permitted networks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct IpAllowlist {
    networks: Vec<IpNetwork>,
}

impl IpAllowlist {
    /// Parse entries such as `"203.0.113.9"`, `"10.0.0.0/24"` or `"2001:db8::/32"`
    pub fn parse<I, S>(entries: I) -> Result<Self, AllowlistError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let networks = entries
            .into_iter()
            .map(|e| parse_entry(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// No restriction declared
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Configured networks
    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }

    /// Whether `ip` may reach the tenant
    pub fn permits(&self, ip: IpAddr) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        let ip = normalize_ip(ip);
        self.networks.iter().any(|net| net.contains(ip))
    }
}

fn parse_entry(entry: &str) -> Result<IpNetwork, AllowlistError> {
    let entry = entry.trim();
    let err = |reason: String| AllowlistError {
        entry: entry.to_string(),
        reason,
    };

    if entry.contains('/') {
        let net = entry.parse::<IpNetwork>().map_err(|e| err(e.to_string()))?;
        return unmap_network(net).map_err(|e| err(e.to_string()));
    }

    let addr = normalize_ip(entry.parse::<IpAddr>().map_err(|e| err(e.to_string()))?);
    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    IpNetwork::new(addr, prefix).map_err(|e| err(e.to_string()))
}

/// `::ffff:a.b.c.d/n` with `n >= 96` becomes `a.b.c.d/(n - 96)`, matching
/// how callers are normalized in [`IpAllowlist::permits`]
fn unmap_network(net: IpNetwork) -> Result<IpNetwork, ipnetwork::IpNetworkError> {
    match net {
        IpNetwork::V6(v6) if v6.prefix() >= 96 => match v6.ip().to_ipv4_mapped() {
            Some(v4) => IpNetwork::new(IpAddr::V4(v4), v6.prefix() - 96),
            None => Ok(net),
        },
        other => Ok(other),
    }
}

impl TryFrom<Vec<String>> for IpAllowlist {
    type Error = AllowlistError;

    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(entries)
    }
}

impl From<IpAllowlist> for Vec<String> {
    fn from(list: IpAllowlist) -> Self {
        list.networks.iter().map(ToString::to_string).collect()
    }
}
