//! Peer address whitelist for the token endpoint.
//!
//! Entries are single addresses (`10.1.2.3`, `::1`) or CIDR ranges
//! (`10.0.0.0/8`, `fd00::/8`). An empty whitelist admits every peer.

use std::net::IpAddr;

use crate::error::{EndpointError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Exact(IpAddr),
    Range { network: IpAddr, prefix: u8 },
}

impl Rule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        match entry.split_once('/') {
            None => entry.parse().ok().map(|ip| Rule::Exact(normalize(ip))),
            Some((addr, prefix)) => {
                let network = normalize(addr.parse().ok()?);
                let prefix: u8 = prefix.parse().ok()?;
                let max = if network.is_ipv4() { 32 } else { 128 };
                (prefix <= max).then_some(Rule::Range { network, prefix })
            }
        }
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match *self {
            Rule::Exact(addr) => addr == ip,
            Rule::Range { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
                    u32::from(net) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
                    u128::from(net) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
        }
    }
}

/// IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) compare as IPv4.
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Compiled whitelist.
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    rules: Vec<Rule>,
}

impl AddressFilter {
    /// Compile whitelist entries. Unparsable entries are a configuration error.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let rules = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref();
                Rule::parse(entry).ok_or_else(|| {
                    EndpointError::Config(format!("Invalid whitelist entry '{}'", entry))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let ip = normalize(ip);
        self.rules.iter().any(|rule| rule.contains(ip))
    }
}
