//! IP network helpers
//!
//! CIDR parsing and containment come from `ipnetwork`. This adds the few
//! range operations scope matching and range speculation need.

use std::net::{IpAddr, Ipv4Addr};

pub use ipnetwork::IpNetwork;

/// Parse a network in CIDR notation, masking off host bits. A bare address
/// is a single-host network.
pub fn parse_network(s: &str) -> Result<IpNetwork, String> {
    let s = s.trim();
    // ipnetwork accepts truncated addresses such as "10/8"
    let addr = s.split_once('/').map_or(s, |(addr, _)| addr);
    addr.parse::<IpAddr>()
        .map_err(|_| format!("Invalid network address: {}", s))?;

    let network: IpNetwork = s
        .parse()
        .map_err(|e| format!("Invalid network {}: {}", s, e))?;
    IpNetwork::new(network.network(), network.prefix())
        .map_err(|e| format!("Invalid network {}: {}", s, e))
}

/// Number of addresses in the network, saturating for huge IPv6 ranges
pub fn address_count(network: &IpNetwork) -> u128 {
    let max_prefix: u8 = if network.is_ipv4() { 32 } else { 128 };
    let host_bits = u32::from(max_prefix.saturating_sub(network.prefix()));
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Whether `inner` lies entirely inside `outer`
pub fn contains_network(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    inner.prefix() >= outer.prefix() && outer.contains(inner.network())
}

/// IPv4 host addresses of the network. Network and broadcast addresses are
/// skipped for prefixes shorter than /31. Empty for IPv6.
pub fn hosts_v4(network: &IpNetwork) -> impl Iterator<Item = Ipv4Addr> {
    let (start, end) = match network {
        IpNetwork::V4(v4) => {
            let base = u64::from(u32::from(v4.network()));
            let size = address_count(network) as u64;
            if v4.prefix() < 31 {
                (base + 1, base + size - 1)
            } else {
                (base, base + size)
            }
        }
        IpNetwork::V6(_) => (0, 0),
    };
    (start..end).map(|n| Ipv4Addr::from(n as u32))
}
