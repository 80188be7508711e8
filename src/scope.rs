//! Scope Oracle
//!
//! The engine asks two questions about an event's host: is it in scope, and is
//! it blacklisted. [`TargetScope`] answers them from whitelist/blacklist entries
//! made of host names, IP addresses and CIDR ranges.

use std::net::IpAddr;

use crate::event::{types, Event};
use crate::net::{self, IpNetwork};

/// Collaborator deciding scope membership
pub trait ScopeOracle: Send + Sync {
    fn in_scope(&self, event: &Event) -> bool;
    fn blacklisted(&self, event: &Event) -> bool;
}

/// A single whitelist or blacklist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEntry {
    /// A host name; matches itself and its subdomains
    Host(String),
    Network(IpNetwork),
}

impl ScopeEntry {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match net::parse_network(value) {
            Ok(network) => ScopeEntry::Network(network),
            Err(_) => ScopeEntry::Host(value.trim_end_matches('.').to_lowercase()),
        }
    }

    fn matches_host(&self, host: &str) -> bool {
        match self {
            ScopeEntry::Host(name) => {
                host == name || host.strip_suffix(name.as_str()).is_some_and(|prefix| prefix.ends_with('.'))
            }
            ScopeEntry::Network(network) => {
                if let Ok(ip) = host.parse::<IpAddr>() {
                    network.contains(ip)
                } else if let Ok(range) = net::parse_network(host) {
                    net::contains_network(network, &range)
                } else {
                    false
                }
            }
        }
    }
}

/// Whitelist/blacklist scope built from scan targets
#[derive(Debug, Clone, Default)]
pub struct TargetScope {
    whitelist: Vec<ScopeEntry>,
    blacklist: Vec<ScopeEntry>,
}

impl TargetScope {
    pub fn new<W, B, S, T>(whitelist: W, blacklist: B) -> Self
    where
        W: IntoIterator<Item = S>,
        B: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            whitelist: whitelist.into_iter().map(|s| ScopeEntry::parse(s.as_ref())).collect(),
            blacklist: blacklist.into_iter().map(|s| ScopeEntry::parse(s.as_ref())).collect(),
        }
    }

    pub fn whitelist(&self) -> &[ScopeEntry] {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &[ScopeEntry] {
        &self.blacklist
    }

    /// Whether a raw host value is covered by the whitelist
    pub fn host_in_scope(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.whitelist.iter().any(|entry| entry.matches_host(&host))
    }

    pub fn host_blacklisted(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.blacklist.iter().any(|entry| entry.matches_host(&host))
    }
}

impl ScopeOracle for TargetScope {
    fn in_scope(&self, event: &Event) -> bool {
        if event.event_type() == types::SCAN {
            return true;
        }
        event.host().is_some_and(|host| self.host_in_scope(&host))
    }

    fn blacklisted(&self, event: &Event) -> bool {
        event.host().is_some_and(|host| self.host_blacklisted(&host))
    }
}
