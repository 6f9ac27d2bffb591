//! Hostname zone served by the resolver
//!
//! Maps derived hostnames to the loopback alias their relays listen on. The
//! registry is the only writer; the resolver reads it concurrently.

use dashmap::DashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::trace;

/// Default suffix the zone answers under
pub const DEFAULT_DOMAIN: &str = "pharod";

/// Hostname -> source address mapping
#[derive(Clone)]
pub struct HostnameZone {
    entries: Arc<DashMap<String, Ipv4Addr>>,
    domain: String,
}

impl HostnameZone {
    pub fn new(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            entries: Arc::new(DashMap::new()),
            domain: domain.trim_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub(crate) fn publish(&self, hostname: &str, addr: Ipv4Addr) {
        trace!("Publishing {} -> {}", hostname, addr);
        self.entries.insert(hostname.to_string(), addr);
    }

    /// Remove `hostname` if it still points at `addr`
    pub(crate) fn unpublish(&self, hostname: &str, addr: Ipv4Addr) -> bool {
        trace!("Unpublishing {} -> {}", hostname, addr);
        self.entries
            .remove_if(hostname, |_, current| *current == addr)
            .is_some()
    }

    /// Answer a query for `<hostname>` or `<hostname>.<domain>`
    pub fn resolve(&self, query: &str) -> Option<Ipv4Addr> {
        let name = query.trim_end_matches('.');
        if let Some(addr) = self.lookup(name) {
            return Some(addr);
        }

        let lower = name.to_ascii_lowercase();
        let hostname = lower
            .strip_suffix(self.domain.as_str())
            .and_then(|rest| rest.strip_suffix('.'))?;
        self.lookup(hostname)
    }

    /// Exact hostname lookup
    pub fn lookup(&self, hostname: &str) -> Option<Ipv4Addr> {
        self.entries.get(hostname).map(|entry| *entry.value())
    }

    /// Fully qualified name for `hostname`
    pub fn fqdn(&self, hostname: &str) -> String {
        format!("{}.{}", hostname, self.domain)
    }

    /// All (hostname, address) pairs sorted by hostname
    pub fn entries(&self) -> Vec<(String, Ipv4Addr)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HostnameZone {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}
