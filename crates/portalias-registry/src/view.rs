//! Read-only view of the registry for inspection interfaces

use crate::zone::HostnameZone;
use dashmap::DashMap;
use portalias_proto::{BindingInfo, RelayKey};
use portalias_relay::{Relay, RelayStats};
use std::sync::Arc;

pub(crate) struct ActiveBinding {
    pub(crate) info: BindingInfo,
    pub(crate) relay: Arc<Relay>,
}

pub(crate) type BindingTable = Arc<DashMap<RelayKey, ActiveBinding>>;

/// Cheap, clonable handle onto the live bindings and hostname zone.
/// Never mutates anything.
#[derive(Clone)]
pub struct RegistryView {
    bindings: BindingTable,
    zone: HostnameZone,
}

impl RegistryView {
    pub(crate) fn new(bindings: BindingTable, zone: HostnameZone) -> Self {
        Self { bindings, zone }
    }

    /// Active bindings sorted by hostname, then source address
    pub fn snapshot(&self) -> Vec<BindingInfo> {
        let mut bindings: Vec<BindingInfo> = self
            .bindings
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect();
        bindings.sort_by(|a, b| (&a.hostname, a.source).cmp(&(&b.hostname, b.source)));
        bindings
    }

    pub fn get(&self, key: &RelayKey) -> Option<BindingInfo> {
        self.bindings.get(key).map(|entry| entry.value().info.clone())
    }

    /// Connection counters of the relay behind `key`
    pub fn stats(&self, key: &RelayKey) -> Option<RelayStats> {
        self.bindings.get(key).map(|entry| entry.value().relay.stats())
    }

    pub fn contains(&self, key: &RelayKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn zone(&self) -> &HostnameZone {
        &self.zone
    }
}
