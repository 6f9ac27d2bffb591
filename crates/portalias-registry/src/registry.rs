//! Reconciliation of relays against container state
//!
//! The registry owns every relay, the source address allocator and the
//! hostname zone. Its mutating methods take `&mut self`: a single control loop
//! drives it, so allocator and registry state need no further locking. Readers
//! go through [`RegistryView`] and [`HostnameZone`].

use crate::view::{ActiveBinding, BindingTable, RegistryView};
use crate::zone::HostnameZone;
use crate::RegistryError;
use dashmap::DashMap;
use portalias_net::AddressAllocator;
use portalias_proto::{BindingInfo, ContainerInfo, RelayKey};
use portalias_relay::{Relay, RelayConfig, RelayPlan, DEFAULT_FIRST_EPHEMERAL_PORT};
use portalias_runtime::ContainerRuntime;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciliation settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Published ports at or above this were picked by the runtime
    pub first_ephemeral_port: u16,
    /// Replaces unspecified destination IPs reported by the runtime
    pub host_ip: IpAddr,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            first_ephemeral_port: DEFAULT_FIRST_EPHEMERAL_PORT,
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// Container port -> relay registry
pub struct Registry {
    config: RegistryConfig,
    allocator: AddressAllocator,
    bindings: BindingTable,
    zone: HostnameZone,
}

impl Registry {
    pub fn new(config: RegistryConfig, allocator: AddressAllocator, zone: HostnameZone) -> Self {
        Self {
            config,
            allocator,
            bindings: Arc::new(DashMap::new()),
            zone,
        }
    }

    pub fn view(&self) -> RegistryView {
        RegistryView::new(self.bindings.clone(), self.zone.clone())
    }

    pub fn zone(&self) -> &HostnameZone {
        &self.zone
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    /// Inspect a container and start relays for its ports that have none yet.
    ///
    /// A container that can't be inspected, or a port that can't be relayed,
    /// is logged and skipped. Only allocator failures are returned.
    pub async fn add_container(
        &mut self,
        runtime: &dyn ContainerRuntime,
        container_id: &str,
    ) -> Result<Vec<BindingInfo>, RegistryError> {
        let container = match runtime.inspect(container_id).await {
            Ok(container) => container,
            Err(e) => {
                warn!("Getting container info failed for id {}: {}", container_id, e);
                return Ok(Vec::new());
            }
        };

        self.reconcile_container(&container).await
    }

    /// Start relays for every port of an already-inspected container that is
    /// not registered yet. Returns the bindings that were added.
    pub async fn reconcile_container(
        &mut self,
        container: &ContainerInfo,
    ) -> Result<Vec<BindingInfo>, RegistryError> {
        let mut added = Vec::new();

        for mapping in &container.ports {
            let key = RelayKey::new(container.id.clone(), mapping.private_port);
            if self.bindings.contains_key(&key) {
                debug!("Relay for {} already started", key);
                continue;
            }

            let plan = match RelayPlan::for_port(
                container,
                mapping,
                self.config.host_ip,
                self.config.first_ephemeral_port,
            ) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(
                        "Error creating relay for port {} on container {}: {}",
                        mapping.private_port,
                        container.short_id(),
                        e
                    );
                    continue;
                }
            };

            let source = self.allocator.allocate(plan.source_port, plan.destination)?;

            let relay = Relay::new(RelayConfig {
                hostname: plan.hostname.clone(),
                source: SocketAddr::V4(source),
                destination: plan.destination,
            });
            if let Err(e) = relay.start().await {
                warn!(
                    "Error starting relay for {} on container {}: {}",
                    plan.hostname,
                    container.short_id(),
                    e
                );
                self.allocator.release(*source.ip(), source.port());
                continue;
            }

            let info = BindingInfo {
                container_id: container.id.clone(),
                container_name: container.name.clone(),
                hostname: plan.hostname,
                private_port: mapping.private_port,
                source,
                destination: plan.destination,
            };

            self.zone.publish(&info.hostname, *source.ip());
            self.bindings.insert(
                key,
                ActiveBinding {
                    info: info.clone(),
                    relay: Arc::new(relay),
                },
            );
            added.push(info);
        }

        if !added.is_empty() {
            info!(
                "Container {} ({}): {} relay(s) added",
                container.short_id(),
                container.name,
                added.len()
            );
        }
        Ok(added)
    }

    /// Stop and forget every relay of a container. Returns the removed
    /// bindings once all of their relays have fully stopped.
    pub async fn remove_container(&mut self, container_id: &str) -> Vec<BindingInfo> {
        let mut keys: Vec<RelayKey> = self
            .bindings
            .iter()
            .filter(|entry| entry.key().belongs_to(container_id))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            let Some((_, binding)) = self.bindings.remove(&key) else {
                continue;
            };

            // Bookkeeping goes first so nothing observes a relay that is stopping
            let source = binding.info.source;
            self.zone.unpublish(&binding.info.hostname, *source.ip());
            self.allocator.release(*source.ip(), source.port());

            binding.relay.stop().await;
            let stats = binding.relay.stats();
            info!(
                hostname = %binding.info.hostname,
                "Removed relay {} ({} connection(s) served)",
                key,
                stats.accepted
            );
            removed.push(binding.info);
        }

        removed
    }

    /// Stop every relay
    pub async fn shutdown(&mut self) {
        let mut containers: Vec<String> = self
            .bindings
            .iter()
            .map(|entry| entry.key().container_id.clone())
            .collect();
        containers.sort();
        containers.dedup();

        for container_id in containers {
            self.remove_container(&container_id).await;
        }
        info!("All relays stopped");
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
