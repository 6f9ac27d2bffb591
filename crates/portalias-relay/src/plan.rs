//! Turning a container port into what a relay needs: hostname, destination,
//! and the port to listen on.

use crate::hostname::derive_hostname;
use crate::RelayError;
use portalias_proto::{ContainerInfo, PortMapping, PortProtocol};
use std::net::{IpAddr, SocketAddr};

/// Start of the runtime's ephemeral port range
pub const DEFAULT_FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Pick the port a relay listens on.
///
/// A destination port at or above `first_ephemeral_port` was picked at random
/// by the runtime, so the container's own port is the meaningful one. Below
/// that, the operator chose the published port explicitly and it is kept.
pub fn choose_source_port(destination_port: u16, private_port: u16, first_ephemeral_port: u16) -> u16 {
    if destination_port >= first_ephemeral_port {
        private_port
    } else {
        destination_port
    }
}

/// Validated inputs for a relay, before a source address is allocated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPlan {
    pub hostname: String,
    pub destination: SocketAddr,
    pub source_port: u16,
}

impl RelayPlan {
    /// Validate one port mapping of a container.
    ///
    /// `host_ip` replaces an unspecified destination IP.
    pub fn for_port(
        container: &ContainerInfo,
        mapping: &PortMapping,
        host_ip: IpAddr,
        first_ephemeral_port: u16,
    ) -> Result<Self, RelayError> {
        if container.name.is_empty() {
            return Err(RelayError::MissingName {
                container_id: container.id.clone(),
            });
        }

        if !mapping.is_published() {
            return Err(RelayError::PortNotPublished {
                container: container.name.clone(),
                private_port: mapping.private_port,
                public_port: mapping.public_port,
            });
        }

        if mapping.protocol != PortProtocol::Tcp {
            return Err(RelayError::UnsupportedProtocol {
                container: container.name.clone(),
                private_port: mapping.private_port,
                protocol: mapping.protocol,
            });
        }

        let hostname = derive_hostname(&container.name).ok_or_else(|| RelayError::EmptyHostname {
            name: container.name.clone(),
        })?;

        let destination_ip = resolve_destination_ip(&mapping.ip, host_ip).ok_or_else(|| {
            RelayError::InvalidDestination {
                container: container.name.clone(),
                ip: mapping.ip.clone(),
            }
        })?;
        let destination = SocketAddr::new(destination_ip, mapping.public_port);

        let source_port = choose_source_port(
            mapping.public_port,
            mapping.private_port,
            first_ephemeral_port,
        );

        Ok(Self {
            hostname,
            destination,
            source_port,
        })
    }
}

fn resolve_destination_ip(reported: &str, host_ip: IpAddr) -> Option<IpAddr> {
    let reported = reported.trim();
    if reported.is_empty() {
        return Some(host_ip);
    }

    let ip: IpAddr = reported
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()?;
    if ip.is_unspecified() {
        Some(host_ip)
    } else {
        Some(ip)
    }
}
