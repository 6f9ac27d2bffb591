//! Address of the runtime host
//!
//! Containers that publish on an unspecified address are reached through the
//! machine running the runtime, which is not necessarily this one.

use crate::RuntimeError;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use tracing::debug;

/// Resolve the IP that replaces unspecified destination addresses.
///
/// An explicit `host_ip` (literal or hostname) wins. Otherwise the host of a
/// `tcp://host:port` endpoint is used, and a local socket endpoint (or none at
/// all) means the runtime runs on this machine.
pub fn resolve_host_ip(host_ip: Option<&str>, endpoint: Option<&str>) -> Result<IpAddr, RuntimeError> {
    if let Some(host) = host_ip.map(str::trim).filter(|h| !h.is_empty()) {
        return resolve(host);
    }

    match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
        None => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Some(endpoint) => match endpoint_host(endpoint)? {
            Some(host) => resolve(&host),
            None => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        },
    }
}

/// Host part of a network endpoint, `None` for local socket endpoints
pub fn endpoint_host(endpoint: &str) -> Result<Option<String>, RuntimeError> {
    if endpoint.starts_with("unix://") || endpoint.starts_with("npipe://") || endpoint.starts_with('/') {
        return Ok(None);
    }

    let rest = ["tcp://", "http://", "https://"]
        .iter()
        .find_map(|scheme| endpoint.strip_prefix(scheme))
        .ok_or_else(|| RuntimeError::InvalidEndpoint(endpoint.to_string()))?;
    let authority = rest.split('/').next().unwrap_or_default();

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        // [v6]:port
        bracketed.split(']').next().unwrap_or_default()
    } else {
        authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority)
    };

    if host.is_empty() {
        return Err(RuntimeError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(Some(host.to_string()))
}

fn resolve(host: &str) -> Result<IpAddr, RuntimeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolved = (host, 0)
        .to_socket_addrs()
        .map_err(|e| RuntimeError::HostResolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .map(|addr| addr.ip())
        .min_by_key(|ip| ip.is_ipv6())
        .ok_or_else(|| RuntimeError::HostResolution {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })?;

    debug!("Resolved runtime host {} to {}", host, resolved);
    Ok(resolved)
}
