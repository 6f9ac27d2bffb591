use portalias_proto::PortProtocol;
use std::net::SocketAddr;
use thiserror::Error;

/// Relay errors
///
/// Every variant is scoped to a single container port: callers log it and
/// carry on with the remaining ports.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Container {container_id} has no name from which to build a hostname")]
    MissingName { container_id: String },

    #[error("Couldn't build a non-empty hostname from '{name}'")]
    EmptyHostname { name: String },

    #[error("Port {private_port} is not published on {container} (public port {public_port})")]
    PortNotPublished {
        container: String,
        private_port: u16,
        public_port: u16,
    },

    #[error("Port {private_port}/{protocol} on {container} is not TCP")]
    UnsupportedProtocol {
        container: String,
        private_port: u16,
        protocol: PortProtocol,
    },

    #[error("Invalid destination IP '{ip}' for {container}")]
    InvalidDestination { container: String, ip: String },

    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("Relay for {hostname} was already started")]
    AlreadyStarted { hostname: String },
}
