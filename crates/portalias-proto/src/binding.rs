//! Registry keys and published binding records

use crate::ContainerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, SocketAddrV4};

/// Identity of a forwarded port: one relay per key at any time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelayKey {
    pub container_id: ContainerId,
    pub private_port: u16,
}

impl RelayKey {
    pub fn new(container_id: impl Into<ContainerId>, private_port: u16) -> Self {
        Self {
            container_id: container_id.into(),
            private_port,
        }
    }

    pub fn belongs_to(&self, container_id: &str) -> bool {
        self.container_id == container_id
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container_id, self.private_port)
    }
}

/// Read-only description of an active relay binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    pub container_id: ContainerId,
    pub container_name: String,
    pub hostname: String,
    pub private_port: u16,
    /// Loopback alias and port the relay listens on
    pub source: SocketAddrV4,
    /// Where accepted connections are forwarded
    pub destination: SocketAddr,
}

impl BindingInfo {
    pub fn key(&self) -> RelayKey {
        RelayKey::new(self.container_id.clone(), self.private_port)
    }
}
