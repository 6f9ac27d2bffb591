//! Container metadata as reported by the runtime

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport protocol of an exposed container port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
    Sctp,
}

impl PortProtocol {
    /// Parse the protocol suffix of a runtime port key (`"80/tcp"`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(PortProtocol::Tcp),
            "udp" => Some(PortProtocol::Udp),
            "sctp" => Some(PortProtocol::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
            PortProtocol::Sctp => "sctp",
        };
        f.write_str(s)
    }
}

/// One exposed port of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container
    pub private_port: u16,
    /// Port published on the runtime host (0 = not published)
    pub public_port: u16,
    /// Host IP the port is published on, as reported by the runtime.
    /// May be unspecified (`0.0.0.0`, `::`) or empty.
    pub ip: String,
    pub protocol: PortProtocol,
}

impl PortMapping {
    pub fn tcp(private_port: u16, public_port: u16, ip: impl Into<String>) -> Self {
        Self {
            private_port,
            public_port,
            ip: ip.into(),
            protocol: PortProtocol::Tcp,
        }
    }

    pub fn is_published(&self) -> bool {
        self.public_port != 0 && self.private_port != 0
    }
}

/// Inspection result for a single container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Assigned name; runtimes commonly prefix it with `/`
    pub name: String,
    pub ports: Vec<PortMapping>,
}

impl ContainerInfo {
    /// Short form of the container id for log lines
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// First twelve characters of a container id, the form runtimes print
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!(PortProtocol::parse("tcp"), Some(PortProtocol::Tcp));
        assert_eq!(PortProtocol::parse("UDP"), Some(PortProtocol::Udp));
        assert_eq!(PortProtocol::parse("quic"), None);
    }

    #[test]
    fn test_is_published() {
        assert!(PortMapping::tcp(80, 32768, "0.0.0.0").is_published());
        assert!(!PortMapping::tcp(80, 0, "").is_published());
        assert!(!PortMapping::tcp(0, 8080, "0.0.0.0").is_published());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("4f2c1a9e8b7d6c5b4a39"), "4f2c1a9e8b7d");
        assert_eq!(short_id("abc"), "abc");
    }
}
