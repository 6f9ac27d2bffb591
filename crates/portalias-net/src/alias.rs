//! Loopback alias provisioning
//!
//! Adding an address to the loopback interface is platform specific; the
//! allocator only sees the [`AliasProvisioner`] capability.

use std::fmt;
use std::net::Ipv4Addr;
use std::process::Command;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Alias provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Capability to add an address alias to the loopback interface
pub trait AliasProvisioner: Send + Sync {
    fn provision(&self, addr: Ipv4Addr) -> Result<(), ProvisionError>;
}

/// How aliases are added on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasMethod {
    /// BSD/macOS: `ifconfig <iface> alias <addr> up`
    Ifconfig,
    /// Linux iproute2: `ip addr add <addr>/32 dev <iface>`
    Ip,
    /// Do nothing (the whole loopback range is already routed locally)
    None,
}

impl AliasMethod {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            AliasMethod::Ip
        } else {
            AliasMethod::Ifconfig
        }
    }

    /// Loopback interface name on this platform
    pub fn default_interface() -> &'static str {
        if cfg!(target_os = "linux") {
            "lo"
        } else {
            "lo0"
        }
    }
}

impl FromStr for AliasMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ifconfig" => Ok(AliasMethod::Ifconfig),
            "ip" => Ok(AliasMethod::Ip),
            "none" => Ok(AliasMethod::None),
            other => Err(format!(
                "Unknown alias method '{}' (expected ifconfig, ip or none)",
                other
            )),
        }
    }
}

impl fmt::Display for AliasMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AliasMethod::Ifconfig => "ifconfig",
            AliasMethod::Ip => "ip",
            AliasMethod::None => "none",
        };
        f.write_str(s)
    }
}

/// Provisions aliases by running the platform's network configuration tool
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    method: AliasMethod,
    interface: String,
}

impl CommandProvisioner {
    pub fn new(method: AliasMethod, interface: impl Into<String>) -> Self {
        Self {
            method,
            interface: interface.into(),
        }
    }

    pub fn method(&self) -> AliasMethod {
        self.method
    }

    /// Program and arguments for adding `addr`, or `None` when nothing runs
    pub fn command_line(&self, addr: Ipv4Addr) -> Option<(&'static str, Vec<String>)> {
        match self.method {
            AliasMethod::Ifconfig => Some((
                "ifconfig",
                vec![
                    self.interface.clone(),
                    "alias".to_string(),
                    addr.to_string(),
                    "up".to_string(),
                ],
            )),
            AliasMethod::Ip => Some((
                "ip",
                vec![
                    "addr".to_string(),
                    "add".to_string(),
                    format!("{}/32", addr),
                    "dev".to_string(),
                    self.interface.clone(),
                ],
            )),
            AliasMethod::None => None,
        }
    }
}

impl Default for CommandProvisioner {
    fn default() -> Self {
        Self::new(
            AliasMethod::platform_default(),
            AliasMethod::default_interface(),
        )
    }
}

impl AliasProvisioner for CommandProvisioner {
    fn provision(&self, addr: Ipv4Addr) -> Result<(), ProvisionError> {
        let Some((program, args)) = self.command_line(addr) else {
            debug!("Alias provisioning disabled, assuming {} is routable", addr);
            return Ok(());
        };

        let command = format!("{} {}", program, args.join(" "));
        debug!("Provisioning loopback alias: {}", command);

        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|source| ProvisionError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // Aliases outlive the process, so one left over from a previous run is fine
            if self.method == AliasMethod::Ip && stderr.contains("File exists") {
                debug!("Loopback alias {} already present", addr);
                return Ok(());
            }
            return Err(ProvisionError::Failed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        info!("Added loopback alias {} on {}", addr, self.interface);
        Ok(())
    }
}
