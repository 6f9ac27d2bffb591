//! Docker Engine runtime

use crate::{ContainerRuntime, EventStream, RuntimeError};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EventMessage, EventMessageTypeEnum, PortMap};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::Utc;
use futures::{future, StreamExt};
use portalias_proto::{ContainerEvent, ContainerId, ContainerInfo, PortMapping, PortProtocol};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Request timeout for the Docker API, in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the Docker Engine API
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the engine and check that it answers.
    ///
    /// With `DOCKER_TLS_VERIFY` set, the client certificate, key and CA are read
    /// from `DOCKER_CERT_PATH`. Without an endpoint the local defaults apply.
    pub async fn connect(endpoint: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = if tls_verify_enabled() {
            Self::connect_tls(endpoint)?
        } else {
            match endpoint {
                None => Docker::connect_with_local_defaults()?,
                Some(e) if e.starts_with("unix://") || e.starts_with('/') => {
                    Docker::connect_with_socket(e, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
                }
                Some(e) => Docker::connect_with_http(e, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION)?,
            }
        };

        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;

        let version = docker.version().await?;
        info!(
            "Connected to Docker {} (API {})",
            version.version.as_deref().unwrap_or("unknown"),
            version.api_version.as_deref().unwrap_or("unknown")
        );

        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn connect_tls(endpoint: Option<&str>) -> Result<Docker, RuntimeError> {
        let cert_path = std::env::var("DOCKER_CERT_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                RuntimeError::Connect("docker TLS required, but no DOCKER_CERT_PATH set".to_string())
            })?;

        let host = endpoint
            .map(str::to_string)
            .or_else(|| std::env::var("DOCKER_HOST").ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RuntimeError::Connect("docker TLS required, but no DOCKER_HOST set".to_string()))?;

        debug!("Connecting to {} with TLS material from {:?}", host, cert_path);
        let docker = Docker::connect_with_ssl(
            &host,
            &cert_path.join("key.pem"),
            &cert_path.join("cert.pem"),
            &cert_path.join("ca.pem"),
            DEFAULT_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )?;
        Ok(docker)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerId>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    RuntimeError::NotFound(id.to_string())
                }
                other => RuntimeError::from(other),
            })?;

        Ok(container_info(id, response))
    }

    /// The request only goes out when the stream is first polled, which can be
    /// well after this call. Events are requested from the time of this call
    /// so the engine replays anything that happened in between.
    fn events(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let since = Utc::now();
        debug!("Subscribing to container events since {}", since.to_rfc3339());

        self.docker
            .events(Some(EventsOptions::<String> {
                since: Some(since),
                filters,
                ..Default::default()
            }))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(message) => container_event(message).map(Ok),
                    Err(e) => Some(Err(RuntimeError::Events(e.to_string()))),
                })
            })
            .boxed()
    }
}

fn tls_verify_enabled() -> bool {
    std::env::var("DOCKER_TLS_VERIFY")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Convert a Docker event into a container event, dropping irrelevant ones
pub fn container_event(message: EventMessage) -> Option<ContainerEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }

    let id = message.actor.and_then(|actor| actor.id)?;
    let action = message.action?;
    ContainerEvent::from_action(&action, id)
}

/// Convert an inspect response into the runtime-neutral record
pub fn container_info(requested_id: &str, response: ContainerInspectResponse) -> ContainerInfo {
    let ports = response
        .network_settings
        .and_then(|settings| settings.ports)
        .map(port_mappings)
        .unwrap_or_default();

    ContainerInfo {
        id: response.id.unwrap_or_else(|| requested_id.to_string()),
        name: response.name.unwrap_or_default(),
        ports,
    }
}

/// Flatten a Docker port map (`"80/tcp" -> [bindings]`) into one mapping per
/// binding. Exposed ports without bindings yield a mapping with public port 0.
fn port_mappings(ports: PortMap) -> Vec<PortMapping> {
    let mut mappings = Vec::new();

    for (key, bindings) in ports {
        let Some((private_port, protocol)) = parse_port_key(&key) else {
            warn!("Ignoring unparsable port key '{}'", key);
            continue;
        };

        let bindings = bindings.unwrap_or_default();
        if bindings.is_empty() {
            mappings.push(PortMapping {
                private_port,
                public_port: 0,
                ip: String::new(),
                protocol,
            });
            continue;
        }

        for binding in bindings {
            let public_port = binding
                .host_port
                .as_deref()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0);
            mappings.push(PortMapping {
                private_port,
                public_port,
                ip: binding.host_ip.unwrap_or_default(),
                protocol,
            });
        }
    }

    // Port maps are unordered; IPv4 bindings sort ahead of IPv6 ones
    mappings.sort_by(|a, b| {
        (a.private_port, a.protocol as u8, &a.ip, a.public_port).cmp(&(
            b.private_port,
            b.protocol as u8,
            &b.ip,
            b.public_port,
        ))
    });
    mappings
}

fn parse_port_key(key: &str) -> Option<(u16, PortProtocol)> {
    let (port, protocol) = key.split_once('/').unwrap_or((key, "tcp"));
    Some((port.parse().ok()?, PortProtocol::parse(protocol)?))
}
