//! Container runtime boundary
//!
//! The reconciler and the control loop only see [`ContainerRuntime`]: list the
//! running containers, inspect one, and follow lifecycle events. The Docker
//! Engine implementation lives behind the `docker` feature.

#[cfg(feature = "docker")]
pub mod docker;
pub mod error;
pub mod host;

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use host::resolve_host_ip;

use async_trait::async_trait;
use futures::stream::BoxStream;
use portalias_proto::{ContainerEvent, ContainerId, ContainerInfo};

/// Stream of container lifecycle events
pub type EventStream = BoxStream<'static, Result<ContainerEvent, RuntimeError>>;

/// Operations the forwarding core needs from the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of the containers currently running
    async fn list_running(&self) -> Result<Vec<ContainerId>, RuntimeError>;

    /// Current name and port mappings of a container
    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Subscribe to container start/stop events
    fn events(&self) -> EventStream;
}
