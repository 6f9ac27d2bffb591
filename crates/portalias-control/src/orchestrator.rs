//! Sequential control loop
//!
//! The orchestrator is the only writer of the registry. Events are applied one
//! at a time in arrival order; relays themselves run on their own tasks.

use anyhow::{Context, Result};
use futures::StreamExt;
use portalias_proto::ContainerEvent;
use portalias_registry::{Registry, RegistryError, RegistryView};
use portalias_runtime::ContainerRuntime;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Registry,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Registry) -> Self {
        Self { runtime, registry }
    }

    /// Read-only handle for inspection while the loop runs
    pub fn view(&self) -> RegistryView {
        self.registry.view()
    }

    /// Reconcile the running containers, then follow runtime events until
    /// `shutdown` resolves or something fatal happens.
    ///
    /// Every relay is stopped before this returns, whatever the outcome.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = self.run_until(shutdown).await;
        if let Err(e) = &result {
            error!("Control loop failed: {:#}", e);
        }

        self.registry.shutdown().await;
        result
    }

    async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        // Subscribe before listing so nothing started in between is missed;
        // a container seen twice is harmless
        let mut events = self.runtime.events();

        let running = self
            .runtime
            .list_running()
            .await
            .context("Failed to list running containers")?;
        info!("Found {} running container(s)", running.len());

        for container_id in &running {
            self.registry
                .add_container(self.runtime.as_ref(), container_id)
                .await
                .with_context(|| format!("Failed to add container {}", container_id))?;
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping {} relay(s)", self.registry.len());
                    return Ok(());
                }

                event = events.next() => match event {
                    Some(Ok(event)) => {
                        let container_id = event.container_id().to_string();
                        self.handle_event(event)
                            .await
                            .with_context(|| format!("Failed to handle event for container {}", container_id))?;
                    }
                    Some(Err(e)) => return Err(e).context("Container event stream failed"),
                    None => anyhow::bail!("Container event stream ended"),
                },
            }
        }
    }

    /// Apply a single event to the registry
    pub async fn handle_event(&mut self, event: ContainerEvent) -> Result<(), RegistryError> {
        debug!("Handling {:?}", event);

        match event {
            ContainerEvent::Started(container_id) => {
                self.registry
                    .add_container(self.runtime.as_ref(), &container_id)
                    .await?;
            }
            ContainerEvent::Stopped(container_id) => {
                self.registry.remove_container(&container_id).await;
            }
        }
        Ok(())
    }
}
