//! portalias - loopback alias port forwarding for containers
//!
//! Gives every published container port its own loopback address, reachable
//! under a hostname derived from the container name.

use anyhow::{Context, Result};
use clap::Parser;
use portalias_control::Orchestrator;
use portalias_net::{AddressAllocator, AliasMethod, CommandProvisioner, DEFAULT_SOURCE_START};
use portalias_registry::{HostnameZone, Registry, RegistryConfig};
use portalias_runtime::{resolve_host_ip, DockerRuntime};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Forward published container ports to per-container loopback addresses
#[derive(Parser, Debug)]
#[command(name = "portalias")]
#[command(about = "Forward published container ports to per-container loopback addresses", long_about = None)]
#[command(version = env!("PORTALIAS_GIT_TAG"))]
#[command(long_version = concat!(env!("PORTALIAS_GIT_TAG"), "\nCommit: ", env!("PORTALIAS_GIT_HASH"), "\nBuilt: ", env!("PORTALIAS_BUILD_TIME")))]
struct Cli {
    /// Published ports at or above this were assigned by the runtime
    #[arg(long, env = "DOCKER_FIRST_EPHEMERAL_PORT", default_value = "49152")]
    first_ephemeral_port: u16,

    /// Container runtime endpoint (e.g. unix:///var/run/docker.sock, tcp://host:2376)
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,

    /// Address used for ports published on all interfaces
    /// Defaults to the host of --docker-host, or 127.0.0.1 for a local runtime
    #[arg(long, env = "DOCKER_HOST_IP")]
    docker_host_ip: Option<String>,

    /// First loopback alias to hand out
    #[arg(long, env = "PORTALIAS_SOURCE_START_IP", default_value_t = DEFAULT_SOURCE_START)]
    source_start_ip: Ipv4Addr,

    /// How loopback aliases are added: ifconfig, ip or none
    #[arg(long, env = "PORTALIAS_ALIAS_METHOD")]
    alias_method: Option<AliasMethod>,

    /// Loopback interface the aliases are added to
    #[arg(long, env = "PORTALIAS_ALIAS_INTERFACE")]
    alias_interface: Option<String>,

    /// Domain the hostnames are published under
    #[arg(long, env = "PORTALIAS_DOMAIN", default_value = "pharod")]
    domain: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    info!(
        "Starting portalias {} ({})",
        env!("PORTALIAS_GIT_TAG"),
        env!("PORTALIAS_GIT_HASH")
    );

    let host_ip = resolve_host_ip(cli.docker_host_ip.as_deref(), cli.docker_host.as_deref())
        .context("Failed to determine the container host address")?;
    info!("Unspecified destinations resolve to {}", host_ip);

    let method = cli.alias_method.unwrap_or_else(AliasMethod::platform_default);
    let interface = cli
        .alias_interface
        .clone()
        .unwrap_or_else(|| AliasMethod::default_interface().to_string());
    info!(
        "Loopback aliases start at {} ({} on {})",
        cli.source_start_ip, method, interface
    );

    let provisioner = Arc::new(CommandProvisioner::new(method, interface));
    let allocator = AddressAllocator::new(cli.source_start_ip, provisioner)
        .context("Invalid source start address")?;

    let runtime = DockerRuntime::connect(cli.docker_host.as_deref())
        .await
        .context("Failed to connect to Docker")?;

    let zone = HostnameZone::new(cli.domain.as_str());
    info!("Publishing hostnames under .{}", zone.domain());

    let registry = Registry::new(
        RegistryConfig {
            first_ephemeral_port: cli.first_ephemeral_port,
            host_ip,
        },
        allocator,
        zone,
    );

    let orchestrator = Orchestrator::new(Arc::new(runtime), registry);
    info!("Press Ctrl+C to stop");

    orchestrator
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received, stopping relays...");
                }
                Err(err) => {
                    error!("Error listening for shutdown signal: {}", err);
                }
            }
        })
        .await?;

    info!("portalias stopped");
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
