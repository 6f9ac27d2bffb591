//! Reconciliation tests against a fake container runtime
//!
//! Verifies:
//! - Adding a container starts one relay per published TCP port and publishes its hostname
//! - Adding the same container again creates nothing new
//! - Removing a container stops its relays, unpublishes hostnames and releases claims
//! - Released claims are reused before a new alias is provisioned
//! - Bad ports, unnamed containers and failed inspections are skipped
//! - A relay that can't bind gives its claim back
//! - Provisioning failures surface as fatal errors

use async_trait::async_trait;
use futures::StreamExt;
use portalias_net::{AddressAllocator, AliasProvisioner, ProvisionError};
use portalias_proto::{ContainerId, ContainerInfo, PortMapping, PortProtocol, RelayKey};
use portalias_registry::{HostnameZone, Registry, RegistryConfig, RegistryError};
use portalias_runtime::{ContainerRuntime, EventStream, RuntimeError};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Runtime that answers inspections from a fixed table
#[derive(Default)]
struct FakeRuntime {
    containers: Mutex<HashMap<String, ContainerInfo>>,
}

impl FakeRuntime {
    fn insert(&self, container: ContainerInfo) {
        self.containers
            .lock()
            .unwrap()
            .insert(container.id.clone(), container);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerId>, RuntimeError> {
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    fn events(&self) -> EventStream {
        futures::stream::empty().boxed()
    }
}

/// Records provisioned aliases, failing once `limit` is reached
struct TestProvisioner {
    provisioned: Mutex<Vec<Ipv4Addr>>,
    limit: usize,
}

impl TestProvisioner {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            provisioned: Mutex::new(Vec::new()),
            limit,
        })
    }

    fn provisioned(&self) -> Vec<Ipv4Addr> {
        self.provisioned.lock().unwrap().clone()
    }
}

impl AliasProvisioner for TestProvisioner {
    fn provision(&self, addr: Ipv4Addr) -> Result<(), ProvisionError> {
        let mut provisioned = self.provisioned.lock().unwrap();
        if provisioned.len() >= self.limit {
            return Err(ProvisionError::Failed {
                command: format!("alias {}", addr),
                status: "exit status: 1".to_string(),
                stderr: "operation not permitted".to_string(),
            });
        }
        provisioned.push(addr);
        Ok(())
    }
}

fn setup(start: Ipv4Addr, limit: usize) -> (Registry, Arc<TestProvisioner>) {
    let provisioner = TestProvisioner::new(limit);
    let allocator = AddressAllocator::new(start, provisioner.clone()).unwrap();
    let registry = Registry::new(RegistryConfig::default(), allocator, HostnameZone::default());
    (registry, provisioner)
}

async fn start_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    port
}

fn container(id: &str, name: &str, ports: &[u16]) -> ContainerInfo {
    ContainerInfo {
        id: id.to_string(),
        name: name.to_string(),
        ports: ports
            .iter()
            .map(|port| PortMapping::tcp(*port, *port, "0.0.0.0"))
            .collect(),
    }
}

async fn echo_through(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();

    let mut received = vec![0u8; payload.len()];
    stream.read_exact(&mut received).await.unwrap();
    received
}

#[tokio::test]
async fn test_add_container_starts_relays() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-add", "/web_1", &[port]));
    let (mut registry, provisioner) = setup(Ipv4Addr::new(127, 22, 0, 1), 8);

    let added = registry.add_container(&runtime, "c-add").await.unwrap();

    assert_eq!(added.len(), 1);
    let binding = &added[0];
    assert_eq!(binding.hostname, "web-1");
    assert_eq!(binding.container_name, "/web_1");
    assert_eq!(*binding.source.ip(), Ipv4Addr::new(127, 22, 0, 1));
    assert_eq!(binding.source.port(), port);
    assert_eq!(binding.destination, SocketAddr::from(([127, 0, 0, 1], port)));
    assert_eq!(provisioner.provisioned(), vec![Ipv4Addr::new(127, 22, 0, 1)]);

    let zone = registry.zone();
    assert_eq!(zone.resolve("web-1.pharod"), Some(Ipv4Addr::new(127, 22, 0, 1)));

    let received = echo_through(SocketAddr::V4(binding.source), b"hello relay").await;
    assert_eq!(received, b"hello relay");

    let view = registry.view();
    assert_eq!(view.snapshot(), added);
    assert!(view.contains(&RelayKey::new("c-add", port)));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_add_container_twice_is_idempotent() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-twice", "/api", &[port]));
    let (mut registry, provisioner) = setup(Ipv4Addr::new(127, 22, 1, 1), 8);

    let first = registry.add_container(&runtime, "c-twice").await.unwrap();
    let second = registry.add_container(&runtime, "c-twice").await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.allocator().claim_count(), 1);
    assert_eq!(provisioner.provisioned().len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_remove_container_cleans_up() {
    let first_port = start_echo_server().await;
    let second_port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-rm", "/db", &[first_port, second_port]));
    let (mut registry, _provisioner) = setup(Ipv4Addr::new(127, 22, 2, 1), 8);

    let added = registry.add_container(&runtime, "c-rm").await.unwrap();
    assert_eq!(added.len(), 2);

    // An open connection must not keep the relay alive
    let mut open = TcpStream::connect(SocketAddr::V4(added[0].source)).await.unwrap();
    open.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    open.read_exact(&mut buf).await.unwrap();

    let removed = registry.remove_container("c-rm").await;

    assert_eq!(removed.len(), 2);
    assert!(removed[0].private_port < removed[1].private_port);
    assert!(registry.is_empty());
    assert!(registry.zone().is_empty());
    assert_eq!(registry.allocator().claim_count(), 0);
    assert_eq!(
        registry.allocator().addresses(),
        vec![Ipv4Addr::new(127, 22, 2, 1)],
        "aliases are never deprovisioned"
    );

    let n = open.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "connection should be closed by the stop");

    for binding in &removed {
        assert!(TcpStream::connect(SocketAddr::V4(binding.source)).await.is_err());
    }

    assert!(registry.remove_container("c-rm").await.is_empty());
}

#[tokio::test]
async fn test_released_claim_is_reused() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-one", "/one", &[port]));
    runtime.insert(container("c-two", "/two", &[port]));
    runtime.insert(container("c-three", "/three", &[port]));
    let (mut registry, provisioner) = setup(Ipv4Addr::new(127, 22, 3, 1), 8);

    let one = registry.add_container(&runtime, "c-one").await.unwrap();
    let two = registry.add_container(&runtime, "c-two").await.unwrap();
    assert_eq!(*one[0].source.ip(), Ipv4Addr::new(127, 22, 3, 1));
    assert_eq!(*two[0].source.ip(), Ipv4Addr::new(127, 22, 3, 2));

    registry.remove_container("c-one").await;
    let three = registry.add_container(&runtime, "c-three").await.unwrap();

    assert_eq!(*three[0].source.ip(), Ipv4Addr::new(127, 22, 3, 1));
    assert_eq!(provisioner.provisioned().len(), 2);
    assert_eq!(registry.zone().lookup("three"), Some(Ipv4Addr::new(127, 22, 3, 1)));
    assert_eq!(registry.zone().lookup("one"), None);

    let received = echo_through(SocketAddr::V4(three[0].source), b"reused").await;
    assert_eq!(received, b"reused");

    registry.shutdown().await;
}

#[tokio::test]
async fn test_bad_items_are_skipped() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-anon", "", &[port]));
    runtime.insert(container("c-hash", "####", &[port]));
    runtime.insert(ContainerInfo {
        id: "c-mixed".to_string(),
        name: "/mixed".to_string(),
        ports: vec![
            PortMapping::tcp(81, 0, ""),
            PortMapping {
                private_port: 53,
                public_port: 5353,
                ip: "0.0.0.0".to_string(),
                protocol: PortProtocol::Udp,
            },
            PortMapping::tcp(port, port, "0.0.0.0"),
        ],
    });
    let (mut registry, _provisioner) = setup(Ipv4Addr::new(127, 22, 4, 1), 8);

    assert!(registry.add_container(&runtime, "missing").await.unwrap().is_empty());
    assert!(registry.add_container(&runtime, "c-anon").await.unwrap().is_empty());
    assert!(registry.add_container(&runtime, "c-hash").await.unwrap().is_empty());

    let added = registry.add_container(&runtime, "c-mixed").await.unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].private_port, port);
    assert_eq!(registry.allocator().claim_count(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_bind_failure_releases_claim() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-busy", "/busy", &[port]));
    let (mut registry, _provisioner) = setup(Ipv4Addr::new(127, 22, 5, 1), 8);

    let _squatter = TcpListener::bind((Ipv4Addr::new(127, 22, 5, 1), port))
        .await
        .unwrap();

    let added = registry.add_container(&runtime, "c-busy").await.unwrap();

    assert!(added.is_empty());
    assert!(registry.is_empty());
    assert!(registry.zone().is_empty());
    assert_eq!(registry.allocator().claim_count(), 0);
}

#[tokio::test]
async fn test_provision_failure_is_fatal() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-first", "/first", &[port]));
    runtime.insert(container("c-second", "/second", &[port]));
    let (mut registry, _provisioner) = setup(Ipv4Addr::new(127, 22, 6, 1), 1);

    registry.add_container(&runtime, "c-first").await.unwrap();
    let result = registry.add_container(&runtime, "c-second").await;

    assert!(matches!(result, Err(RegistryError::Allocation(_))));
    assert_eq!(registry.len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_sorted_and_serializable() {
    let port = start_echo_server().await;
    let runtime = FakeRuntime::default();
    runtime.insert(container("c-zeta", "/zeta", &[port]));
    runtime.insert(container("c-alpha", "/alpha", &[port]));
    let (mut registry, _provisioner) = setup(Ipv4Addr::new(127, 22, 7, 1), 8);

    registry.add_container(&runtime, "c-zeta").await.unwrap();
    registry.add_container(&runtime, "c-alpha").await.unwrap();

    let view = registry.view();
    let hostnames: Vec<_> = view.snapshot().into_iter().map(|b| b.hostname).collect();
    assert_eq!(hostnames, vec!["alpha", "zeta"]);

    let json = serde_json::to_value(view.snapshot()).unwrap();
    assert_eq!(json[0]["hostname"], "alpha");
    assert_eq!(json[0]["source"], format!("127.22.7.2:{}", port));

    registry.shutdown().await;
    assert!(view.is_empty());
    assert!(view.zone().is_empty());
}
