//! Relay lifecycle: bind, accept, forward, stop

use crate::forward::forward;
use crate::tracker::{ConnectionId, ConnectionTracker, TrackerEvent};
use crate::RelayError;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub hostname: String,
    /// Address to listen on
    pub source: SocketAddr,
    /// Address every accepted connection is forwarded to
    pub destination: SocketAddr,
}

/// Relay lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Created,
    Running,
    /// Listener closed, open connections being force-closed
    Stopping,
    Stopped,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayState::Created => "created",
            RelayState::Running => "running",
            RelayState::Stopping => "stopping",
            RelayState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub(crate) struct SharedState(Arc<Mutex<RelayState>>);

impl SharedState {
    pub(crate) fn new(state: RelayState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub(crate) fn get(&self) -> RelayState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set(&self, state: RelayState) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Move to `to` only from `from`; returns whether the move happened
    pub(crate) fn transition(&self, from: RelayState, to: RelayState) -> bool {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *guard == from {
            *guard = to;
            true
        } else {
            false
        }
    }
}

/// Connection counters for one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Connections accepted since start
    pub accepted: u64,
    /// Connections currently tracked as open
    pub open: usize,
}

/// Forwards every connection accepted on `source` to `destination`.
///
/// `start` binds the listener and spawns the accept loop and the connection
/// tracker. `stop` closes the listener, force-closes every open connection and
/// returns once all of the relay's tasks have exited.
pub struct Relay {
    config: RelayConfig,
    state: SharedState,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    local_addr: OnceLock<SocketAddr>,
    accepted: Arc<AtomicU64>,
    open: Arc<AtomicUsize>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let tasks = TaskTracker::new();
        // Closed up front: wait() returns as soon as every spawned task is done,
        // and immediately for a relay that never started
        tasks.close();

        Self {
            config,
            state: SharedState::new(RelayState::Created),
            shutdown: CancellationToken::new(),
            tasks,
            local_addr: OnceLock::new(),
            accepted: Arc::new(AtomicU64::new(0)),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the listener and start forwarding. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, RelayError> {
        if !self.state.transition(RelayState::Created, RelayState::Running) {
            return Err(RelayError::AlreadyStarted {
                hostname: self.config.hostname.clone(),
            });
        }

        let (listener, local_addr) = match bind_listener(self.config.source).await {
            Ok(bound) => bound,
            Err(e) => {
                self.state.set(RelayState::Stopped);
                return Err(e);
            }
        };
        let _ = self.local_addr.set(local_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tracker = ConnectionTracker::new(
            self.config.hostname.clone(),
            events_rx,
            self.open.clone(),
            self.state.clone(),
        );
        self.tasks.spawn(tracker.run());

        self.tasks.spawn(accept_loop(
            listener,
            self.config.clone(),
            self.shutdown.clone(),
            self.tasks.clone(),
            events_tx,
            self.state.clone(),
            self.accepted.clone(),
        ));

        info!(
            hostname = %self.config.hostname,
            "Started relay; listening: {}; dialling: {}",
            local_addr, self.config.destination
        );
        Ok(local_addr)
    }

    /// Close the listener, then wait for every connection and task of this
    /// relay to finish.
    pub async fn stop(&self) {
        if self.state.transition(RelayState::Created, RelayState::Stopped) {
            return;
        }

        if !self.shutdown.is_cancelled() {
            info!(hostname = %self.config.hostname, "Stopping relay on {}", self.config.source);
            self.shutdown.cancel();
        }
        self.wait().await;
    }

    /// Wait until the relay has fully stopped. Returns immediately for a relay
    /// that was never started.
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    pub fn source(&self) -> SocketAddr {
        self.config.source
    }

    pub fn destination(&self) -> SocketAddr {
        self.config.destination
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            open: self.open.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("hostname", &self.config.hostname)
            .field("source", &self.config.source)
            .field("destination", &self.config.destination)
            .field("state", &self.state.get())
            .finish()
    }
}

async fn bind_listener(source: SocketAddr) -> Result<(TcpListener, SocketAddr), RelayError> {
    let bind_error = |source_err| RelayError::Bind {
        address: source,
        source: source_err,
    };

    let listener = TcpListener::bind(source).await.map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    Ok((listener, local_addr))
}

async fn accept_loop(
    listener: TcpListener,
    config: RelayConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    tracker: mpsc::UnboundedSender<TrackerEvent>,
    state: SharedState,
    accepted: Arc<AtomicU64>,
) {
    let mut next_id: ConnectionId = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = listener.accept() => result,
        };

        match result {
            Ok((stream, peer_addr)) => {
                next_id += 1;
                accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    hostname = %config.hostname,
                    "Accepted connection {} from {}",
                    next_id, peer_addr
                );

                // Registered before its forward task exists so CloseAll cannot miss it
                let close = CancellationToken::new();
                let opened = TrackerEvent::Opened {
                    id: next_id,
                    close: close.clone(),
                };
                if tracker.send(opened).is_err() {
                    break;
                }

                tasks.spawn(forward(
                    next_id,
                    stream,
                    peer_addr,
                    config.destination,
                    close,
                    tracker.clone(),
                ));
            }
            Err(e) => {
                error!(hostname = %config.hostname, "Accept failed on {}: {}", config.source, e);
                break;
            }
        }
    }

    drop(listener);
    info!(hostname = %config.hostname, "Shutting down listener on {}", config.source);

    state.transition(RelayState::Running, RelayState::Stopping);
    let _ = tracker.send(TrackerEvent::CloseAll);
}
