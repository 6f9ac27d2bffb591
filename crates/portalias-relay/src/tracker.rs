//! Connection tracker
//!
//! Single owner of a relay's open-connection set. The accept loop and the
//! forward tasks only talk to it through [`TrackerEvent`]s, so the set needs no
//! lock. Each tracked connection is represented by the token that force-closes
//! it.

use crate::relay::{RelayState, SharedState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type ConnectionId = u64;

#[derive(Debug)]
pub(crate) enum TrackerEvent {
    /// Sent by the accept loop before the connection's forward task starts
    Opened {
        id: ConnectionId,
        close: CancellationToken,
    },
    /// Sent by a forward task once both of its sockets are gone
    Closed(ConnectionId),
    /// Sent by the accept loop after it stopped accepting
    CloseAll,
}

pub(crate) struct ConnectionTracker {
    hostname: String,
    events: mpsc::UnboundedReceiver<TrackerEvent>,
    open: HashMap<ConnectionId, CancellationToken>,
    open_count: Arc<AtomicUsize>,
    state: SharedState,
}

impl ConnectionTracker {
    pub(crate) fn new(
        hostname: String,
        events: mpsc::UnboundedReceiver<TrackerEvent>,
        open_count: Arc<AtomicUsize>,
        state: SharedState,
    ) -> Self {
        Self {
            hostname,
            events,
            open: HashMap::new(),
            open_count,
            state,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                TrackerEvent::Opened { id, close } => {
                    self.open.insert(id, close);
                }
                TrackerEvent::Closed(id) => {
                    self.open.remove(&id);
                }
                TrackerEvent::CloseAll => break,
            }
            self.open_count.store(self.open.len(), Ordering::Relaxed);
        }

        // Also reached if the accept loop went away without asking
        self.close_all();
    }

    fn close_all(&mut self) {
        let count = self.open.len();
        for (_, close) in self.open.drain() {
            close.cancel();
        }
        self.open_count.store(0, Ordering::Relaxed);
        self.events.close();

        debug!(
            hostname = %self.hostname,
            "Force-closed {} open connection(s)",
            count
        );
        self.state.set(RelayState::Stopped);
    }
}
