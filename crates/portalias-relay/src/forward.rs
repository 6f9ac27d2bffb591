//! Per-connection forwarding

use crate::tracker::{ConnectionId, TrackerEvent};
use std::net::SocketAddr;
use tokio::io;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Forward one accepted connection to `destination` until either side stops,
/// or until the tracker force-closes it.
pub(crate) async fn forward(
    id: ConnectionId,
    local: TcpStream,
    peer_addr: SocketAddr,
    destination: SocketAddr,
    close: CancellationToken,
    tracker: mpsc::UnboundedSender<TrackerEvent>,
) {
    tokio::select! {
        biased;
        _ = close.cancelled() => {
            debug!("Connection {} from {} force-closed", id, peer_addr);
        }
        _ = relay_connection(id, local, peer_addr, destination) => {}
    }

    // Both sockets were owned by the finished future and are closed by now
    let _ = tracker.send(TrackerEvent::Closed(id));
}

async fn relay_connection(
    id: ConnectionId,
    mut local: TcpStream,
    peer_addr: SocketAddr,
    destination: SocketAddr,
) {
    let mut remote = match TcpStream::connect(destination).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Remote dial to {} failed: {}", destination, e);
            return;
        }
    };

    let _ = local.set_nodelay(true);
    let _ = remote.set_nodelay(true);

    debug!(
        "Connection {} established: {} -> {}",
        id, peer_addr, destination
    );

    let (mut local_read, mut local_write) = local.split();
    let (mut remote_read, mut remote_write) = remote.split();

    let local_to_remote = io::copy(&mut local_read, &mut remote_write);
    let remote_to_local = io::copy(&mut remote_read, &mut local_write);

    // Whichever direction ends first tears down the pair. Half-close is not
    // propagated.
    tokio::select! {
        result = local_to_remote => {
            debug!("Connection {} local side finished: {:?}", id, result);
        }
        result = remote_to_local => {
            debug!("Connection {} remote side finished: {:?}", id, result);
        }
    }
}
