//! Bully leader election.
//!
//! A candidate messages every peer with a higher id. Any reply means a
//! higher edge is alive, so the candidate backs off and waits for that
//! edge's coordinator announcement; silence from all of them means this
//! node is the highest survivor and broadcasts itself as coordinator.
//! Ids are immutable and unique, so ties cannot happen; concurrent
//! elections converge on the highest live id.

use crate::net::client;
use crate::node::EdgeState;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Run an election on its own task.
pub fn spawn(state: Arc<EdgeState>) {
    tokio::spawn(run(state));
}

/// Run elections until this node either becomes leader or accepts a
/// coordinator announcement. One election at a time per node; a second
/// caller while one is running is a no-op.
pub async fn run(state: Arc<EdgeState>) {
    if state.electing.swap(true, Ordering::SeqCst) {
        return;
    }

    while state.alive.load(Ordering::SeqCst) {
        info!("edge {}: starting election", state.id);
        let epoch = state.leader_epoch();

        let mut acked = false;
        for peer in state.peers.iter().filter(|p| p.id > state.id) {
            match client::election(&peer.host, peer.port, state.id, state.config.election_deadline)
                .await
            {
                Ok(()) => {
                    debug!("edge {}: election acknowledged by edge {}", state.id, peer.id);
                    acked = true;
                }
                Err(e) => {
                    debug!("edge {}: no election reply from edge {}: {}", state.id, peer.id, e);
                }
            }
        }

        if !acked {
            info!("edge {}: no higher edge replied, declaring self coordinator", state.id);
            for peer in &state.peers {
                if let Err(e) = client::coordinator(
                    &peer.host,
                    peer.port,
                    state.id,
                    state.config.election_deadline,
                )
                .await
                {
                    debug!("edge {}: coordinator announce to edge {} failed: {}", state.id, peer.id, e);
                }
            }
            state.become_leader();
            info!("edge {}: now the leader", state.id);
            break;
        }

        if await_coordinator(&state, epoch).await {
            break;
        }
        // Higher edge answered but never announced; run again.
    }

    state.electing.store(false, Ordering::SeqCst);
}

/// Wait up to `announce_wait` for a coordinator announcement newer than
/// `epoch`. Returns true if one arrived.
async fn await_coordinator(state: &Arc<EdgeState>, epoch: u64) -> bool {
    let deadline = Instant::now() + state.config.announce_wait;
    loop {
        if state.leader_epoch() != epoch {
            let leader = state.leader_id();
            info!("edge {}: following coordinator {:?}", state.id, leader);
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let _ = tokio::time::timeout(deadline - now, state.coordinator_seen.notified()).await;
    }
}
