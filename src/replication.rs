//! Cache-fill replication across the cluster.
//!
//! Fan-out originates only at the leader: followers that complete a fill
//! tell the leader via `notify_cached`, and the leader instructs every peer
//! to pull the image from its own endpoint. Fan-out failures are logged and
//! dropped; a node missed here converges later through its own miss path.

use crate::election;
use crate::net::client;
use crate::node::EdgeState;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Post-fill hook: the leader fans out, a follower notifies the leader.
pub async fn after_fill(state: &Arc<EdgeState>, id: u64) {
    if state.is_leader() {
        fan_out(state, id).await;
    } else {
        notify_leader(state, id).await;
    }
}

/// Leader-side: instruct every peer to pull `id` from this node.
pub async fn fan_out(state: &Arc<EdgeState>, id: u64) {
    let leader_host = state.config.edge_host(state.id);
    let leader_port = state.config.edge_port(state.id);
    info!("edge {}: replicating image{} to peers", state.id, id);
    for peer in &state.peers {
        match client::replicate(
            &peer.host,
            peer.port,
            id,
            &leader_host,
            leader_port,
            state.config.replicate_deadline,
        )
        .await
        {
            Ok(()) => {
                info!("edge {}: replicate instruction to edge {} completed", state.id, peer.id)
            }
            Err(e) => {
                warn!(
                    "edge {}: replication to {}:{} failed: {}",
                    state.id, peer.host, peer.port, e
                )
            }
        }
    }
}

/// Follower-side: report a completed fill to the leader. An unknown or
/// unreachable leader means the cluster has no working coordinator, so
/// start an election instead.
async fn notify_leader(state: &Arc<EdgeState>, id: u64) {
    let Some(leader) = state.leader_id() else {
        warn!("edge {}: no leader known, starting election before replication", state.id);
        election::spawn(state.clone());
        return;
    };

    let host = state.config.edge_host(leader);
    let port = state.config.edge_port(leader);
    match client::notify_cached(&host, port, id, state.config.notify_deadline).await {
        Ok(()) => debug!("edge {}: notified leader {} about cached image{}", state.id, leader, id),
        Err(e) => {
            warn!("edge {}: failed to notify leader {}: {}", state.id, leader, e);
            election::spawn(state.clone());
        }
    }
}
