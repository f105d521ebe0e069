//! Heartbeat-driven leader failure detection.
//!
//! Followers probe the leader every tick. A failed probe alone does not
//! dethrone the leader; only leader silence longer than `fail_threshold`
//! clears the leader field and starts a new election. A node that is
//! itself the leader just refreshes its own contact timestamp.

use crate::election;
use crate::net::client;
use crate::node::EdgeState;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn run(state: Arc<EdgeState>) {
    let mut ticker = tokio::time::interval(state.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !state.alive.load(Ordering::SeqCst) {
            break;
        }
        tick(&state).await;
    }
}

/// One detector tick.
pub(crate) async fn tick(state: &Arc<EdgeState>) {
    let leader = match state.leader_id() {
        // No leader known; an election is either running or imminent.
        None => return,
        Some(id) if id == state.id => {
            state.touch_leader_contact();
            return;
        }
        Some(id) => id,
    };

    let host = state.config.edge_host(leader);
    let port = state.config.edge_port(leader);
    match client::heartbeat(&host, port, state.config.heartbeat_deadline).await {
        Ok(_) => state.touch_leader_contact(),
        Err(e) => {
            debug!("edge {}: heartbeat to leader {} failed: {}", state.id, leader, e);
            if state.leader_contact_elapsed() > state.config.fail_threshold {
                warn!("edge {}: leader {} heartbeat lost, starting election", state.id, leader);
                state.clear_leader();
                election::spawn(state.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_leader_refreshes_own_contact() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClusterConfig::local();
        config.num_edges = 1;
        config.data_root = dir.path().to_path_buf();
        let state = Arc::new(EdgeState::new(0, config).unwrap());
        state.become_leader();

        tokio::time::sleep(Duration::from_millis(30)).await;
        tick(&state).await;
        assert!(state.leader_contact_elapsed() < Duration::from_millis(20));
        assert_eq!(state.leader_id(), Some(0));
    }

    #[tokio::test]
    async fn test_silent_leader_triggers_election() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClusterConfig::local();
        config.num_edges = 2;
        // Nothing listens here, so probes to the "leader" are refused.
        config.base_port = 48261;
        config.data_root = dir.path().to_path_buf();
        config.heartbeat_deadline = Duration::from_millis(200);
        config.election_deadline = Duration::from_millis(200);
        config.fail_threshold = Duration::from_millis(50);
        let state = Arc::new(EdgeState::new(0, config).unwrap());
        state.set_coordinator(1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        tick(&state).await;
        // Leader field cleared at once; the spawned election then wins
        // because edge 1 stays unreachable.
        assert_eq!(state.leader_id(), None);
        for _ in 0..50 {
            if state.leader_id() == Some(0) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("edge 0 never took over leadership");
    }

    #[tokio::test]
    async fn test_one_failed_probe_keeps_leader() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClusterConfig::local();
        config.num_edges = 2;
        config.base_port = 48271;
        config.data_root = dir.path().to_path_buf();
        config.heartbeat_deadline = Duration::from_millis(200);
        // Generous threshold: one refused probe must not dethrone.
        config.fail_threshold = Duration::from_secs(30);
        let state = Arc::new(EdgeState::new(0, config).unwrap());
        state.set_coordinator(1);

        tick(&state).await;
        assert_eq!(state.leader_id(), Some(1));
    }
}
