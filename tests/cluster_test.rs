//! Cluster integration tests: real sockets, in-process nodes.
//!
//! Each test boots its own origin plus edge fleet on a private loopback
//! port range with shortened timers, then drives the wire protocol through
//! the public client helpers.

use edgecdn::config::image_file_name;
use edgecdn::net::client;
use edgecdn::net::NetError;
use edgecdn::{Balancer, ClusterConfig, EdgeNode, OriginServer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Each test gets a disjoint port range so they can run concurrently.
static NEXT_BASE: AtomicU16 = AtomicU16::new(42000);

fn test_config(num_edges: u64, data_root: PathBuf) -> ClusterConfig {
    let base = NEXT_BASE.fetch_add(16, Ordering::SeqCst);
    let mut config = ClusterConfig::local();
    config.num_edges = num_edges;
    config.base_port = base;
    config.origin_port = base + 10;
    config.balancer_port = base + 11;
    config.data_root = data_root;
    config.startup_delay = Duration::from_millis(50);
    config.heartbeat_interval = Duration::from_millis(150);
    config.fail_threshold = Duration::from_millis(450);
    config.announce_wait = Duration::from_millis(400);
    config.origin_deadline = Duration::from_secs(2);
    config.election_deadline = Duration::from_millis(400);
    config.replicate_deadline = Duration::from_millis(800);
    config.heartbeat_deadline = Duration::from_millis(300);
    config.notify_deadline = Duration::from_millis(500);
    config.probe_interval = Duration::from_millis(200);
    config.probe_deadline = Duration::from_millis(200);
    config
}

struct TestCluster {
    _dir: tempfile::TempDir,
    config: ClusterConfig,
    origin: OriginServer,
    edges: Vec<EdgeNode>,
}

impl TestCluster {
    /// Boot an origin seeded with `images` and `num_edges` edge nodes.
    async fn start(num_edges: u64, images: &[(u64, Vec<u8>)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(num_edges, dir.path().to_path_buf());

        let images_dir = dir.path().join("images");
        std::fs::create_dir_all(&images_dir).unwrap();
        for (id, bytes) in images {
            std::fs::write(images_dir.join(image_file_name(*id)), bytes).unwrap();
        }
        let origin = OriginServer::new(images_dir, config.origin_port).unwrap();
        origin.start().await.unwrap();

        let mut edges = Vec::new();
        for id in 0..num_edges {
            let node = EdgeNode::new(id, config.clone()).unwrap();
            node.start().await.unwrap();
            edges.push(node);
        }
        Self { _dir: dir, config, origin, edges }
    }

    fn edge_port(&self, id: u64) -> u16 {
        self.config.edge_port(id)
    }

    fn edge_file(&self, edge: u64, image: u64) -> PathBuf {
        self.config.edge_dir(edge).join(image_file_name(image))
    }

    /// Poll until every edge in `ids` agrees on `want` as leader.
    async fn wait_for_leader(&self, ids: &[u64], want: u64) {
        for _ in 0..100 {
            if ids.iter().all(|id| self.edges[*id as usize].leader_id() == Some(want)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let seen: Vec<_> = ids.iter().map(|id| self.edges[*id as usize].leader_id()).collect();
        panic!("leader never converged on {want}: {seen:?}");
    }

    async fn wait_for_file(&self, edge: u64, image: u64, want: &[u8]) {
        let path = self.edge_file(edge, image);
        for _ in 0..100 {
            if let Ok(bytes) = std::fs::read(&path) {
                assert_eq!(bytes, want, "replicated file differs on edge {edge}");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("image{image} never appeared on edge {edge}");
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for edge in &self.edges {
            edge.shutdown();
        }
        self.origin.shutdown();
    }
}

#[tokio::test]
async fn test_size_query_does_not_warm_cache() {
    let payload = vec![0xAB; 1000];
    let cluster = TestCluster::start(3, &[(5, payload)]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    let size = client::fetch_image_size("127.0.0.1", cluster.edge_port(0), 5, 1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(size, 1000);

    // Size queries go straight through; no fill happened anywhere.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for edge in 0..3 {
        assert!(!cluster.edge_file(edge, 5).exists());
    }
    assert_eq!(cluster.origin.stats().size_requests, 1);
    assert_eq!(cluster.origin.stats().image_requests, 0);
}

#[tokio::test]
async fn test_fill_then_cluster_wide_replication() {
    let payload = vec![0xCD; 1000];
    let cluster = TestCluster::start(3, &[(5, payload.clone())]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    let bytes = client::fetch_image("127.0.0.1", cluster.edge_port(0), 5, 1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(bytes, payload);

    // Follower fill -> notify leader -> leader fan-out reaches every edge.
    cluster.wait_for_file(0, 5, &payload).await;
    cluster.wait_for_file(1, 5, &payload).await;
    cluster.wait_for_file(2, 5, &payload).await;

    // A warm re-read serves locally: no new origin traffic.
    let fills_before = cluster.origin.stats().image_requests;
    let again = client::fetch_image("127.0.0.1", cluster.edge_port(0), 5, 2, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(again, payload);
    assert_eq!(cluster.origin.stats().image_requests, fills_before);
}

#[tokio::test]
async fn test_missing_image_error_passthrough() {
    let cluster = TestCluster::start(3, &[(5, b"x".to_vec())]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    match client::fetch_image("127.0.0.1", cluster.edge_port(1), 999, 1, Duration::from_secs(2)).await {
        Err(NetError::Upstream(msg)) => {
            assert_eq!(msg, "image999.jpg not found on canonical server")
        }
        other => panic!("expected origin wording passed through, got {other:?}"),
    }
    assert!(!cluster.edge_file(1, 999).exists());
}

#[tokio::test]
async fn test_leader_failover_to_next_highest() {
    let cluster = TestCluster::start(3, &[]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    cluster.edges[2].shutdown();
    // Heartbeats to edge 2 now fail; once contact goes stale the survivors
    // elect the next-highest id.
    cluster.wait_for_leader(&[0, 1], 1).await;
}

#[tokio::test]
async fn test_concurrent_misses_share_one_error() {
    let cluster = TestCluster::start(3, &[]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    let port = cluster.edge_port(0);
    let (a, b) = tokio::join!(
        client::fetch_image("127.0.0.1", port, 7, 1, Duration::from_secs(2)),
        client::fetch_image("127.0.0.1", port, 7, 2, Duration::from_secs(2)),
    );
    let msg_a = match a {
        Err(NetError::Upstream(msg)) => msg,
        other => panic!("expected error, got {other:?}"),
    };
    let msg_b = match b {
        Err(NetError::Upstream(msg)) => msg,
        other => panic!("expected error, got {other:?}"),
    };
    assert_eq!(msg_a, msg_b);
    assert!(!cluster.edge_file(0, 7).exists());
}

#[tokio::test]
async fn test_replicate_is_idempotent() {
    let payload = vec![0x5A; 700];
    let cluster = TestCluster::start(3, &[(5, payload.clone())]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    // Warm the leader, then instruct edge 0 twice to pull from it.
    client::fetch_image("127.0.0.1", cluster.edge_port(2), 5, 1, Duration::from_secs(2))
        .await
        .unwrap();
    let leader_port = cluster.edge_port(2);
    for _ in 0..2 {
        client::replicate(
            "127.0.0.1",
            cluster.edge_port(0),
            5,
            "127.0.0.1",
            leader_port,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    }
    assert_eq!(std::fs::read(cluster.edge_file(0, 5)).unwrap(), payload);
}

#[tokio::test]
async fn test_notify_cached_on_follower_does_not_fan_out() {
    let payload = b"follower-only".to_vec();
    let cluster = TestCluster::start(3, &[(6, payload.clone())]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    // Edge 0 has the file but is not leader; the notify is acknowledged
    // and nothing spreads.
    cluster.edges[0].state().cache.put(6, &payload).await.unwrap();
    client::notify_cached("127.0.0.1", cluster.edge_port(0), 6, Duration::from_secs(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!cluster.edge_file(1, 6).exists());
    assert!(!cluster.edge_file(2, 6).exists());
}

#[tokio::test]
async fn test_balancer_forwards_and_skips_dead_edges() {
    let payload = vec![0x11; 321];
    let cluster = TestCluster::start(3, &[(9, payload)]).await;
    cluster.wait_for_leader(&[0, 1, 2], 2).await;

    let balancer = Balancer::new(cluster.config.clone());
    balancer.start().await.unwrap();
    let lb_port = cluster.config.balancer_port;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let size = client::fetch_image_size("127.0.0.1", lb_port, 9, 1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(size, 321);

    cluster.edges[0].shutdown();
    for _ in 0..50 {
        if !balancer.healthy_edges()[0] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!balancer.healthy_edges()[0], "dead edge never left rotation");

    // Round-robin now only lands on live edges.
    for clock in 2..6 {
        let size = client::fetch_image_size("127.0.0.1", lb_port, 9, clock, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(size, 321);
    }
    balancer.shutdown();
}
