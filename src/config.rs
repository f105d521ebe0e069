//! Cluster topology constants and per-process configuration.
//!
//! The cluster is a fixed set of edge caches in front of one canonical
//! origin. Every node derives its peers from the same constants: edge `i`
//! listens on `base_port + i` and is reachable under a stable hostname
//! derived from its id. Membership does not change at runtime.

use std::path::PathBuf;
use std::time::Duration;

/// Number of edge caches in the cluster.
pub const NUM_EDGES: u64 = 3;

/// First edge listen port; edge `i` listens on `EDGE_BASE_PORT + i`.
pub const EDGE_BASE_PORT: u16 = 8001;

/// Front-door load balancer port.
pub const BALANCER_PORT: u16 = 8000;

/// Canonical origin port.
pub const ORIGIN_PORT: u16 = 9000;

/// Hostname pattern for edge nodes. `{id}` is replaced by the edge id.
/// The default matches the compose service names; override with a fixed
/// host (for example `127.0.0.1`) to run the whole cluster locally.
pub const EDGE_HOST_PATTERN: &str = "edge-server-{id}";

/// Canonical origin hostname.
pub const ORIGIN_HOST: &str = "canonical-server";

/// Address of one peer edge as seen from another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub id: u64,
    pub host: String,
    pub port: u16,
}

/// Cluster-wide configuration shared by every subsystem of a node.
///
/// All outbound deadlines and detector timers live here so they are explicit
/// parameters rather than buried socket options. Tests shrink them.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub num_edges: u64,
    pub base_port: u16,
    /// Hostname pattern for edges; `{id}` is substituted. A pattern without
    /// the placeholder addresses every edge on the same host.
    pub edge_host_pattern: String,
    pub origin_host: String,
    pub origin_port: u16,
    pub balancer_port: u16,
    /// Directory under which each edge keeps its `es<id>` cache directory.
    pub data_root: PathBuf,

    /// Pause between binding the listener and the boot election, so peers
    /// starting together can answer each other.
    pub startup_delay: Duration,

    /// Follower-to-leader probe period.
    pub heartbeat_interval: Duration,
    /// Leader silence tolerated before a new election is started.
    pub fail_threshold: Duration,
    /// How long a backed-off candidate waits for a coordinator announcement
    /// before restarting the election.
    pub announce_wait: Duration,

    /// Deadline for origin fills and image pulls.
    pub origin_deadline: Duration,
    /// Deadline for one election message to a higher peer.
    pub election_deadline: Duration,
    /// Deadline for one replicate instruction to a peer.
    pub replicate_deadline: Duration,
    /// Deadline for one heartbeat probe.
    pub heartbeat_deadline: Duration,
    /// Deadline for notifying the leader about a completed fill.
    pub notify_deadline: Duration,

    /// Balancer health-probe period.
    pub probe_interval: Duration,
    /// Balancer health-probe deadline.
    pub probe_deadline: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_edges: NUM_EDGES,
            base_port: EDGE_BASE_PORT,
            edge_host_pattern: EDGE_HOST_PATTERN.to_string(),
            origin_host: ORIGIN_HOST.to_string(),
            origin_port: ORIGIN_PORT,
            balancer_port: BALANCER_PORT,
            data_root: PathBuf::from("."),
            startup_delay: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(2),
            fail_threshold: Duration::from_secs(6),
            announce_wait: Duration::from_secs(5),
            origin_deadline: Duration::from_secs(5),
            election_deadline: Duration::from_secs(2),
            replicate_deadline: Duration::from_secs(4),
            heartbeat_deadline: Duration::from_secs(2),
            notify_deadline: Duration::from_secs(3),
            probe_interval: Duration::from_secs(5),
            probe_deadline: Duration::from_secs(1),
        }
    }
}

impl ClusterConfig {
    /// Configuration for a cluster running entirely on loopback.
    pub fn local() -> Self {
        Self {
            edge_host_pattern: "127.0.0.1".to_string(),
            origin_host: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    pub fn edge_host(&self, id: u64) -> String {
        self.edge_host_pattern.replace("{id}", &id.to_string())
    }

    pub fn edge_port(&self, id: u64) -> u16 {
        self.base_port + id as u16
    }

    /// Peer descriptors for every edge except `self_id`.
    pub fn peers_of(&self, self_id: u64) -> Vec<PeerAddr> {
        (0..self.num_edges)
            .filter(|id| *id != self_id)
            .map(|id| PeerAddr {
                id,
                host: self.edge_host(id),
                port: self.edge_port(id),
            })
            .collect()
    }

    /// Local cache directory for edge `id`.
    pub fn edge_dir(&self, id: u64) -> PathBuf {
        self.data_root.join(format!("es{id}"))
    }
}

/// On-disk file name for an image id, identical on edges and origin.
pub fn image_file_name(id: u64) -> String {
    format!("image{id}.jpg")
}
