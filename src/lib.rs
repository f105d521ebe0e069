//! Edge-cache CDN cluster.
//!
//! A fleet of edge caches in front of one canonical origin, coordinated by
//! bully leader election, heartbeat failure detection, and leader-driven
//! replication of freshly cached images. All components speak the same
//! length-framed JSON-request protocol.

pub mod balancer;
pub mod cache;
pub mod config;
pub mod election;
pub mod heartbeat;
pub mod net;
pub mod node;
pub mod origin;
pub mod replication;

pub use balancer::Balancer;
pub use cache::CacheStore;
pub use config::ClusterConfig;
pub use net::{NetError, Request};
pub use node::{EdgeNode, EdgeState};
pub use origin::OriginServer;
