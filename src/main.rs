//! Edge cache server binary.
//!
//! One positional argument: the node id in `[0, NUM_EDGES)`. The edge joins
//! the cluster, runs the boot election, and serves until interrupted.

use clap::Parser;
use edgecdn::{ClusterConfig, EdgeNode};
use std::path::PathBuf;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "edge", version, about = "Edge cache node")]
struct Args {
    /// Node id in [0, NUM_EDGES)
    node_id: Option<String>,

    /// Directory under which the es<id> cache directory is kept
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address the whole cluster on 127.0.0.1 instead of service hostnames
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("edgecdn=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = if args.local { ClusterConfig::local() } else { ClusterConfig::default() };
    if let Some(dir) = args.data_dir {
        config.data_root = dir;
    }

    // Bad node ids are a usage error, exit code 1.
    let id = match args.node_id.as_deref().map(str::parse::<u64>) {
        Some(Ok(id)) if id < config.num_edges => id,
        _ => {
            error!("usage: edge <node_id> with node_id in 0..{}", config.num_edges);
            std::process::exit(1);
        }
    };

    info!("edgecdn edge v{} starting as node {}", VERSION, id);

    let node = match EdgeNode::new(id, config) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to create edge node: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = node.start().await {
        error!("failed to start edge node: {}", e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    node.shutdown();
}
