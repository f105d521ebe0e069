//! Load balancer binary. Runs with no arguments.

use clap::Parser;
use edgecdn::{Balancer, ClusterConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "balancer", version, about = "Round-robin front door for the edge fleet")]
struct Args {
    /// Address the edge fleet on 127.0.0.1 instead of service hostnames
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
    let config = if args.local { ClusterConfig::local() } else { ClusterConfig::default() };

    let balancer = Balancer::new(config);
    if let Err(e) = balancer.start().await {
        error!("failed to start load balancer: {}", e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    balancer.shutdown();
}
