//! Canonical origin server binary. Runs with no arguments.

use clap::Parser;
use edgecdn::config::ORIGIN_PORT;
use edgecdn::OriginServer;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "origin", version, about = "Canonical image origin")]
struct Args {
    /// Listen port
    #[arg(long, default_value_t = ORIGIN_PORT)]
    port: u16,

    /// Directory holding image<id>.jpg files
    #[arg(long, default_value = "images")]
    images_dir: PathBuf,
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
    info!("canonical server starting on port {}", args.port);

    let server = match OriginServer::new(args.images_dir, args.port) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to open image directory: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = server.start().await {
        error!("failed to start canonical server: {}", e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    server.shutdown();
}
