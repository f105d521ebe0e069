//! Interactive client: fetch images or their sizes through the front door.
//!
//! Connections are single-request, so every operation dials fresh. A local
//! logical clock is bumped per call and sent in the request header.

use clap::Parser;
use edgecdn::config::{image_file_name, BALANCER_PORT};
use edgecdn::net::client;
use edgecdn::NetError;
use std::io::Write;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cdn-client", version, about = "Interactive CDN client")]
struct Args {
    /// Host of the load balancer (or a single edge)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the load balancer (or a single edge)
    #[arg(long, default_value_t = BALANCER_PORT)]
    port: u16,
}

const DEADLINE: Duration = Duration::from_secs(10);

fn prompt(text: &str) -> Option<String> {
    print!("{text}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    Some(line.trim().to_string())
}

fn prompt_u64(text: &str) -> Option<u64> {
    prompt(text)?.parse().ok()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut clock: u64 = 0;

    println!("Enter 1 to get an image");
    println!("Enter 2 to get the image size");
    println!("Enter 3 to exit");

    loop {
        let Some(op) = prompt_u64("\n> ") else {
            println!("please enter 1, 2 or 3");
            continue;
        };
        match op {
            1 => {
                let Some(id) = prompt_u64("Enter image id: ") else {
                    println!("image id must be a non-negative integer");
                    continue;
                };
                clock += 1;
                println!("Client: sending get_image request at clock {clock}");
                match client::fetch_image(&args.host, args.port, id, clock, DEADLINE).await {
                    Ok(bytes) => {
                        let name = image_file_name(id);
                        match std::fs::write(&name, &bytes) {
                            Ok(()) => println!("{name} saved in the current directory."),
                            Err(e) => println!("failed to save {name}: {e}"),
                        }
                    }
                    Err(NetError::Upstream(msg)) => println!("error: {msg}"),
                    Err(e) => println!("request failed: {e}"),
                }
            }
            2 => {
                let Some(id) = prompt_u64("Enter image id: ") else {
                    println!("image id must be a non-negative integer");
                    continue;
                };
                clock += 1;
                println!("Client: sending get_image_size request at clock {clock}");
                match client::fetch_image_size(&args.host, args.port, id, clock, DEADLINE).await {
                    Ok(size) => println!("Size of {} is {size} bytes.", image_file_name(id)),
                    Err(NetError::Upstream(msg)) => println!("error: {msg}"),
                    Err(e) => println!("request failed: {e}"),
                }
            }
            3 => {
                println!("Exiting.");
                break;
            }
            _ => println!("please enter 1, 2 or 3"),
        }
    }
}
