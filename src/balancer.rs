//! Front-door load balancer.
//!
//! Round-robins client connections across healthy edges. The balancer is a
//! transparent forwarder: it reads one length-framed request, relays it,
//! half-closes its write side, and streams the response back until EOF
//! without interpreting anything past the length prefix. Health comes from
//! periodic heartbeat probes against every edge.

use crate::config::ClusterConfig;
use crate::net::{client, frame, NetError};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct BalancerState {
    config: ClusterConfig,
    healthy: Mutex<Vec<bool>>,
    next: AtomicUsize,
    alive: AtomicBool,
}

impl BalancerState {
    fn healthy(&self) -> std::sync::MutexGuard<'_, Vec<bool>> {
        self.healthy.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Next edge id in round-robin order over the currently healthy set.
    fn choose_edge(&self) -> Option<u64> {
        let healthy = self.healthy();
        let candidates: Vec<u64> = (0..self.config.num_edges)
            .filter(|id| healthy[*id as usize])
            .collect();
        drop(healthy);
        if candidates.is_empty() {
            return None;
        }
        let slot = self.next.fetch_add(1, Ordering::SeqCst) % candidates.len();
        Some(candidates[slot])
    }
}

pub struct Balancer {
    state: Arc<BalancerState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Balancer {
    pub fn new(config: ClusterConfig) -> Self {
        let edges = config.num_edges as usize;
        Self {
            state: Arc::new(BalancerState {
                config,
                // Optimistic until the first probe round says otherwise.
                healthy: Mutex::new(vec![true; edges]),
                next: AtomicUsize::new(0),
                alive: AtomicBool::new(true),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Healthy flags per edge id, for status logs and tests.
    pub fn healthy_edges(&self) -> Vec<bool> {
        self.state.healthy().clone()
    }

    pub async fn start(&self) -> Result<(), NetError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.state.config.balancer_port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        info!("load balancer listening on {}", addr);

        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tasks.push(tokio::spawn(accept_loop(self.state.clone(), listener)));
        tasks.push(tokio::spawn(health_loop(self.state.clone())));
        Ok(())
    }

    pub fn shutdown(&self) {
        self.state.alive.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("load balancer shut down");
    }
}

async fn accept_loop(state: Arc<BalancerState>, listener: TcpListener) {
    loop {
        if !state.alive.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!("load balancer: accepted connection from {}", remote);
                let state = state.clone();
                tokio::spawn(async move { forward(&state, stream).await });
            }
            Err(e) => warn!("load balancer: accept failed: {}", e),
        }
    }
}

async fn forward(state: &Arc<BalancerState>, mut client_stream: TcpStream) {
    if let Err(e) = try_forward(state, &mut client_stream).await {
        warn!("load balancer: forwarding failed: {}", e);
        // The client still expects a framed reply.
        let _ = frame::write_u64(&mut client_stream, 0).await;
        let _ = frame::write_error_segment(&mut client_stream, &e.wire_message()).await;
    }
}

async fn try_forward(
    state: &Arc<BalancerState>,
    client_stream: &mut TcpStream,
) -> Result<(), NetError> {
    let raw = frame::read_frame(client_stream).await?;

    let edge = state
        .choose_edge()
        .ok_or_else(|| NetError::Upstream("no healthy edge servers available".to_string()))?;
    let host = state.config.edge_host(edge);
    let port = state.config.edge_port(edge);
    debug!("load balancer: forwarding request to edge {} at {}:{}", edge, host, port);

    let mut upstream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| NetError::Upstream(format!("connect {host}:{port}: {e}")))?;
    frame::write_frame(&mut upstream, &raw).await?;
    // Half-close toward the edge; connections are single-request.
    upstream.shutdown().await?;

    tokio::io::copy(&mut upstream, client_stream).await?;
    Ok(())
}

async fn health_loop(state: Arc<BalancerState>) {
    let mut ticker = tokio::time::interval(state.config.probe_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !state.alive.load(Ordering::SeqCst) {
            break;
        }
        for id in 0..state.config.num_edges {
            let host = state.config.edge_host(id);
            let port = state.config.edge_port(id);
            let up = client::heartbeat(&host, port, state.config.probe_deadline).await.is_ok();
            let mut healthy = state.healthy();
            if healthy[id as usize] != up {
                info!(
                    "load balancer: edge {} is now {}",
                    id,
                    if up { "healthy" } else { "unhealthy" }
                );
            }
            healthy[id as usize] = up;
        }
    }
}
