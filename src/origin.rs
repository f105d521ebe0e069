//! Canonical origin server.
//!
//! The authoritative byte store behind the edge fleet. It speaks the same
//! framed protocol but only the two image functions; everything else gets
//! an error segment. Images live as `image<id>.jpg` files in one directory.

use crate::config::image_file_name;
use crate::net::{frame, message::Request, NetError};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request counters, mostly interesting to tests and status logs.
#[derive(Debug, Clone)]
pub struct OriginStats {
    pub image_requests: u64,
    pub size_requests: u64,
}

struct OriginState {
    dir: PathBuf,
    port: u16,
    clock: AtomicU64,
    alive: AtomicBool,
    image_requests: AtomicU64,
    size_requests: AtomicU64,
}

impl OriginState {
    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(image_file_name(id))
    }

    fn not_found(id: u64) -> String {
        format!("{} not found on canonical server", image_file_name(id))
    }
}

pub struct OriginServer {
    state: Arc<OriginState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OriginServer {
    pub fn new(dir: PathBuf, port: u16) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            state: Arc::new(OriginState {
                dir,
                port,
                clock: AtomicU64::new(0),
                alive: AtomicBool::new(true),
                image_requests: AtomicU64::new(0),
                size_requests: AtomicU64::new(0),
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn stats(&self) -> OriginStats {
        OriginStats {
            image_requests: self.state.image_requests.load(Ordering::SeqCst),
            size_requests: self.state.size_requests.load(Ordering::SeqCst),
        }
    }

    pub async fn start(&self) -> Result<(), NetError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.state.port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        info!("canonical server listening on {}, image dir {:?}", addr, self.state.dir);

        let state = self.state.clone();
        let task = tokio::spawn(accept_loop(state, listener));
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(task);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.state.alive.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

async fn accept_loop(state: Arc<OriginState>, listener: TcpListener) {
    loop {
        if !state.alive.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept().await {
            Ok((stream, remote)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle(&state, stream, remote).await {
                        debug!("canonical server: connection from {} failed: {}", remote, e);
                    }
                });
            }
            Err(e) => warn!("canonical server: accept failed: {}", e),
        }
    }
}

async fn handle(
    state: &Arc<OriginState>,
    mut stream: TcpStream,
    remote: SocketAddr,
) -> Result<(), NetError> {
    let clock = state.clock.fetch_add(1, Ordering::SeqCst) + 1;
    let raw = match frame::read_frame(&mut stream).await {
        Ok(raw) => raw,
        Err(e) => {
            let _ = frame::write_u64(&mut stream, clock).await;
            let _ = frame::write_error_segment(&mut stream, &e.wire_message()).await;
            return Err(e);
        }
    };

    frame::write_u64(&mut stream, clock).await?;

    match Request::from_wire(&raw) {
        Ok(Request::GetImage { id }) => {
            state.image_requests.fetch_add(1, Ordering::SeqCst);
            info!("canonical server: get_image from {} for {}", remote, image_file_name(id));
            match tokio::fs::read(state.path_for(id)).await {
                Ok(bytes) => {
                    frame::write_segment(&mut stream, &bytes).await?;
                    info!("canonical server: sent {} to {}", image_file_name(id), remote);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    frame::write_error_segment(&mut stream, &OriginState::not_found(id)).await?;
                }
                Err(e) => {
                    frame::write_error_segment(&mut stream, &NetError::from(e).wire_message())
                        .await?;
                }
            }
        }
        Ok(Request::GetImageSize { id }) => {
            state.size_requests.fetch_add(1, Ordering::SeqCst);
            info!("canonical server: get_image_size from {} for {}", remote, image_file_name(id));
            match tokio::fs::metadata(state.path_for(id)).await {
                Ok(meta) => frame::write_u64(&mut stream, meta.len()).await?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    frame::write_error_segment(&mut stream, &OriginState::not_found(id)).await?;
                }
                Err(e) => {
                    frame::write_error_segment(&mut stream, &NetError::from(e).wire_message())
                        .await?;
                }
            }
        }
        Ok(other) => {
            frame::write_error_segment(
                &mut stream,
                &format!("unknown function {}", other.function()),
            )
            .await?;
        }
        Err(e) => {
            frame::write_error_segment(&mut stream, &e.wire_message()).await?;
        }
    }
    Ok(())
}
