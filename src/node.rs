//! Edge node: shared state, the per-connection dispatcher, and the listener.
//!
//! The node owns its long-running tasks (listener, failure detector, boot
//! election); each of them works through one shared [`EdgeState`] holding
//! the immutable cluster configuration plus the mutex-guarded leader fields.
//! Subsystems never own each other.

use crate::cache::CacheStore;
use crate::config::{ClusterConfig, PeerAddr};
use crate::election;
use crate::heartbeat;
use crate::net::{client, frame, message::Request, NetError};
use crate::replication;
use serde_json::json;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Leader bookkeeping, guarded by one mutex. The lock is never held across
/// I/O; every access copies what it needs and releases.
struct LeaderState {
    leader_id: Option<u64>,
    /// Bumped on every accepted coordinator announcement, so an election
    /// backing off can tell a fresh announcement from a stale field.
    epoch: u64,
    last_contact: Instant,
}

/// State shared by the dispatcher, election, detector, and replication.
pub struct EdgeState {
    pub id: u64,
    pub config: ClusterConfig,
    pub peers: Vec<PeerAddr>,
    pub cache: CacheStore,
    leader: Mutex<LeaderState>,
    /// Signaled whenever a coordinator announcement lands.
    pub coordinator_seen: Notify,
    /// Monotonic response clock, informational only.
    clock: AtomicU64,
    pub alive: AtomicBool,
    /// Guard keeping elections single-flight per node.
    pub electing: AtomicBool,
}

impl EdgeState {
    fn leader(&self) -> std::sync::MutexGuard<'_, LeaderState> {
        self.leader.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn new(id: u64, config: ClusterConfig) -> std::io::Result<Self> {
        let cache = CacheStore::open(config.edge_dir(id))?;
        let peers = config.peers_of(id);
        Ok(Self {
            id,
            config,
            peers,
            cache,
            leader: Mutex::new(LeaderState {
                leader_id: None,
                epoch: 0,
                last_contact: Instant::now(),
            }),
            coordinator_seen: Notify::new(),
            clock: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            electing: AtomicBool::new(false),
        })
    }

    pub fn leader_id(&self) -> Option<u64> {
        self.leader().leader_id
    }

    pub fn is_leader(&self) -> bool {
        self.leader_id() == Some(self.id)
    }

    pub fn leader_epoch(&self) -> u64 {
        self.leader().epoch
    }

    /// Accept a coordinator announcement.
    pub fn set_coordinator(&self, leader: u64) {
        {
            let mut state = self.leader();
            state.leader_id = Some(leader);
            state.epoch += 1;
            state.last_contact = Instant::now();
        }
        self.coordinator_seen.notify_waiters();
    }

    /// Take leadership after winning an election.
    pub fn become_leader(&self) {
        let mut state = self.leader();
        state.leader_id = Some(self.id);
        state.last_contact = Instant::now();
    }

    /// Forget the leader once the detector declares it lost.
    pub fn clear_leader(&self) {
        self.leader().leader_id = None;
    }

    pub fn touch_leader_contact(&self) {
        self.leader().last_contact = Instant::now();
    }

    pub fn leader_contact_elapsed(&self) -> Duration {
        self.leader().last_contact.elapsed()
    }

    fn next_clock(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// One edge cache process.
pub struct EdgeNode {
    state: Arc<EdgeState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EdgeNode {
    pub fn new(id: u64, config: ClusterConfig) -> Result<Self, NetError> {
        if id >= config.num_edges {
            return Err(NetError::BadRequest(format!(
                "node id {id} outside cluster of {} edges",
                config.num_edges
            )));
        }
        let state = Arc::new(EdgeState::new(id, config)?);
        Ok(Self { state, tasks: Mutex::new(Vec::new()) })
    }

    pub fn state(&self) -> Arc<EdgeState> {
        self.state.clone()
    }

    pub fn leader_id(&self) -> Option<u64> {
        self.state.leader_id()
    }

    /// Bind the listen port and start the accept loop, the boot election,
    /// and the failure detector. A bind failure is fatal to startup.
    pub async fn start(&self) -> Result<(), NetError> {
        let port = self.state.config.edge_port(self.state.id);
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;

        info!(
            "edge {} listening on {}, cache dir {:?}",
            self.state.id,
            addr,
            self.state.config.edge_dir(self.state.id)
        );

        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let accept_state = self.state.clone();
        tasks.push(tokio::spawn(accept_loop(accept_state, listener)));

        let election_state = self.state.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(election_state.config.startup_delay).await;
            election::run(election_state).await;
        }));

        tasks.push(tokio::spawn(heartbeat::run(self.state.clone())));
        Ok(())
    }

    /// Cooperative shutdown: flip the alive flag and cut the long-running
    /// tasks loose. In-flight connections finish on their own.
    pub fn shutdown(&self) {
        self.state.alive.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("edge {} shut down", self.state.id);
    }
}

async fn accept_loop(state: Arc<EdgeState>, listener: TcpListener) {
    loop {
        if !state.alive.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept().await {
            Ok((stream, remote)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatch(&state, stream).await {
                        debug!("edge {}: connection from {} failed: {}", state.id, remote, e);
                    }
                });
            }
            Err(e) => {
                warn!("edge {}: accept failed: {}", state.id, e);
            }
        }
    }
}

/// Handle one connection: one framed request, one response envelope, close.
async fn dispatch(state: &Arc<EdgeState>, mut stream: TcpStream) -> Result<(), NetError> {
    let clock = state.next_clock();
    let raw = match frame::read_frame(&mut stream).await {
        Ok(raw) => raw,
        Err(e) => {
            // Best effort: the frame never arrived whole, but the sender may
            // still be reading.
            let _ = frame::write_u64(&mut stream, clock).await;
            let _ = frame::write_error_segment(&mut stream, &e.wire_message()).await;
            return Err(e);
        }
    };

    frame::write_u64(&mut stream, clock).await?;

    let request = match Request::from_wire(&raw) {
        Ok(request) => request,
        Err(e) => {
            frame::write_error_segment(&mut stream, &e.wire_message()).await?;
            return Ok(());
        }
    };

    debug!("edge {}: received rpc {}", state.id, request.function());
    if let Err(e) = route(state, request, &mut stream).await {
        let _ = frame::write_error_segment(&mut stream, &e.wire_message()).await;
    }
    Ok(())
}

async fn route(
    state: &Arc<EdgeState>,
    request: Request,
    stream: &mut TcpStream,
) -> Result<(), NetError> {
    match request {
        Request::GetImage { id } => serve_image(state, id, stream).await,

        Request::GetImageSize { id } => serve_image_size(state, id, stream).await,

        Request::Replicate { id, host, port } => {
            info!("edge {}: replicate request, pulling image{} from {}:{}", state.id, id, host, port);
            match client::fetch_image(&host, port, id, 0, state.config.origin_deadline).await {
                Ok(bytes) => {
                    state.cache.put(id, &bytes).await?;
                    frame::write_segment(stream, json!({"ok": true}).to_string().as_bytes()).await?;
                    info!("edge {}: replicated image{} from {}:{}", state.id, id, host, port);
                }
                Err(e) => {
                    warn!("edge {}: replicate pull of image{} failed: {}", state.id, id, e);
                    frame::write_error_segment(stream, &e.wire_message()).await?;
                }
            }
            Ok(())
        }

        Request::NotifyCached { id } => {
            debug!("edge {}: received notify_cached for image{}", state.id, id);
            if state.is_leader() {
                let state = state.clone();
                tokio::spawn(async move { replication::fan_out(&state, id).await });
            }
            frame::write_empty_segment(stream).await
        }

        Request::Election { candidate } => {
            // Extra zero word before the ack segment, kept byte-for-byte for
            // wire compatibility with existing peers.
            frame::write_u64(stream, 0).await?;
            frame::write_segment(stream, json!({"ok": true}).to_string().as_bytes()).await?;
            if state.id > candidate {
                election::spawn(state.clone());
            }
            Ok(())
        }

        Request::Coordinator { leader } => {
            state.set_coordinator(leader);
            info!("edge {}: new coordinator is {}", state.id, leader);
            frame::write_empty_segment(stream).await
        }

        // Clock header only; the probe just wants proof of life.
        Request::Heartbeat => Ok(()),
    }
}

async fn serve_image(
    state: &Arc<EdgeState>,
    id: u64,
    stream: &mut TcpStream,
) -> Result<(), NetError> {
    if let Some(bytes) = state.cache.get(id).await? {
        frame::write_segment(stream, &bytes).await?;
        info!("edge {}: served image{} from local cache", state.id, id);
        return Ok(());
    }

    info!("edge {}: cache miss for image{}, fetching from origin", state.id, id);
    let host = state.config.origin_host.clone();
    let port = state.config.origin_port;
    let deadline = state.config.origin_deadline;
    match state.cache.fill(id, || client::fetch_image(&host, port, id, 0, deadline)).await {
        Ok(outcome) => {
            frame::write_segment(stream, &outcome.bytes).await?;
            info!("edge {}: cached image{} ({} bytes)", state.id, id, outcome.bytes.len());
            if outcome.performed {
                let state = state.clone();
                tokio::spawn(async move { replication::after_fill(&state, id).await });
            }
        }
        Err(msg) => {
            warn!("edge {}: fill for image{} failed: {}", state.id, id, msg);
            frame::write_error_segment(stream, &msg).await?;
        }
    }
    Ok(())
}

/// Size queries answer from the local file when present and fall through to
/// the origin otherwise, without warming the cache.
async fn serve_image_size(
    state: &Arc<EdgeState>,
    id: u64,
    stream: &mut TcpStream,
) -> Result<(), NetError> {
    if let Some(size) = state.cache.size(id).await? {
        return frame::write_u64(stream, size).await;
    }
    match client::fetch_image_size(
        &state.config.origin_host,
        state.config.origin_port,
        id,
        0,
        state.config.origin_deadline,
    )
    .await
    {
        Ok(size) => frame::write_u64(stream, size).await,
        Err(e) => frame::write_error_segment(stream, &e.wire_message()).await,
    }
}
