//! Per-call RPC clients for the origin and for peer edges.
//!
//! Every call opens a fresh TCP connection, writes one framed request, reads
//! the response envelope, and closes. The whole exchange runs under one
//! explicit deadline; callers never retry here.

use super::frame;
use super::message::{Request, Segment};
use super::NetError;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Largest error segment accepted in place of a bare-size reply.
const MAX_ERROR_SEGMENT: u64 = 64 * 1024;

async fn connect(host: &str, port: u16) -> Result<TcpStream, NetError> {
    TcpStream::connect((host, port))
        .await
        .map_err(|e| NetError::Upstream(format!("connect {host}:{port}: {e}")))
}

async fn send_request(stream: &mut TcpStream, req: &Request, clock: u64) -> Result<(), NetError> {
    frame::write_frame(stream, &req.to_wire(clock)).await
}

/// `get_image`: returns the raw image bytes.
///
/// The first post-clock segment is classified by decode attempt: a JSON
/// object with an `error` key is a remote failure, anything else is payload.
pub async fn fetch_image(
    host: &str,
    port: u16,
    id: u64,
    clock: u64,
    deadline: Duration,
) -> Result<Vec<u8>, NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        send_request(&mut stream, &Request::GetImage { id }, clock).await?;
        let _clock = frame::read_u64(&mut stream).await?;
        match Segment::classify(frame::read_segment(&mut stream).await?) {
            Segment::Payload(bytes) => Ok(bytes),
            Segment::Error(body) => Err(NetError::Upstream(body.error)),
        }
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}

/// `get_image_size`: returns the byte size without transferring the image.
///
/// A successful reply is a bare `u64` followed by end-of-stream; an error
/// reply is a sized `{"error": ...}` segment. Connections are single-shot,
/// so the two are told apart by probing for bytes after the first `u64`.
pub async fn fetch_image_size(
    host: &str,
    port: u16,
    id: u64,
    clock: u64,
    deadline: Duration,
) -> Result<u64, NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        send_request(&mut stream, &Request::GetImageSize { id }, clock).await?;
        let _clock = frame::read_u64(&mut stream).await?;
        let value = frame::read_u64(&mut stream).await?;
        let mut probe = [0u8; 1];
        match stream.read(&mut probe).await {
            Ok(0) => Ok(value),
            Ok(_) => {
                // Bytes follow: `value` was the length of an error segment.
                if value == 0 || value > MAX_ERROR_SEGMENT {
                    return Err(NetError::Upstream(format!("malformed size reply ({value} bytes)")));
                }
                let mut body = vec![0u8; value as usize];
                body[0] = probe[0];
                stream
                    .read_exact(&mut body[1..])
                    .await
                    .map_err(|_| NetError::ConnectionClosed)?;
                match Segment::classify(body) {
                    Segment::Error(err) => Err(NetError::Upstream(err.error)),
                    Segment::Payload(_) => {
                        Err(NetError::Upstream("malformed size reply".to_string()))
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}

/// `replicate`: instruct `host:port` to pull `id` from the leader endpoint.
pub async fn replicate(
    host: &str,
    port: u16,
    id: u64,
    leader_host: &str,
    leader_port: u16,
    deadline: Duration,
) -> Result<(), NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        let req = Request::Replicate {
            id,
            host: leader_host.to_string(),
            port: leader_port,
        };
        send_request(&mut stream, &req, 0).await?;
        let _clock = frame::read_u64(&mut stream).await?;
        match Segment::classify(frame::read_segment(&mut stream).await?) {
            Segment::Error(body) => Err(NetError::Upstream(body.error)),
            Segment::Payload(_) => Ok(()),
        }
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}

/// `notify_cached`: tell the leader a fill for `id` just completed.
pub async fn notify_cached(
    host: &str,
    port: u16,
    id: u64,
    deadline: Duration,
) -> Result<(), NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        send_request(&mut stream, &Request::NotifyCached { id }, 0).await?;
        let _clock = frame::read_u64(&mut stream).await?;
        let _empty = frame::read_segment(&mut stream).await?;
        Ok(())
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}

/// `election`: any reply from the higher peer counts as an acknowledgement.
///
/// The reply carries an extra zero `u64` between the clock header and the
/// `{"ok": true}` segment; it is read and discarded (see release notes).
pub async fn election(
    host: &str,
    port: u16,
    candidate: u64,
    deadline: Duration,
) -> Result<(), NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        send_request(&mut stream, &Request::Election { candidate }, 0).await?;
        let _clock = frame::read_u64(&mut stream).await?;
        let _extra = frame::read_u64(&mut stream).await?;
        let _ok = frame::read_segment(&mut stream).await?;
        Ok(())
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}

/// `coordinator`: announce `leader` to one peer.
pub async fn coordinator(
    host: &str,
    port: u16,
    leader: u64,
    deadline: Duration,
) -> Result<(), NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        send_request(&mut stream, &Request::Coordinator { leader }, 0).await?;
        let _clock = frame::read_u64(&mut stream).await?;
        let _empty = frame::read_segment(&mut stream).await?;
        Ok(())
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}

/// `heartbeat`: liveness probe. Success is reading the clock header back.
pub async fn heartbeat(host: &str, port: u16, deadline: Duration) -> Result<u64, NetError> {
    timeout(deadline, async {
        let mut stream = connect(host, port).await?;
        send_request(&mut stream, &Request::Heartbeat, 0).await?;
        frame::read_u64(&mut stream).await
    })
    .await
    .map_err(|_| NetError::DeadlineExceeded)?
}
