//! Length-prefixed framing shared by every component.
//!
//! Requests are `u64 len ‖ JSON bytes`. Responses are a `u64` logical-clock
//! header followed by zero or more `u64 size ‖ size bytes` segments; the
//! segment list is fixed per function. Every integer on the wire is an
//! unsigned 64-bit little-endian value.

use super::message::ErrorBody;
use super::NetError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one framed request. Requests are small JSON objects; a
/// larger frame is a protocol violation, not a big image.
pub const MAX_REQUEST_SIZE: u64 = 64 * 1024;

/// Upper bound on one response segment (images included). Bounds the memory
/// a single connection can pin.
pub const MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Read exactly `buf.len()` bytes. A peer closing mid-frame is
/// `ConnectionClosed`, not a generic io error.
async fn read_exactly<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<(), NetError> {
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, NetError> {
    let mut buf = [0u8; 8];
    read_exactly(r, &mut buf).await?;
    Ok(u64::from_le_bytes(buf))
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, value: u64) -> Result<(), NetError> {
    w.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read one length-prefixed request frame.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, NetError> {
    let len = read_u64(r).await?;
    if len > MAX_REQUEST_SIZE {
        return Err(NetError::BadRequest(format!("request frame too large: {len} bytes")));
    }
    let mut buf = vec![0u8; len as usize];
    read_exactly(r, &mut buf).await?;
    Ok(buf)
}

/// Write one length-prefixed request frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> Result<(), NetError> {
    write_u64(w, bytes.len() as u64).await?;
    w.write_all(bytes).await?;
    w.flush().await?;
    Ok(())
}

/// Read one `u64 size ‖ size bytes` response segment.
pub async fn read_segment<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, NetError> {
    let size = read_u64(r).await?;
    if size > MAX_SEGMENT_SIZE {
        return Err(NetError::Upstream(format!("response segment too large: {size} bytes")));
    }
    let mut buf = vec![0u8; size as usize];
    read_exactly(r, &mut buf).await?;
    Ok(buf)
}

/// Write one sized payload segment.
pub async fn write_segment<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> Result<(), NetError> {
    write_u64(w, bytes.len() as u64).await?;
    w.write_all(bytes).await?;
    w.flush().await?;
    Ok(())
}

/// Write a zero-length segment (bare `u64 0`).
pub async fn write_empty_segment<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), NetError> {
    write_u64(w, 0).await?;
    w.flush().await?;
    Ok(())
}

/// Write an `{"error": msg}` segment.
pub async fn write_error_segment<W: AsyncWrite + Unpin>(
    w: &mut W,
    msg: &str,
) -> Result<(), NetError> {
    let body = serde_json::to_vec(&ErrorBody { error: msg.to_string() })
        .map_err(|e| NetError::BadRequest(e.to_string()))?;
    write_segment(w, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"{\"function\":\"heartbeat\"}").await.unwrap();
        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame, b"{\"function\":\"heartbeat\"}");
    }

    #[tokio::test]
    async fn test_segment_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_segment(&mut a, &[1, 2, 3]).await.unwrap();
        write_empty_segment(&mut a).await.unwrap();
        assert_eq!(read_segment(&mut b).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(read_segment(&mut b).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_u64_is_little_endian() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_u64(&mut a, 1000).await.unwrap();
        let mut raw = [0u8; 8];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, 1000u64.to_le_bytes());
    }

    #[tokio::test]
    async fn test_short_read_is_connection_closed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_u64(&mut a, 100).await.unwrap();
        a.write_all(&[0u8; 10]).await.unwrap();
        drop(a);
        match read_frame(&mut b).await {
            Err(NetError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_u64(&mut a, MAX_REQUEST_SIZE + 1).await.unwrap();
        match read_frame(&mut b).await {
            Err(NetError::BadRequest(_)) => {}
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_segment_shape() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_error_segment(&mut a, "nope").await.unwrap();
        let seg = read_segment(&mut b).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&seg).unwrap();
        assert_eq!(body.error, "nope");
    }
}
