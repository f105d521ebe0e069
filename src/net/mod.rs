//! Wire protocol: framing, request types, and the per-call RPC clients.

pub mod client;
pub mod frame;
pub mod message;

pub use frame::{
    read_frame, read_segment, read_u64, write_empty_segment, write_error_segment, write_frame,
    write_segment, write_u64, MAX_REQUEST_SIZE, MAX_SEGMENT_SIZE,
};
pub use message::{ErrorBody, Request, Segment};

/// Error kinds surfaced by the codec, the clients, and the stores.
///
/// Connection handlers never let one of these escape: each is converted into
/// the `{"error": ...}` segment for the function being handled.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("connection closed mid-frame")]
    ConnectionClosed,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// No such image at the origin. Carries the exact client-visible message.
    #[error("{0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// An origin or peer RPC failed. Remote error segments are carried
    /// verbatim so intermediate nodes pass the message through unchanged.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Message to place in a wire error segment.
    ///
    /// `NotFound` and `Upstream` carry messages that originated at another
    /// node; those travel unchanged so a client talking to an edge sees the
    /// origin's own wording.
    pub fn wire_message(&self) -> String {
        match self {
            NetError::NotFound(msg) | NetError::Upstream(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
