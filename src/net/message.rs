//! Request types and their JSON wire form.
//!
//! Every request travels as `{"function": string, "args": [...], "clock": n}`.
//! Each function gets its own variant with typed arguments; the generic args
//! list exists only at the wire boundary.

use super::NetError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetImage { id: u64 },
    GetImageSize { id: u64 },
    /// Instruction to pull `id` from the named leader endpoint.
    Replicate { id: u64, host: String, port: u16 },
    /// Follower telling the leader it just cached `id`.
    NotifyCached { id: u64 },
    Election { candidate: u64 },
    Coordinator { leader: u64 },
    Heartbeat,
}

impl Request {
    pub fn function(&self) -> &'static str {
        match self {
            Request::GetImage { .. } => "get_image",
            Request::GetImageSize { .. } => "get_image_size",
            Request::Replicate { .. } => "replicate",
            Request::NotifyCached { .. } => "notify_cached",
            Request::Election { .. } => "election",
            Request::Coordinator { .. } => "coordinator",
            Request::Heartbeat => "heartbeat",
        }
    }

    fn args(&self) -> Vec<Value> {
        match self {
            Request::GetImage { id } | Request::GetImageSize { id } | Request::NotifyCached { id } => {
                vec![json!(id)]
            }
            Request::Replicate { id, host, port } => vec![json!(id), json!(host), json!(port)],
            Request::Election { candidate } => vec![json!(candidate)],
            Request::Coordinator { leader } => vec![json!(leader)],
            Request::Heartbeat => vec![],
        }
    }

    /// Serialize to the JSON request body (without the length prefix).
    pub fn to_wire(&self, clock: u64) -> Vec<u8> {
        let body = json!({
            "function": self.function(),
            "args": self.args(),
            "clock": clock,
        });
        // Building from a literal object cannot fail to serialize.
        serde_json::to_vec(&body).unwrap_or_default()
    }

    /// Parse one framed request body. Unknown functions, malformed JSON, and
    /// wrong argument shapes are all `BadRequest`.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, NetError> {
        let wire: WireRequest = serde_json::from_slice(bytes)
            .map_err(|e| NetError::BadRequest(format!("malformed request: {e}")))?;
        let args = &wire.args;
        match wire.function.as_str() {
            "get_image" => Ok(Request::GetImage { id: arg_u64(args, 0)? }),
            "get_image_size" => Ok(Request::GetImageSize { id: arg_u64(args, 0)? }),
            "replicate" => Ok(Request::Replicate {
                id: arg_u64(args, 0)?,
                host: arg_str(args, 1)?,
                port: arg_u64(args, 2)?
                    .try_into()
                    .map_err(|_| NetError::BadRequest("port out of range".to_string()))?,
            }),
            "notify_cached" => Ok(Request::NotifyCached { id: arg_u64(args, 0)? }),
            "election" => Ok(Request::Election { candidate: arg_u64(args, 0)? }),
            "coordinator" => Ok(Request::Coordinator { leader: arg_u64(args, 0)? }),
            "heartbeat" => Ok(Request::Heartbeat),
            other => Err(NetError::BadRequest(format!("unknown function {other}"))),
        }
    }
}

// The wire object also carries a `clock` field; it is informational and
// ignored on receive, so it is not represented here.
#[derive(Debug, Deserialize)]
struct WireRequest {
    function: String,
    #[serde(default)]
    args: Vec<Value>,
}

fn arg_u64(args: &[Value], idx: usize) -> Result<u64, NetError> {
    args.get(idx)
        .and_then(Value::as_u64)
        .ok_or_else(|| NetError::BadRequest(format!("argument {idx} must be a non-negative integer")))
}

fn arg_str(args: &[Value], idx: usize) -> Result<String, NetError> {
    args.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| NetError::BadRequest(format!("argument {idx} must be a string")))
}

/// Body of a wire error segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// First post-clock segment of an image reply, classified.
///
/// Servers substitute an error segment in place of the payload on failure,
/// so receivers decode by attempt: a segment that parses as a JSON object
/// with an `error` key is an error, anything else is payload.
#[derive(Debug, Clone)]
pub enum Segment {
    Payload(Vec<u8>),
    Error(ErrorBody),
}

impl Segment {
    pub fn classify(bytes: Vec<u8>) -> Self {
        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => Segment::Error(body),
            Err(_) => Segment::Payload(bytes),
        }
    }
}
