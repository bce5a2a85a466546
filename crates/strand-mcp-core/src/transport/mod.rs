//! Transport layer
//!
//! A transport moves opaque byte frames, each holding exactly one encoded
//! JSON-RPC envelope or batch. It never interprets message content, except
//! where routing requires it (the Streamable HTTP server keys streams by
//! request id).

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use strand_json_rpc::RequestId;

use crate::error::TransportResult;

pub mod memory;
pub mod socket;
pub mod stdio;

pub use memory::InMemoryTransport;
pub use socket::{Heartbeat, SocketCodec, SocketFrame, SocketState, SocketTransport};
pub use stdio::StdioTransport;

/// Inbound frames. A recoverable `Err` (see [`TransportError::is_fatal`])
/// reports one bad frame; a fatal one is followed by the end of the stream.
///
/// [`TransportError::is_fatal`]: crate::error::TransportError::is_fatal
pub type FrameStream = BoxStream<'static, TransportResult<Bytes>>;

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Newline-delimited JSON over a byte pipe
    Stdio,
    /// Persistent TCP socket with heartbeat frames
    Socket,
    /// Streamable HTTP (POST + SSE)
    StreamableHttp,
    /// In-process channel pair
    InMemory,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Socket => write!(f, "socket"),
            TransportType::StreamableHttp => write!(f, "streamable-http"),
            TransportType::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Transport trait defining the interface for all transport implementations.
///
/// Methods take `&self`; transports are shared behind an `Arc` between the
/// engine's reader and writer tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    async fn connect(&self) -> TransportResult<()>;

    /// Idempotent
    async fn disconnect(&self) -> TransportResult<()>;

    /// Send one frame. Concurrent sends must not interleave bytes.
    async fn send(&self, frame: Bytes) -> TransportResult<()>;

    /// Send a frame produced while handling `related_request`. Transports
    /// that multiplex streams use the id to pick the right one.
    async fn send_related(&self, frame: Bytes, related_request: &RequestId) -> TransportResult<()> {
        let _ = related_request;
        self.send(frame).await
    }

    /// Take the inbound frame stream. Available once per connection.
    fn receive(&self) -> TransportResult<FrameStream>;

    fn is_connected(&self) -> bool;

    /// Session identifier assigned by the transport, if any
    fn session_id(&self) -> Option<String> {
        None
    }

    /// Called once the protocol version has been negotiated
    fn set_protocol_version(&self, version: &str) {
        let _ = version;
    }
}

/// Reject frames that are not JSON so the engine can answer with a parse
/// error without closing the stream.
pub(crate) fn validate_json_frame(frame: &[u8]) -> TransportResult<()> {
    serde_json::from_slice::<serde::de::IgnoredAny>(frame)
        .map(|_| ())
        .map_err(|e| crate::error::TransportError::InvalidFrame(e.to_string()))
}
