//! # Streamable HTTP for MCP
//!
//! Server and client halves of the MCP Streamable HTTP transport.
//!
//! ## Server
//! - One endpoint, four verbs: `POST` carries client messages and answers
//!   with JSON or an SSE stream, `GET` opens the standalone server-to-client
//!   stream, `DELETE` ends the session, anything else is `405`
//! - Session ids (`Mcp-Session-Id`) in stateful mode, none in stateless mode
//! - Optional resumability through an [`EventStore`] and `Last-Event-ID`
//! - Optional DNS-rebinding protection on `Host` / `Origin`
//!
//! [`StreamableHttpServerTransport`] implements the core `Transport` trait for
//! one session; [`StreamableHttpServer`] binds a listener and runs one
//! transport and server connection per session.
//!
//! ## Client
//! [`StreamableHttpClientTransport`] posts every outbound frame, reads JSON or
//! SSE replies and keeps the standalone GET stream open after initialization.

pub mod client;
pub mod config;
pub mod event_store;
pub mod protocol;
pub mod responses;
pub mod security;
pub mod server;
pub mod sse;
pub mod transport;

pub use client::StreamableHttpClientTransport;
pub use config::{HttpServerConfig, SessionMode, StreamableHttpClientConfig, StreamableHttpConfig};
pub use event_store::{EventId, EventStore, EventStoreError, InMemoryEventStore, Replay, StoredEvent};
pub use protocol::{LAST_EVENT_ID, MCP_PROTOCOL_VERSION, MCP_SESSION_ID};
pub use responses::HttpBody;
pub use security::DnsRebindingProtection;
pub use server::{StreamableHttpServer, StreamableHttpServerBuilder};
pub use sse::{SseEvent, SseParser};
pub use transport::{STANDALONE_STREAM_ID, StreamableHttpServerTransport};

/// Result type for HTTP MCP operations
pub type Result<T> = std::result::Result<T, HttpMcpError>;

/// HTTP MCP specific errors
#[derive(Debug, thiserror::Error)]
pub enum HttpMcpError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("MCP error: {0}")]
    Mcp(#[from] strand_mcp_core::McpError),

    #[error("Transport error: {0}")]
    Transport(#[from] strand_mcp_core::TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
