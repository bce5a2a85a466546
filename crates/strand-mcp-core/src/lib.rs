//! # MCP Session Core
//!
//! The message engine shared by MCP clients and servers.
//!
//! ## Features
//! - Request/response correlation over any byte-frame [`Transport`]
//! - Lifecycle enforcement (`initialize` handshake, version negotiation)
//! - Optional strict capability checks before outbound calls
//! - Inbound request handlers with cooperative cancellation
//! - Explicit batching with flush-on-drop
//! - Stdio, TCP socket (heartbeat + reconnect) and in-memory transports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strand_mcp_core::prelude::*;
//!
//! # async fn example() -> McpResult<()> {
//! let transport = StdioTransport::stdio();
//! let client = McpClient::builder("example-client", "1.0.0")
//!     .connect(transport)
//!     .await?;
//! client.ping().await?;
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod prelude;
pub mod server;
pub mod transport;

pub use cancellation::CancellationHandle;
pub use client::{McpClient, McpClientBuilder};
pub use config::{ConnectionConfig, HeartbeatConfig, IdStrategy, ReconnectConfig, SocketConfig};
pub use connection::{
    Batch, Connection, LifecycleState, NotificationHandler, RequestContext, RequestHandler,
    ResponseFuture, Role, SessionSnapshot,
};
pub use error::{McpError, McpResult, TransportError, TransportResult};
pub use server::{McpServer, McpServerBuilder};
pub use transport::{FrameStream, Transport, TransportType};
