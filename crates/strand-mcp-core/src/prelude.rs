//! Common imports for building MCP clients and servers

pub use crate::client::{McpClient, McpClientBuilder};
pub use crate::config::{ConnectionConfig, HeartbeatConfig, IdStrategy, ReconnectConfig, SocketConfig};
pub use crate::connection::{Batch, Connection, LifecycleState, RequestContext, ResponseFuture};
pub use crate::error::{McpError, McpResult, TransportError, TransportResult};
pub use crate::server::{McpServer, McpServerBuilder};
pub use crate::transport::{
    InMemoryTransport, SocketState, SocketTransport, StdioTransport, Transport, TransportType,
};

pub use strand_json_rpc::{Method, NotificationMethod, RequestId};
pub use strand_mcp_protocol::{ClientCapabilities, Implementation, McpVersion, ServerCapabilities};
