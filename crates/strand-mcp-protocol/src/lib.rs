//! # MCP Protocol Types
//!
//! Protocol version table, capability trees and the lifecycle methods
//! (`initialize`, `notifications/initialized`, `ping`,
//! `notifications/cancelled`) shared by clients and servers.

pub mod capabilities;
pub mod initialize;
pub mod methods;
pub mod notifications;
pub mod ping;
pub mod version;

pub use capabilities::{
    ClientCapabilities, ClientFeature, CompletionsCapabilities, ElicitationCapabilities,
    LoggingCapabilities, PromptsCapabilities, ResourcesCapabilities, RootsCapabilities,
    SamplingCapabilities, ServerCapabilities, ServerFeature, ToolsCapabilities,
};
pub use initialize::{Implementation, Initialize, InitializeRequest, InitializeResult, Initialized};
pub use notifications::{Cancelled, CancelledNotificationParams};
pub use ping::{EmptyResult, Ping};
pub use version::{
    DEFAULT_NEGOTIATED_PROTOCOL_VERSION, LATEST_PROTOCOL_VERSION, McpVersion,
    SUPPORTED_PROTOCOL_VERSIONS, VersionError, negotiate_version,
};
