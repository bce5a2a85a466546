//! Session lifecycle state and the snapshot published to handles.

use strand_mcp_protocol::{
    ClientCapabilities, Implementation, McpVersion, ServerCapabilities,
};

/// Which side of the session this engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Session lifecycle.
///
/// Client: `AwaitingInitializeResponse -> Initializing -> Ready -> Closed`;
/// it moves to `Ready` when it sends `notifications/initialized`.
/// Server: `AwaitingInitializeRequest -> Initializing -> Ready -> Closed`;
/// it moves to `Ready` when that notification arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    AwaitingInitializeResponse,
    AwaitingInitializeRequest,
    Initializing,
    Ready,
    Closed,
}

impl LifecycleState {
    pub(crate) fn initial(role: Role) -> Self {
        match role {
            Role::Client => LifecycleState::AwaitingInitializeResponse,
            Role::Server => LifecycleState::AwaitingInitializeRequest,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready)
    }
}

/// Point-in-time view of the negotiated session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: LifecycleState,
    pub protocol_version: Option<McpVersion>,
    /// Assigned by the transport (Streamable HTTP), if any
    pub session_id: Option<String>,
    /// The other side's `clientInfo` or `serverInfo`
    pub peer_info: Option<Implementation>,
    pub client_capabilities: Option<ClientCapabilities>,
    pub server_capabilities: Option<ServerCapabilities>,
    pub instructions: Option<String>,
}

impl SessionSnapshot {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            state: LifecycleState::initial(role),
            protocol_version: None,
            session_id: None,
            peer_info: None,
            client_capabilities: None,
            server_capabilities: None,
            instructions: None,
        }
    }
}

/// What a server answers `initialize` with
#[derive(Debug, Clone)]
pub(crate) struct ServerIdentity {
    pub info: Implementation,
    pub capabilities: ServerCapabilities,
    pub instructions: Option<String>,
}
