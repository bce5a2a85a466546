//! Error types for MCP sessions and transports

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use strand_json_rpc::{JsonRpcErrorCode, JsonRpcErrorObject, RequestId};
use thiserror::Error;

/// Result type for engine and role operations
pub type McpResult<T> = Result<T, McpError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Error surfaced to callers of the engine
#[derive(Error, Debug)]
pub enum McpError {
    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer (or local validation) answered with a JSON-RPC error
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The call was cancelled locally before a response arrived
    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The engine stopped and can no longer deliver a response
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("A handler is already registered for '{0}'")]
    DuplicateHandler(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Server's protocol version is not supported: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handler fault without a more specific code
    #[error("{0}")]
    Internal(String),
}

impl McpError {
    pub fn rpc(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self::Rpc {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::from_error_object(JsonRpcErrorObject::method_not_found(method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::rpc(JsonRpcErrorCode::InvalidParams, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::rpc(JsonRpcErrorCode::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn from_error_object(error: JsonRpcErrorObject) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }

    /// Wire form of this error when it answers an inbound request.
    /// Anything that is not already a JSON-RPC error becomes `InternalError`
    /// carrying the error text.
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            Self::Rpc {
                code,
                message,
                data,
            } => JsonRpcErrorObject {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => JsonRpcErrorObject::internal_error(Some(other.to_string())),
        }
    }

    /// JSON-RPC code, when this is an RPC error
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed)
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Rpc { code, .. } => matches!(code, -32099..=-32000),
            _ => false,
        }
    }
}

impl From<JsonRpcErrorObject> for McpError {
    fn from(error: JsonRpcErrorObject) -> Self {
        Self::from_error_object(error)
    }
}

/// Transport-specific errors. Cloneable so a single write failure can be
/// delivered to every request that was in the failed frame.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Transport closed")]
    Closed,

    /// A single inbound frame could not be used; the transport stays usable
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Inbound stream already taken")]
    AlreadyReceiving,

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Session expired or unknown to the server")]
    SessionExpired,

    #[error("Cannot route message: {0}")]
    Routing(String),

    /// The exchange carrying these requests failed before their responses
    /// arrived; only those requests are affected
    #[error("Request exchange failed: {reason}")]
    RequestsFailed {
        ids: Vec<RequestId>,
        reason: Box<TransportError>,
    },
}

impl TransportError {
    /// Whether the inbound stream can continue after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidFrame(_) | Self::RequestsFailed { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ConnectionLost(_) | Self::Io(_) | Self::Http(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}
