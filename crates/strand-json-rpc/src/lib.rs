//! # JSON-RPC 2.0 Message Codec
//!
//! Transport-agnostic JSON-RPC 2.0 types used by every strand crate.
//!
//! ## Features
//! - Request, notification, success and error envelopes
//! - Single and batch frame decoding with per-element validation
//! - Typed method descriptors with explicit parameter requirements
//! - Error objects carrying the standard JSON-RPC codes

pub mod envelope;
pub mod error;
pub mod method;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use envelope::{
    DecodedFrame, JsonRpcEnvelope, JsonRpcFrame, decode_envelope, decode_frame, encode_envelope,
    encode_frame,
};
pub use error::{JsonRpcCodecError, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use method::{
    EmptyParams, Method, NotificationMethod, ParamsRequirement, decode_params,
    decode_notification_params, encode_params,
};
pub use notification::JsonRpcNotification;
pub use request::JsonRpcRequest;
pub use response::JsonRpcResponse;
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// Generic transport-level rejection (bad headers, unsupported version)
    pub const CONNECTION_ERROR: i64 = -32000;
    /// The session named by the client does not exist
    pub const SESSION_NOT_FOUND: i64 = -32001;
}
