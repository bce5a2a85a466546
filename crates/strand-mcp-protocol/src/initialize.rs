//! MCP Initialize Protocol Types
//!
//! This module defines the types used for the MCP initialization handshake.

use serde::{Deserialize, Serialize};
use strand_json_rpc::{EmptyParams, Method, NotificationMethod, ParamsRequirement};

use crate::capabilities::{ClientCapabilities, ServerCapabilities};
use crate::methods;
use crate::version::{LATEST_PROTOCOL_VERSION, McpVersion};

/// Describes the name and version of an MCP implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Machine-readable name
    pub name: String,
    /// Version string (e.g., "1.0.0")
    pub version: String,
    /// Optional human-friendly display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Parameters of the `initialize` request. The version is kept as a raw
/// string so unknown versions reach negotiation instead of failing decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

impl InitializeRequest {
    pub fn new(capabilities: ClientCapabilities, client_info: Implementation) -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.as_str().to_string(),
            capabilities,
            client_info,
        }
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    pub fn new(
        protocol_version: McpVersion,
        capabilities: ServerCapabilities,
        server_info: Implementation,
    ) -> Self {
        Self {
            protocol_version: protocol_version.as_str().to_string(),
            capabilities,
            server_info,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// The negotiated version, if it is one this side supports
    pub fn negotiated_version(&self) -> Option<McpVersion> {
        McpVersion::parse_version(&self.protocol_version)
    }
}

/// `initialize` request
pub struct Initialize;

impl Method for Initialize {
    const NAME: &'static str = methods::INITIALIZE;
    const PARAMS: ParamsRequirement = ParamsRequirement::Required;
    type Params = InitializeRequest;
    type Result = InitializeResult;
}

/// `notifications/initialized`, sent by the client once it accepted the
/// initialize result
pub struct Initialized;

impl NotificationMethod for Initialized {
    const NAME: &'static str = methods::NOTIFICATION_INITIALIZED;
    const PARAMS: ParamsRequirement = ParamsRequirement::None;
    type Params = EmptyParams;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ClientFeature;
    use serde_json::json;
    use strand_json_rpc::decode_params;

    #[test]
    fn test_initialize_request_wire_shape() {
        let request = InitializeRequest::new(
            ClientCapabilities::default().with_sampling(),
            Implementation::new("test-client", "1.0.0"),
        )
        .with_protocol_version("2025-06-18");

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {"sampling": {}},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            })
        );
    }

    #[test]
    fn test_unknown_version_still_decodes() {
        let params = decode_params::<Initialize>(Some(json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {"roots": {}},
            "clientInfo": {"name": "old", "version": "0.1"}
        })))
        .unwrap();
        assert_eq!(params.protocol_version, "1999-01-01");
        assert!(params.capabilities.has(ClientFeature::Roots));
    }

    #[test]
    fn test_initialize_requires_params() {
        assert!(decode_params::<Initialize>(None).is_err());
    }

    #[test]
    fn test_result_negotiated_version() {
        let result = InitializeResult::new(
            McpVersion::V2025_03_26,
            ServerCapabilities::default(),
            Implementation::new("server", "1.0"),
        );
        assert_eq!(result.negotiated_version(), Some(McpVersion::V2025_03_26));
        assert!(
            !serde_json::to_value(&result)
                .unwrap()
                .as_object()
                .unwrap()
                .contains_key("instructions")
        );
    }
}
