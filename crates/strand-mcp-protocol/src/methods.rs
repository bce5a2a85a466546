//! Method names and the capability each one depends on.

use crate::capabilities::{ClientFeature, ServerFeature};

pub const INITIALIZE: &str = "initialize";
pub const PING: &str = "ping";
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";

/// Capability a server must advertise before a client may call `method`.
/// `None` means the method is always allowed.
pub fn required_server_feature(method: &str) -> Option<ServerFeature> {
    match method {
        "logging/setLevel" => Some(ServerFeature::Logging),
        "completion/complete" => Some(ServerFeature::Completions),
        "prompts/get" | "prompts/list" => Some(ServerFeature::Prompts),
        "resources/list" | "resources/templates/list" | "resources/read" => {
            Some(ServerFeature::Resources)
        }
        "resources/subscribe" | "resources/unsubscribe" => Some(ServerFeature::ResourcesSubscribe),
        "tools/call" | "tools/list" => Some(ServerFeature::Tools),
        _ => None,
    }
}

/// Capability a client must advertise before a server may call `method`.
pub fn required_client_feature(method: &str) -> Option<ClientFeature> {
    match method {
        "sampling/createMessage" => Some(ClientFeature::Sampling),
        "roots/list" => Some(ClientFeature::Roots),
        "elicitation/create" => Some(ClientFeature::Elicitation),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_requirements() {
        assert_eq!(required_server_feature("tools/call"), Some(ServerFeature::Tools));
        assert_eq!(
            required_server_feature("resources/subscribe"),
            Some(ServerFeature::ResourcesSubscribe)
        );
        assert_eq!(required_server_feature(PING), None);
        assert_eq!(
            required_client_feature("sampling/createMessage"),
            Some(ClientFeature::Sampling)
        );
        assert_eq!(required_client_feature("tools/list"), None);
    }
}
