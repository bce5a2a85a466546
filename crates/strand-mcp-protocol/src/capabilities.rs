//! Capability trees exchanged during `initialize`.
//!
//! Builders enable a feature by first ensuring its parent object exists and
//! then setting the flag, so enabling `resources.subscribe` on an empty tree
//! yields `{"resources": {"subscribe": true}}`. [`ServerCapabilities::merge`]
//! and [`ClientCapabilities::merge`] follow the same rule key by key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Capabilities related to root listing support
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapabilities {
    /// Whether the client supports notifications for root list changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Presence of this field indicates sampling support. Empty `{}` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SamplingCapabilities {
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Presence of this field indicates elicitation support. Empty `{}` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ElicitationCapabilities {
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Capabilities that a client may support
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,
    /// Client can handle `sampling/createMessage` requests from the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapabilities>,
    /// Client can handle `elicitation/create` requests from the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

/// Client-side features a server may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientFeature {
    Roots,
    RootsListChanged,
    Sampling,
    Elicitation,
}

impl ClientCapabilities {
    pub fn roots_mut(&mut self) -> &mut RootsCapabilities {
        self.roots.get_or_insert_with(Default::default)
    }

    pub fn with_roots(mut self) -> Self {
        self.roots_mut();
        self
    }

    pub fn with_roots_list_changed(mut self) -> Self {
        self.roots_mut().list_changed = Some(true);
        self
    }

    pub fn with_sampling(mut self) -> Self {
        self.sampling.get_or_insert_with(Default::default);
        self
    }

    pub fn with_elicitation(mut self) -> Self {
        self.elicitation.get_or_insert_with(Default::default);
        self
    }

    pub fn with_experimental(mut self, name: impl Into<String>, value: Value) -> Self {
        self.experimental
            .get_or_insert_with(Default::default)
            .insert(name.into(), value);
        self
    }

    pub fn has(&self, feature: ClientFeature) -> bool {
        match feature {
            ClientFeature::Roots => self.roots.is_some(),
            ClientFeature::RootsListChanged => self
                .roots
                .as_ref()
                .and_then(|r| r.list_changed)
                .unwrap_or(false),
            ClientFeature::Sampling => self.sampling.is_some(),
            ClientFeature::Elicitation => self.elicitation.is_some(),
        }
    }

    /// Overlay `other` onto `self`; flags set in `other` win.
    pub fn merge(&mut self, other: &ClientCapabilities) {
        if let Some(roots) = &other.roots {
            let target = self.roots_mut();
            target.list_changed = roots.list_changed.or(target.list_changed);
        }
        if let Some(sampling) = &other.sampling {
            self.sampling
                .get_or_insert_with(Default::default)
                .extra
                .extend(sampling.extra.clone());
        }
        if let Some(elicitation) = &other.elicitation {
            self.elicitation
                .get_or_insert_with(Default::default)
                .extra
                .extend(elicitation.extra.clone());
        }
        merge_experimental(&mut self.experimental, &other.experimental);
    }
}

/// Presence of this field indicates the server emits log messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingCapabilities {
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Presence of this field indicates argument completion support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompletionsCapabilities {
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities that a server may provide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

/// Server-side features a client may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerFeature {
    Logging,
    Completions,
    Prompts,
    PromptsListChanged,
    Resources,
    ResourcesSubscribe,
    ResourcesListChanged,
    Tools,
    ToolsListChanged,
}

impl ServerCapabilities {
    pub fn prompts_mut(&mut self) -> &mut PromptsCapabilities {
        self.prompts.get_or_insert_with(Default::default)
    }

    pub fn resources_mut(&mut self) -> &mut ResourcesCapabilities {
        self.resources.get_or_insert_with(Default::default)
    }

    pub fn tools_mut(&mut self) -> &mut ToolsCapabilities {
        self.tools.get_or_insert_with(Default::default)
    }

    pub fn with_logging(mut self) -> Self {
        self.logging.get_or_insert_with(Default::default);
        self
    }

    pub fn with_completions(mut self) -> Self {
        self.completions.get_or_insert_with(Default::default);
        self
    }

    pub fn with_prompts(mut self) -> Self {
        self.prompts_mut();
        self
    }

    pub fn with_prompts_list_changed(mut self) -> Self {
        self.prompts_mut().list_changed = Some(true);
        self
    }

    pub fn with_resources(mut self) -> Self {
        self.resources_mut();
        self
    }

    pub fn with_resources_subscribe(mut self) -> Self {
        self.resources_mut().subscribe = Some(true);
        self
    }

    pub fn with_resources_list_changed(mut self) -> Self {
        self.resources_mut().list_changed = Some(true);
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.tools_mut();
        self
    }

    pub fn with_tools_list_changed(mut self) -> Self {
        self.tools_mut().list_changed = Some(true);
        self
    }

    pub fn with_experimental(mut self, name: impl Into<String>, value: Value) -> Self {
        self.experimental
            .get_or_insert_with(Default::default)
            .insert(name.into(), value);
        self
    }

    pub fn has(&self, feature: ServerFeature) -> bool {
        let flag = |value: Option<bool>| value.unwrap_or(false);
        match feature {
            ServerFeature::Logging => self.logging.is_some(),
            ServerFeature::Completions => self.completions.is_some(),
            ServerFeature::Prompts => self.prompts.is_some(),
            ServerFeature::PromptsListChanged => {
                flag(self.prompts.as_ref().and_then(|p| p.list_changed))
            }
            ServerFeature::Resources => self.resources.is_some(),
            ServerFeature::ResourcesSubscribe => {
                flag(self.resources.as_ref().and_then(|r| r.subscribe))
            }
            ServerFeature::ResourcesListChanged => {
                flag(self.resources.as_ref().and_then(|r| r.list_changed))
            }
            ServerFeature::Tools => self.tools.is_some(),
            ServerFeature::ToolsListChanged => {
                flag(self.tools.as_ref().and_then(|t| t.list_changed))
            }
        }
    }

    /// Overlay `other` onto `self`; flags set in `other` win.
    pub fn merge(&mut self, other: &ServerCapabilities) {
        if let Some(logging) = &other.logging {
            self.logging
                .get_or_insert_with(Default::default)
                .extra
                .extend(logging.extra.clone());
        }
        if let Some(completions) = &other.completions {
            self.completions
                .get_or_insert_with(Default::default)
                .extra
                .extend(completions.extra.clone());
        }
        if let Some(prompts) = &other.prompts {
            let target = self.prompts_mut();
            target.list_changed = prompts.list_changed.or(target.list_changed);
        }
        if let Some(resources) = &other.resources {
            let target = self.resources_mut();
            target.subscribe = resources.subscribe.or(target.subscribe);
            target.list_changed = resources.list_changed.or(target.list_changed);
        }
        if let Some(tools) = &other.tools {
            let target = self.tools_mut();
            target.list_changed = tools.list_changed.or(target.list_changed);
        }
        merge_experimental(&mut self.experimental, &other.experimental);
    }
}

fn merge_experimental(
    target: &mut Option<HashMap<String, Value>>,
    other: &Option<HashMap<String, Value>>,
) {
    if let Some(other) = other {
        target
            .get_or_insert_with(Default::default)
            .extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sub_flag_creates_parent() {
        let caps = ServerCapabilities::default().with_resources_subscribe();
        assert_eq!(
            serde_json::to_value(&caps).unwrap(),
            json!({"resources": {"subscribe": true}})
        );
        assert!(caps.has(ServerFeature::Resources));
        assert!(caps.has(ServerFeature::ResourcesSubscribe));
        assert!(!caps.has(ServerFeature::ResourcesListChanged));
    }

    #[test]
    fn test_merge_keeps_existing_flags() {
        let mut base = ServerCapabilities::default()
            .with_tools()
            .with_resources_list_changed();
        let extra = ServerCapabilities::default()
            .with_resources_subscribe()
            .with_logging();
        base.merge(&extra);

        assert_eq!(
            serde_json::to_value(&base).unwrap(),
            json!({
                "logging": {},
                "resources": {"subscribe": true, "listChanged": true},
                "tools": {}
            })
        );
    }

    #[test]
    fn test_client_capabilities_round_trip_from_wire() {
        let caps: ClientCapabilities = serde_json::from_value(json!({
            "roots": {"listChanged": true},
            "sampling": {}
        }))
        .unwrap();
        assert!(caps.has(ClientFeature::Roots));
        assert!(caps.has(ClientFeature::RootsListChanged));
        assert!(caps.has(ClientFeature::Sampling));
        assert!(!caps.has(ClientFeature::Elicitation));
    }

    #[test]
    fn test_client_merge_creates_parent_for_sub_flag() {
        let mut base = ClientCapabilities::default().with_sampling();
        base.merge(&ClientCapabilities::default().with_roots_list_changed());
        assert!(base.has(ClientFeature::Sampling));
        assert!(base.has(ClientFeature::RootsListChanged));
    }
}
