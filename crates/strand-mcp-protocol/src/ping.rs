use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strand_json_rpc::{EmptyParams, Method, ParamsRequirement};

use crate::methods;

/// Result with no fields, serialized as `{}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResult {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// `ping`, answerable in any lifecycle state after initialization
pub struct Ping;

impl Method for Ping {
    const NAME: &'static str = methods::PING;
    const PARAMS: ParamsRequirement = ParamsRequirement::None;
    type Params = EmptyParams;
    type Result = EmptyResult;
}
