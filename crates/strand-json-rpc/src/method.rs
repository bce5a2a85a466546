//! Typed method descriptors.
//!
//! A [`Method`] ties a wire name to its parameter and result types and
//! states whether parameters must be present. Decoding goes through
//! [`decode_params`], which turns every failure into `InvalidParams`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JsonRpcErrorObject;

/// Whether a method's `params` member must be present on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsRequirement {
    /// The method takes no parameters; anything sent is decoded leniently
    None,
    /// Parameters may be omitted, in which case the type's default is used
    Optional,
    /// Missing or `null` parameters are rejected with `InvalidParams`
    Required,
}

/// A request/response pair identified by its method name
pub trait Method {
    const NAME: &'static str;
    const PARAMS: ParamsRequirement;

    type Params: Serialize + DeserializeOwned + Send + 'static;
    type Result: Serialize + DeserializeOwned + Send + 'static;
}

/// A fire-and-forget message identified by its method name
pub trait NotificationMethod {
    const NAME: &'static str;
    const PARAMS: ParamsRequirement;

    type Params: Serialize + DeserializeOwned + Send + 'static;
}

/// Parameters for methods that take none; keeps an optional `_meta` member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyParams {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

pub fn decode_params<M: Method>(params: Option<Value>) -> Result<M::Params, JsonRpcErrorObject> {
    decode_with::<M::Params>(M::NAME, M::PARAMS, params)
}

pub fn decode_notification_params<N: NotificationMethod>(
    params: Option<Value>,
) -> Result<N::Params, JsonRpcErrorObject> {
    decode_with::<N::Params>(N::NAME, N::PARAMS, params)
}

/// Serialize parameters for the wire. Methods declared without parameters
/// omit the member entirely when the value is an empty object.
pub fn encode_params<P: Serialize>(
    requirement: ParamsRequirement,
    params: &P,
) -> Result<Option<Value>, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    Ok(match (&value, requirement) {
        (Value::Null, _) => None,
        (Value::Object(map), ParamsRequirement::None | ParamsRequirement::Optional)
            if map.is_empty() =>
        {
            None
        }
        _ => Some(value),
    })
}

fn decode_with<P: DeserializeOwned>(
    name: &str,
    requirement: ParamsRequirement,
    params: Option<Value>,
) -> Result<P, JsonRpcErrorObject> {
    let value = match params {
        Some(Value::Null) | None => {
            if requirement == ParamsRequirement::Required {
                return Err(JsonRpcErrorObject::invalid_params(&format!(
                    "Missing params for '{}'",
                    name
                )));
            }
            Value::Object(Map::new())
        }
        Some(value) => value,
    };

    serde_json::from_value(value).map_err(|e| {
        JsonRpcErrorObject::invalid_params(&format!("Invalid params for '{}': {}", name, e))
    })
}
