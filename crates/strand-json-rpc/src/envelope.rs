//! Envelope classification and frame (single or batch) encoding.
//!
//! Decoding is lenient at the batch level and strict per element: a batch
//! with one malformed entry still yields the well-formed ones, each paired
//! with its own error. Only unparseable JSON or an empty array fails the
//! whole frame.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{JsonRpcCodecError, JsonRpcError, JsonRpcErrorObject};
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcResponse;
use crate::types::{JsonRpcVersion, RequestId};
use crate::JSONRPC_VERSION;

/// One JSON-RPC message of any of the four kinds
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcEnvelope {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl JsonRpcEnvelope {
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcEnvelope::Request(r) => Some(&r.id),
            JsonRpcEnvelope::Response(r) => Some(&r.id),
            JsonRpcEnvelope::Error(e) => e.id.as_ref(),
            JsonRpcEnvelope::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcEnvelope::Request(r) => Some(&r.method),
            JsonRpcEnvelope::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcEnvelope::Request(_))
    }

    /// Success or error response
    pub fn is_response(&self) -> bool {
        matches!(self, JsonRpcEnvelope::Response(_) | JsonRpcEnvelope::Error(_))
    }

    pub fn is_request_for(&self, method: &str) -> bool {
        matches!(self, JsonRpcEnvelope::Request(r) if r.method == method)
    }
}

impl From<JsonRpcRequest> for JsonRpcEnvelope {
    fn from(value: JsonRpcRequest) -> Self {
        JsonRpcEnvelope::Request(value)
    }
}

impl From<JsonRpcNotification> for JsonRpcEnvelope {
    fn from(value: JsonRpcNotification) -> Self {
        JsonRpcEnvelope::Notification(value)
    }
}

impl From<JsonRpcResponse> for JsonRpcEnvelope {
    fn from(value: JsonRpcResponse) -> Self {
        JsonRpcEnvelope::Response(value)
    }
}

impl From<JsonRpcError> for JsonRpcEnvelope {
    fn from(value: JsonRpcError) -> Self {
        JsonRpcEnvelope::Error(value)
    }
}

/// Outbound frame: a single envelope or a non-empty batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcFrame {
    Single(JsonRpcEnvelope),
    Batch(Vec<JsonRpcEnvelope>),
}

/// Inbound frame after decoding. Batch elements keep their individual
/// decode outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Single(JsonRpcEnvelope),
    Batch(Vec<Result<JsonRpcEnvelope, JsonRpcError>>),
}

pub fn encode_envelope(envelope: &JsonRpcEnvelope) -> Result<Vec<u8>, JsonRpcCodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn encode_frame(frame: &JsonRpcFrame) -> Result<Vec<u8>, JsonRpcCodecError> {
    if let JsonRpcFrame::Batch(items) = frame
        && items.is_empty()
    {
        return Err(JsonRpcCodecError::EmptyBatch);
    }
    Ok(serde_json::to_vec(frame)?)
}

/// Decode raw bytes into a single envelope or a batch.
///
/// Invalid JSON and empty arrays produce a `ParseError` response with a
/// null id. A malformed top-level object produces `InvalidRequest`.
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame, JsonRpcError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| JsonRpcError::parse_error(Some(Value::String(e.to_string()))))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(JsonRpcError::parse_error(Some(Value::String(
                    "Empty batch".to_string(),
                ))));
            }
            Ok(DecodedFrame::Batch(
                items.into_iter().map(decode_envelope).collect(),
            ))
        }
        other => decode_envelope(other).map(DecodedFrame::Single),
    }
}

/// Classify one JSON value as a request, notification, response or error.
pub fn decode_envelope(value: Value) -> Result<JsonRpcEnvelope, JsonRpcError> {
    let Value::Object(mut object) = value else {
        return Err(JsonRpcError::invalid_request(None, "message must be an object"));
    };

    let raw_id = object.remove("id");
    let id = raw_id.as_ref().and_then(RequestId::from_value);

    match object.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => {
            return Err(JsonRpcError::invalid_request(
                id,
                "jsonrpc must be exactly \"2.0\"",
            ));
        }
    }

    if let Some(method) = object.remove("method") {
        let Value::String(method) = method else {
            return Err(JsonRpcError::invalid_request(id, "method must be a string"));
        };
        let params = take_params(&mut object).map_err(|reason| {
            JsonRpcError::invalid_request(id.clone(), reason)
        })?;
        return match raw_id {
            None => Ok(JsonRpcEnvelope::Notification(JsonRpcNotification {
                version: JsonRpcVersion::V2_0,
                method,
                params,
            })),
            Some(raw) => match id {
                Some(id) => Ok(JsonRpcEnvelope::Request(JsonRpcRequest {
                    version: JsonRpcVersion::V2_0,
                    id,
                    method,
                    params,
                })),
                None => Err(JsonRpcError::invalid_request(
                    None,
                    format!("request id must be a string or integer, got {}", raw),
                )),
            },
        };
    }

    let result = object.remove("result");
    let error = object.remove("error");
    match (result, error) {
        (Some(_), Some(_)) => Err(JsonRpcError::invalid_request(
            id,
            "response must not contain both result and error",
        )),
        (None, None) => Err(JsonRpcError::invalid_request(
            id,
            "message has neither method, result nor error",
        )),
        (Some(result), None) => match id {
            Some(id) => Ok(JsonRpcEnvelope::Response(JsonRpcResponse::new(id, result))),
            None => Err(JsonRpcError::invalid_request(
                None,
                "response id must be a string or integer",
            )),
        },
        (None, Some(error)) => {
            if id.is_none() && !matches!(raw_id, None | Some(Value::Null)) {
                return Err(JsonRpcError::invalid_request(
                    None,
                    "error response id must be a string, integer or null",
                ));
            }
            let error: JsonRpcErrorObject = serde_json::from_value(error).map_err(|e| {
                JsonRpcError::invalid_request(id.clone(), format!("malformed error object: {}", e))
            })?;
            Ok(JsonRpcEnvelope::Error(JsonRpcError::new(id, error)))
        }
    }
}

fn take_params(object: &mut Map<String, Value>) -> Result<Option<Value>, &'static str> {
    match object.remove("params") {
        None | Some(Value::Null) => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params)),
        Some(_) => Err("params must be an object or an array"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JsonRpcErrorCode;
    use serde_json::json;

    fn decode_single(value: Value) -> Result<JsonRpcEnvelope, JsonRpcError> {
        decode_frame(value.to_string().as_bytes()).map(|frame| match frame {
            DecodedFrame::Single(envelope) => envelope,
            DecodedFrame::Batch(_) => panic!("expected a single envelope"),
        })
    }

    #[test]
    fn test_classifies_all_four_kinds() {
        let request = decode_single(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert!(request.is_request_for("ping"));

        let notification =
            decode_single(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(matches!(notification, JsonRpcEnvelope::Notification(_)));

        let response = decode_single(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        assert_eq!(response.id(), Some(&RequestId::String("a".into())));

        let error = decode_single(
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}}),
        )
        .unwrap();
        match error {
            JsonRpcEnvelope::Error(e) => {
                assert!(e.id.is_none());
                assert_eq!(e.error.code, -32700);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_parse_error_with_null_id() {
        let error = decode_frame(b"{not json").unwrap_err();
        assert_eq!(error.error.code, JsonRpcErrorCode::ParseError.code());
        assert!(error.id.is_none());
    }

    #[test]
    fn test_empty_batch_is_parse_error() {
        let error = decode_frame(b"[]").unwrap_err();
        assert_eq!(error.error.code, JsonRpcErrorCode::ParseError.code());
    }

    #[test]
    fn test_response_with_result_and_error_is_rejected() {
        let error = decode_single(json!({
            "jsonrpc": "2.0", "id": 4, "result": {}, "error": {"code": 1, "message": "x"}
        }))
        .unwrap_err();
        assert_eq!(error.error.code, JsonRpcErrorCode::InvalidRequest.code());
        assert_eq!(error.id, Some(RequestId::Number(4)));
    }

    #[test]
    fn test_wrong_version_is_invalid_request() {
        let error = decode_single(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})).unwrap_err();
        assert_eq!(error.error.code, JsonRpcErrorCode::InvalidRequest.code());
        assert_eq!(error.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn test_null_request_id_is_rejected() {
        let error = decode_single(json!({"jsonrpc": "2.0", "id": null, "method": "ping"})).unwrap_err();
        assert_eq!(error.error.code, JsonRpcErrorCode::InvalidRequest.code());
    }

    #[test]
    fn test_batch_elements_decode_individually() {
        let frame = decode_frame(
            json!([
                {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                {"jsonrpc": "2.0", "id": 2},
                {"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}}
            ])
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let DecodedFrame::Batch(items) = frame else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 3);
        assert!(items[0].as_ref().unwrap().is_request());
        assert_eq!(items[1].as_ref().unwrap_err().id, Some(RequestId::Number(2)));
        assert!(matches!(items[2], Ok(JsonRpcEnvelope::Notification(_))));
    }

    #[test]
    fn test_scalar_params_are_rejected() {
        let error = decode_single(json!({"jsonrpc": "2.0", "id": 1, "method": "x", "params": 3}))
            .unwrap_err();
        assert_eq!(error.error.code, JsonRpcErrorCode::InvalidRequest.code());
    }

    #[test]
    fn test_encode_frame_forms() {
        let ping: JsonRpcEnvelope = JsonRpcRequest::new_no_params(RequestId::Number(1), "ping").into();
        let single = encode_frame(&JsonRpcFrame::Single(ping.clone())).unwrap();
        assert_eq!(single, br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_vec());

        let batch = encode_frame(&JsonRpcFrame::Batch(vec![ping])).unwrap();
        assert!(batch.starts_with(b"["));

        assert!(matches!(
            encode_frame(&JsonRpcFrame::Batch(vec![])),
            Err(JsonRpcCodecError::EmptyBatch)
        ));
    }
}
