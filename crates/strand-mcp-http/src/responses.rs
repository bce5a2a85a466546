//! HTTP response builders shared by the server transport and router

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use serde_json::Value;
use std::convert::Infallible;
use strand_json_rpc::{JsonRpcError, JsonRpcErrorObject};

use crate::protocol::{APPLICATION_JSON, MCP_SESSION_ID, TEXT_EVENT_STREAM};

/// Body type of every response the server produces
pub type HttpBody = UnsyncBoxBody<Bytes, Infallible>;

pub fn full_body(bytes: impl Into<Bytes>) -> HttpBody {
    Full::new(bytes.into()).boxed_unsync()
}

pub fn empty_body() -> HttpBody {
    Empty::<Bytes>::new().boxed_unsync()
}

pub fn status_response(status: StatusCode) -> Response<HttpBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

/// JSON-RPC error body with `id: null`
pub fn json_rpc_error_response(
    status: StatusCode,
    code: i64,
    message: impl Into<String>,
    data: Option<Value>,
) -> Response<HttpBody> {
    let error = JsonRpcError::new(
        None,
        JsonRpcErrorObject {
            code,
            message: message.into(),
            data,
        },
    );
    let body = serde_json::to_vec(&error).unwrap_or_default();
    json_response(status, body)
}

pub fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<HttpBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    response
}

/// Headers of an SSE response; the body streams until the server ends it
pub fn sse_response(body: HttpBody) -> Response<HttpBody> {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_EVENT_STREAM));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

pub fn with_session_id(mut response: Response<HttpBody>, session_id: Option<&str>) -> Response<HttpBody> {
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID), value);
    }
    response
}
