//! Header names and request-header extraction for Streamable HTTP

use http::HeaderMap;
use http::header::{ACCEPT, CONTENT_TYPE};

pub const MCP_SESSION_ID: &str = "mcp-session-id";
pub const MCP_PROTOCOL_VERSION: &str = "mcp-protocol-version";
pub const LAST_EVENT_ID: &str = "last-event-id";

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// What a request says about its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionHeader {
    Missing,
    Single(String),
    /// Repeated header or a value that is not visible ASCII
    Invalid,
}

pub fn session_header(headers: &HeaderMap) -> SessionHeader {
    let mut values = headers.get_all(MCP_SESSION_ID).iter();
    match (values.next(), values.next()) {
        (None, _) => SessionHeader::Missing,
        (Some(value), None) => match value.to_str() {
            Ok(id) if !id.is_empty() => SessionHeader::Single(id.to_string()),
            _ => SessionHeader::Invalid,
        },
        (Some(_), Some(_)) => SessionHeader::Invalid,
    }
}

/// Extract MCP session ID from HTTP request headers
pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    match session_header(headers) {
        SessionHeader::Single(id) => Some(id),
        _ => None,
    }
}

/// Raw `Mcp-Protocol-Version`; the last value wins when repeated
pub fn extract_protocol_version(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(MCP_PROTOCOL_VERSION)
        .iter()
        .last()
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Extract Last-Event-ID from HTTP request headers for SSE resumability
pub fn extract_last_event_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Whether any `Accept` header lists `mime`
pub fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .any(|accept| accept.contains(mime))
}

pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|ct| ct.contains(APPLICATION_JSON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_session_header_variants() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_header(&headers), SessionHeader::Missing);

        headers.insert(MCP_SESSION_ID, HeaderValue::from_static("abc"));
        assert_eq!(session_header(&headers), SessionHeader::Single("abc".to_string()));

        headers.append(MCP_SESSION_ID, HeaderValue::from_static("def"));
        assert_eq!(session_header(&headers), SessionHeader::Invalid);
        assert_eq!(extract_session_id(&headers), None);
    }

    #[test]
    fn test_accept_matching() {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        assert!(accepts(&headers, APPLICATION_JSON));
        assert!(accepts(&headers, TEXT_EVENT_STREAM));

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!accepts(&headers, TEXT_EVENT_STREAM));
    }

    #[test]
    fn test_protocol_version_last_value_wins() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_protocol_version(&headers), None);
        headers.append(MCP_PROTOCOL_VERSION, HeaderValue::from_static("2024-11-05"));
        headers.append(MCP_PROTOCOL_VERSION, HeaderValue::from_static("2025-06-18"));
        assert_eq!(extract_protocol_version(&headers).as_deref(), Some("2025-06-18"));
    }

    #[test]
    fn test_content_type_with_charset() {
        let mut headers = HeaderMap::new();
        assert!(!is_json_content_type(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json_content_type(&headers));
    }
}
