//! Client side of the Streamable HTTP transport.
//!
//! Every outbound frame is a POST. The server answers with a JSON body, an
//! SSE stream, or `202 Accepted`; frames from the first two feed the inbound
//! stream. Frames carrying requests are posted from their own task so a slow
//! handler on the server never holds up later frames. When such an exchange
//! fails, only the requests it carried are failed, through
//! [`TransportError::RequestsFailed`]. After the `initialized` notification is
//! accepted, a standalone GET stream is opened for server-initiated messages
//! and kept open with the reconnect policy, resuming from the last seen event
//! id.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::de::IgnoredAny;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strand_json_rpc::RequestId;
use strand_mcp_core::transport::{FrameStream, Transport, TransportType};
use strand_mcp_core::{CancellationHandle, TransportError, TransportResult};
use strand_mcp_protocol::methods::NOTIFICATION_INITIALIZED;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::config::StreamableHttpClientConfig;
use crate::protocol::{APPLICATION_JSON, LAST_EVENT_ID, MCP_PROTOCOL_VERSION, MCP_SESSION_ID, TEXT_EVENT_STREAM};
use crate::sse::SseParser;

type Inbound = mpsc::UnboundedSender<TransportResult<Bytes>>;

struct ClientInner {
    config: StreamableHttpClientConfig,
    http: reqwest::Client,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    /// Last event id seen on the standalone stream
    last_event_id: Mutex<Option<String>>,
    inbound_tx: Mutex<Option<Inbound>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportResult<Bytes>>>>,
    connected: AtomicBool,
    standalone_started: AtomicBool,
    closed: CancellationHandle,
}

#[derive(Clone)]
pub struct StreamableHttpClientTransport {
    inner: Arc<ClientInner>,
}

enum StandaloneEnd {
    /// Server does not offer a GET stream
    Unsupported,
    /// Stream was established and later ended
    Ended,
}

impl StreamableHttpClientTransport {
    pub fn new(config: StreamableHttpClientConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                session_id: Mutex::new(None),
                protocol_version: Mutex::new(None),
                last_event_id: Mutex::new(None),
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: Mutex::new(Some(inbound_rx)),
                connected: AtomicBool::new(false),
                standalone_started: AtomicBool::new(false),
                closed: CancellationHandle::new(),
            }),
        })
    }

    /// Transport for `endpoint` with default settings
    pub fn connect_to(endpoint: &str) -> crate::Result<Self> {
        Self::new(StreamableHttpClientConfig::parse(endpoint)?)
    }

    pub fn config(&self) -> &StreamableHttpClientConfig {
        &self.inner.config
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.inner.protocol_version.lock().clone()
    }

    fn start_standalone_stream(&self) {
        if !self.inner.config.open_standalone_stream
            || self.inner.standalone_started.swap(true, Ordering::SeqCst)
        {
            return;
        }
        tokio::spawn(run_standalone(self.inner.clone()));
    }
}

impl ClientInner {
    fn headers(&self) -> TransportResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(session_id) = self.session_id.lock().as_deref() {
            headers.insert(MCP_SESSION_ID, header_value(session_id)?);
        }
        if let Some(version) = self.protocol_version.lock().as_deref() {
            headers.insert(MCP_PROTOCOL_VERSION, header_value(version)?);
        }
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Http(format!("invalid header name '{}': {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }
        Ok(headers)
    }

    fn capture_session(&self, response: &Response) {
        if let Some(id) = response
            .headers()
            .get(MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock();
            if current.as_deref() != Some(id) {
                debug!(session_id = %id, "session id assigned");
                *current = Some(id.to_string());
            }
        }
    }

    /// A 404 on a request carrying a session id means the session is gone
    async fn check_status(&self, response: Response, had_session: bool) -> TransportResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND && had_session {
            warn!("server no longer knows this session");
            self.session_id.lock().take();
            return Err(TransportError::SessionExpired);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::HttpStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn deliver(&self, frame: TransportResult<Bytes>) -> bool {
        match self.inbound_tx.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Forward the messages of an SSE body; returns when the body ends.
    /// With `awaiting`, this is a request stream and answered ids are
    /// removed as their responses pass; without it, it is the standalone
    /// stream and event ids are remembered for resumption.
    async fn read_sse(
        &self,
        response: Response,
        mut awaiting: Option<&mut Vec<RequestId>>,
    ) -> TransportResult<()> {
        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = self.closed.cancelled() => return Ok(()),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            let chunk = chunk.map_err(http_error)?;
            for event in parser.feed(&chunk) {
                if awaiting.is_none() && let Some(id) = &event.id {
                    *self.last_event_id.lock() = Some(id.clone());
                }
                if !event.is_message() {
                    continue;
                }
                let frame = match serde_json::from_str::<IgnoredAny>(&event.data) {
                    Ok(_) => Bytes::from(event.data),
                    Err(e) => {
                        if !self.deliver(Err(TransportError::InvalidFrame(e.to_string()))) {
                            return Ok(());
                        }
                        continue;
                    }
                };
                if let Some(ids) = awaiting.as_deref_mut() {
                    settle(ids, &frame);
                }
                if !self.deliver(Ok(frame)) {
                    return Ok(());
                }
            }
        }
    }

    /// POST one frame and return the accepted response
    async fn post(&self, frame: Bytes) -> TransportResult<Response> {
        let mut headers = self.headers()?;
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        let had_session = headers.contains_key(MCP_SESSION_ID);

        let request = self
            .http
            .post(self.config.endpoint.clone())
            .headers(headers)
            .body(frame)
            .send();
        let response = match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| TransportError::Http(format!("no response within {:?}", limit)))?,
            None => request.await,
        }
        .map_err(http_error)?;

        self.capture_session(&response);
        self.check_status(response, had_session).await
    }

    /// Forward the body of a POST response, settling `awaiting` as responses
    /// arrive
    async fn read_reply(&self, response: Response, awaiting: &mut Vec<RequestId>) -> TransportResult<()> {
        if response.status() == StatusCode::ACCEPTED {
            return Ok(());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with(TEXT_EVENT_STREAM) {
            self.read_sse(response, Some(awaiting)).await
        } else if content_type.starts_with(APPLICATION_JSON) {
            let body = response.bytes().await.map_err(http_error)?;
            if !body.is_empty() {
                settle(awaiting, &body);
                self.deliver(Ok(body));
            }
            Ok(())
        } else {
            Err(TransportError::Http(format!(
                "unexpected content type: {}",
                content_type
            )))
        }
    }

    async fn open_standalone(&self) -> TransportResult<StandaloneEnd> {
        let mut headers = self.headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static(TEXT_EVENT_STREAM));
        if let Some(last) = self.last_event_id.lock().as_deref() {
            headers.insert(LAST_EVENT_ID, header_value(last)?);
        }
        let had_session = headers.contains_key(MCP_SESSION_ID);

        let response = self
            .http
            .get(self.config.endpoint.clone())
            .headers(headers)
            .send()
            .await
            .map_err(http_error)?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(StandaloneEnd::Unsupported);
        }
        let response = self.check_status(response, had_session).await?;
        info!("standalone SSE stream connected");
        self.read_sse(response, None).await?;
        Ok(StandaloneEnd::Ended)
    }
}

async fn run_standalone(inner: Arc<ClientInner>) {
    let reconnect = inner.config.reconnect.clone();
    let mut attempt = 0u32;
    loop {
        if inner.closed.is_cancelled() {
            return;
        }
        match inner.open_standalone().await {
            Ok(StandaloneEnd::Unsupported) => {
                debug!("server does not offer a standalone SSE stream");
                return;
            }
            Ok(StandaloneEnd::Ended) => {
                debug!("standalone SSE stream ended");
                attempt = 0;
            }
            Err(TransportError::SessionExpired) => return,
            Err(e) => warn!(error = %e, "standalone SSE stream failed"),
        }
        if inner.closed.is_cancelled() {
            return;
        }

        attempt += 1;
        if !reconnect.should_retry(attempt) {
            warn!(attempts = attempt, "giving up on the standalone SSE stream");
            return;
        }
        let delay = reconnect.delay_for_attempt(attempt);
        tokio::select! {
            _ = inner.closed.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Carry one request-bearing frame through its POST and reply, then fail
/// whatever it left unanswered
async fn run_exchange(inner: Arc<ClientInner>, frame: Bytes, mut awaiting: Vec<RequestId>) {
    let result = match inner.post(frame).await {
        Ok(response) => inner.read_reply(response, &mut awaiting).await,
        Err(e) => Err(e),
    };
    let reason = match result {
        Ok(()) if awaiting.is_empty() => return,
        Ok(()) => TransportError::Http("reply ended before every response arrived".to_string()),
        Err(e) => e,
    };
    if inner.closed.is_cancelled() || awaiting.is_empty() {
        debug!(error = %reason, "request exchange ended");
        return;
    }
    warn!(error = %reason, requests = awaiting.len(), "request exchange failed");
    inner.deliver(Err(TransportError::RequestsFailed {
        ids: awaiting,
        reason: Box::new(reason),
    }));
}

#[async_trait]
impl Transport for StreamableHttpClientTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.inner.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let session_id = self.inner.session_id.lock().clone();
        if session_id.is_some() {
            let result = match self.inner.headers() {
                Ok(headers) => self
                    .inner
                    .http
                    .delete(self.inner.config.endpoint.clone())
                    .headers(headers)
                    .send()
                    .await
                    .map_err(http_error),
                Err(e) => Err(e),
            };
            match result {
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                    debug!("server does not support session termination");
                }
                Ok(response) if !response.status().is_success() => {
                    debug!(status = %response.status(), "session termination rejected");
                }
                Ok(_) => debug!(session_id = ?session_id, "session terminated"),
                Err(e) => debug!(error = %e, "failed to terminate session"),
            }
        }
        self.inner.closed.cancel();
        self.inner.inbound_tx.lock().take();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let requests = envelope_ids(&frame, true);
        if !requests.is_empty() {
            tokio::spawn(run_exchange(self.inner.clone(), frame, requests));
            return Ok(());
        }

        let initialized = is_initialized_notification(&frame);
        let response = self.inner.post(frame).await?;
        if response.status() == StatusCode::ACCEPTED {
            if initialized {
                self.start_standalone_stream();
            }
            return Ok(());
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.read_reply(response, &mut Vec::new()).await {
                warn!(error = %e, "reply to notification failed");
            }
        });
        Ok(())
    }

    async fn send_related(&self, frame: Bytes, _related_request: &RequestId) -> TransportResult<()> {
        self.send(frame).await
    }

    fn receive(&self) -> TransportResult<FrameStream> {
        let receiver = self
            .inner
            .inbound_rx
            .lock()
            .take()
            .ok_or(TransportError::AlreadyReceiving)?;
        Ok(UnboundedReceiverStream::new(receiver)
            .take_until(self.inner.closed.cancelled_owned())
            .boxed())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().clone()
    }

    fn set_protocol_version(&self, version: &str) {
        *self.inner.protocol_version.lock() = Some(version.to_string());
    }
}

impl std::fmt::Debug for StreamableHttpClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpClientTransport")
            .field("endpoint", &self.inner.config.endpoint.as_str())
            .field("session_id", &*self.inner.session_id.lock())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn header_value(value: &str) -> TransportResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| TransportError::Http(format!("invalid header value: {}", e)))
}

fn http_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::ConnectionFailed(error.to_string())
    } else {
        TransportError::Http(error.to_string())
    }
}

/// Ids of the requests (`requests`) or responses in a single or batch frame
fn envelope_ids(frame: &[u8], requests: bool) -> Vec<RequestId> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        method: Option<IgnoredAny>,
        id: Option<serde_json::Value>,
    }

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Frame {
        Batch(Vec<Envelope>),
        Single(Envelope),
    }

    let envelopes = match serde_json::from_slice::<Frame>(frame) {
        Ok(Frame::Batch(envelopes)) => envelopes,
        Ok(Frame::Single(envelope)) => vec![envelope],
        Err(_) => return Vec::new(),
    };
    envelopes
        .into_iter()
        .filter(|envelope| envelope.method.is_some() == requests)
        .filter_map(|envelope| envelope.id.as_ref().and_then(RequestId::from_value))
        .collect()
}

/// Drop the ids answered by the responses in `frame`
fn settle(awaiting: &mut Vec<RequestId>, frame: &[u8]) {
    if awaiting.is_empty() {
        return;
    }
    let answered = envelope_ids(frame, false);
    awaiting.retain(|id| !answered.contains(id));
}

fn is_initialized_notification(frame: &[u8]) -> bool {
    #[derive(serde::Deserialize)]
    struct Probe<'a> {
        #[serde(borrow)]
        method: Option<&'a str>,
        id: Option<IgnoredAny>,
    }
    serde_json::from_slice::<Probe<'_>>(frame)
        .map(|probe| probe.id.is_none() && probe.method == Some(NOTIFICATION_INITIALIZED))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_initialized_notification() {
        assert!(is_initialized_notification(
            br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        ));
        assert!(!is_initialized_notification(
            br#"{"jsonrpc":"2.0","id":1,"method":"notifications/initialized"}"#
        ));
        assert!(!is_initialized_notification(br#"{"jsonrpc":"2.0","method":"ping","id":2}"#));
        assert!(!is_initialized_notification(br#"[{"jsonrpc":"2.0","method":"x"}]"#));
    }

    #[test]
    fn test_envelope_ids_split_requests_from_responses() {
        let batch = br#"[
            {"jsonrpc":"2.0","id":1,"method":"tools/list"},
            {"jsonrpc":"2.0","method":"notifications/progress"},
            {"jsonrpc":"2.0","id":"r-2","result":{}},
            {"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}
        ]"#;
        assert_eq!(envelope_ids(batch, true), vec![RequestId::Number(1)]);
        assert_eq!(envelope_ids(batch, false), vec![RequestId::String("r-2".into())]);
        assert!(envelope_ids(b"not json", true).is_empty());
    }

    #[test]
    fn test_settle_removes_answered_ids() {
        let mut awaiting = vec![RequestId::Number(1), RequestId::Number(2)];
        settle(&mut awaiting, br#"{"jsonrpc":"2.0","id":2,"result":{}}"#);
        assert_eq!(awaiting, vec![RequestId::Number(1)]);
        // A server request with the same id is not an answer
        settle(&mut awaiting, br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert_eq!(awaiting, vec![RequestId::Number(1)]);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let transport = StreamableHttpClientTransport::connect_to("http://127.0.0.1:9/mcp").unwrap();
        let err = transport
            .send(Bytes::from_static(br#"{"jsonrpc":"2.0","method":"x"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(transport.session_id().is_none());
    }

    #[tokio::test]
    async fn test_receive_only_once() {
        let transport = StreamableHttpClientTransport::connect_to("http://127.0.0.1:9/mcp").unwrap();
        assert!(transport.receive().is_ok());
        assert!(matches!(transport.receive(), Err(TransportError::AlreadyReceiving)));
    }
}
