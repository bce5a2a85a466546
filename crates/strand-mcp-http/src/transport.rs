//! Server side of the Streamable HTTP transport for a single session.
//!
//! HTTP requests enter through [`StreamableHttpServerTransport::handle_request`];
//! accepted messages are forwarded to the connection reading
//! [`Transport::receive`]. Outbound frames from the connection are routed back
//! by request id: a response (or a message related to a request) goes to the
//! stream the request arrived on, everything else goes to the standalone GET
//! stream. A request stream ends once every request routed to it has been
//! answered.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{ALLOW, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, LengthLimitError, Limited, StreamBody};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use strand_json_rpc::error_codes::{CONNECTION_ERROR, INVALID_REQUEST, PARSE_ERROR, SESSION_NOT_FOUND};
use strand_json_rpc::{JsonRpcEnvelope, RequestId, decode_envelope};
use strand_mcp_core::transport::{FrameStream, Transport, TransportType};
use strand_mcp_core::{CancellationHandle, TransportError, TransportResult};
use strand_mcp_protocol::methods::INITIALIZE;
use strand_mcp_protocol::{DEFAULT_NEGOTIATED_PROTOCOL_VERSION, McpVersion};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SessionMode, StreamableHttpConfig};
use crate::protocol::{
    APPLICATION_JSON, SessionHeader, TEXT_EVENT_STREAM, accepts, extract_last_event_id,
    extract_protocol_version, is_json_content_type, session_header,
};
use crate::responses::{
    HttpBody, json_response, json_rpc_error_response, sse_response, status_response,
    with_session_id,
};
use crate::sse::{KEEPALIVE, SseEvent};

/// Stream id of the server-to-client GET stream
pub const STANDALONE_STREAM_ID: &str = "_GET_stream";

type Rejection = Response<HttpBody>;

/// Where messages for one stream go
enum Sink {
    Sse {
        sender: mpsc::Sender<SseEvent>,
        generation: u64,
    },
    /// JSON response mode: the POST handler waits for every response at once
    Json {
        reply: oneshot::Sender<Vec<Value>>,
    },
}

#[derive(Default)]
struct SessionState {
    initialized: bool,
    session_id: Option<String>,
    protocol_version: Option<String>,
    /// Open response channels by stream id
    sinks: HashMap<String, Sink>,
    /// Stream carrying the response of each pending request
    request_streams: HashMap<RequestId, String>,
    /// Requests of each stream, in arrival order
    stream_requests: HashMap<String, Vec<RequestId>>,
    /// Responses held until their whole stream is answered
    responses: HashMap<RequestId, Value>,
}

struct Inner {
    config: StreamableHttpConfig,
    state: Mutex<SessionState>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    generations: AtomicU64,
    closed: CancellationHandle,
}

/// Removes an SSE sink when its HTTP body is dropped, unless the stream has
/// since been taken over by a newer connection
struct SinkGuard {
    inner: Weak<Inner>,
    stream_id: String,
    generation: u64,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        let current = matches!(
            state.sinks.get(&self.stream_id),
            Some(Sink::Sse { generation, .. }) if *generation == self.generation
        );
        if current {
            state.sinks.remove(&self.stream_id);
            debug!(stream_id = %self.stream_id, "SSE stream disconnected");
        }
    }
}

#[derive(Clone)]
pub struct StreamableHttpServerTransport {
    inner: Arc<Inner>,
}

impl StreamableHttpServerTransport {
    pub fn new(config: StreamableHttpConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SessionState::default()),
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: Mutex::new(Some(inbound_rx)),
                generations: AtomicU64::new(1),
                closed: CancellationHandle::new(),
            }),
        }
    }

    pub fn config(&self) -> &StreamableHttpConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Version negotiated by the connection during initialize
    pub fn protocol_version(&self) -> Option<String> {
        self.inner.state.lock().protocol_version.clone()
    }

    pub fn has_standalone_stream(&self) -> bool {
        self.inner.state.lock().sinks.contains_key(STANDALONE_STREAM_ID)
    }

    /// Resolves once the transport has been closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Handle one HTTP request addressed to this session
    pub async fn handle_request<B>(&self, request: Request<B>) -> Response<HttpBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        if let Err(message) = self.inner.config.dns_rebinding.validate(&parts.headers) {
            warn!(reason = %message, "rejected by DNS rebinding protection");
            return json_rpc_error_response(StatusCode::FORBIDDEN, CONNECTION_ERROR, message, None);
        }

        debug!(method = %parts.method, "streamable HTTP request");
        match parts.method {
            Method::POST => self.handle_post(&parts.headers, body).await,
            Method::GET => self.handle_get(&parts.headers).await,
            Method::DELETE => self.handle_delete(&parts.headers),
            _ => method_not_allowed(),
        }
    }

    async fn handle_post<B>(&self, headers: &HeaderMap, body: B) -> Response<HttpBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if !(accepts(headers, APPLICATION_JSON) && accepts(headers, TEXT_EVENT_STREAM)) {
            return json_rpc_error_response(
                StatusCode::NOT_ACCEPTABLE,
                CONNECTION_ERROR,
                "Not Acceptable: Client must accept both application/json and text/event-stream",
                None,
            );
        }
        if !is_json_content_type(headers) {
            return json_rpc_error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                CONNECTION_ERROR,
                "Unsupported Media Type: Content-Type must be application/json",
                None,
            );
        }

        let bytes = match read_body(body, self.inner.config.max_body_size).await {
            Ok(bytes) => bytes,
            Err(rejection) => return rejection,
        };
        let messages = match parse_messages(&bytes) {
            Ok(messages) => messages,
            Err(rejection) => return rejection,
        };

        let session_id = if messages.iter().any(|m| m.is_request_for(INITIALIZE)) {
            match self.begin_session(messages.len()) {
                Ok(session_id) => session_id,
                Err(rejection) => return rejection,
            }
        } else {
            if let Err(rejection) = self.validate_session(headers) {
                return rejection;
            }
            if let Err(rejection) = validate_protocol_version(headers) {
                return rejection;
            }
            self.inner.state.lock().session_id.clone()
        };

        let request_ids: Vec<RequestId> = messages
            .iter()
            .filter_map(|m| match m {
                JsonRpcEnvelope::Request(request) => Some(request.id.clone()),
                _ => None,
            })
            .collect();

        if request_ids.is_empty() {
            if let Err(e) = self.forward(bytes) {
                return closed_response(&e);
            }
            return status_response(StatusCode::ACCEPTED);
        }

        let stream_id = Uuid::new_v4().to_string();
        if self.inner.config.enable_json_response {
            let (reply, responses) = oneshot::channel();
            self.register_stream(&stream_id, request_ids, Sink::Json { reply });
            if let Err(e) = self.forward(bytes) {
                return closed_response(&e);
            }
            let Ok(responses) = responses.await else {
                return closed_response(&TransportError::Closed);
            };
            let body = match responses.as_slice() {
                [single] => serde_json::to_vec(single),
                many => serde_json::to_vec(many),
            };
            match body {
                Ok(body) => with_session_id(json_response(StatusCode::OK, body), session_id.as_deref()),
                Err(e) => json_rpc_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    CONNECTION_ERROR,
                    e.to_string(),
                    None,
                ),
            }
        } else {
            let (sender, receiver) = mpsc::channel(self.inner.config.channel_buffer_size);
            let generation = self.next_generation();
            self.register_stream(&stream_id, request_ids, Sink::Sse { sender, generation });
            let guard = self.guard(&stream_id, generation);
            if let Err(e) = self.forward(bytes) {
                return closed_response(&e);
            }
            debug!(stream_id = %stream_id, "opened request stream");
            let body = self.sse_body(Vec::new(), receiver, guard);
            with_session_id(sse_response(body), session_id.as_deref())
        }
    }

    async fn handle_get(&self, headers: &HeaderMap) -> Response<HttpBody> {
        if !accepts(headers, TEXT_EVENT_STREAM) {
            return json_rpc_error_response(
                StatusCode::NOT_ACCEPTABLE,
                CONNECTION_ERROR,
                "Not Acceptable: Client must accept text/event-stream",
                None,
            );
        }
        if let Err(rejection) = self.validate_session(headers) {
            return rejection;
        }
        if let Err(rejection) = validate_protocol_version(headers) {
            return rejection;
        }
        let session_id = self.inner.state.lock().session_id.clone();

        if let (Some(_), Some(last_event_id)) =
            (&self.inner.config.event_store, extract_last_event_id(headers))
        {
            return self.resume(&last_event_id, session_id).await;
        }

        let (sender, receiver) = mpsc::channel(self.inner.config.channel_buffer_size);
        let generation = self.next_generation();
        {
            let mut state = self.inner.state.lock();
            if state.sinks.contains_key(STANDALONE_STREAM_ID) {
                return conflict();
            }
            state
                .sinks
                .insert(STANDALONE_STREAM_ID.to_string(), Sink::Sse { sender, generation });
        }
        info!(session_id = ?session_id, "standalone SSE stream opened");

        let guard = self.guard(STANDALONE_STREAM_ID, generation);
        let body = self.sse_body(Vec::new(), receiver, guard);
        with_session_id(sse_response(body), session_id.as_deref())
    }

    /// Replay stored events after `last_event_id`, then keep the stream live
    /// on this response
    async fn resume(&self, last_event_id: &str, session_id: Option<String>) -> Response<HttpBody> {
        let Some(store) = self.inner.config.event_store.clone() else {
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        };
        let replay = match store.replay_events_after(last_event_id).await {
            Ok(replay) => replay,
            Err(e) => {
                warn!(last_event_id = %last_event_id, error = %e, "cannot resume stream");
                return json_rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    CONNECTION_ERROR,
                    format!("Bad Request: {}", e),
                    None,
                );
            }
        };

        let (sender, receiver) = mpsc::channel(self.inner.config.channel_buffer_size);
        let generation = self.next_generation();
        {
            let mut state = self.inner.state.lock();
            let standalone = replay.stream_id == STANDALONE_STREAM_ID;
            if standalone && state.sinks.contains_key(STANDALONE_STREAM_ID) {
                return conflict();
            }
            // A request stream with nothing left to answer only replays
            if standalone || state.stream_requests.contains_key(&replay.stream_id) {
                state
                    .sinks
                    .insert(replay.stream_id.clone(), Sink::Sse { sender, generation });
            }
        }
        info!(
            stream_id = %replay.stream_id,
            replayed = replay.events.len(),
            "resuming SSE stream"
        );

        let replayed = replay
            .events
            .into_iter()
            .map(|event| SseEvent::message(Some(event.event_id), event.message.to_string()))
            .collect();
        let guard = self.guard(&replay.stream_id, generation);
        let body = self.sse_body(replayed, receiver, guard);
        with_session_id(sse_response(body), session_id.as_deref())
    }

    fn handle_delete(&self, headers: &HeaderMap) -> Response<HttpBody> {
        if let Err(rejection) = self.validate_session(headers) {
            return rejection;
        }
        if let Err(rejection) = validate_protocol_version(headers) {
            return rejection;
        }
        info!(session_id = ?self.inner.state.lock().session_id, "session terminated by client");
        self.close();
        status_response(StatusCode::OK)
    }

    /// Mark the transport initialized and issue the session id
    fn begin_session(&self, message_count: usize) -> Result<Option<String>, Rejection> {
        let mut state = self.inner.state.lock();
        if state.initialized && state.session_id.is_some() {
            return Err(json_rpc_error_response(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: Server already initialized",
                None,
            ));
        }
        if message_count > 1 {
            return Err(json_rpc_error_response(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: Only one initialization request is allowed",
                None,
            ));
        }
        state.session_id = match self.inner.config.session_mode {
            SessionMode::Stateful => Some(Uuid::new_v4().to_string()),
            SessionMode::Stateless => None,
        };
        state.initialized = true;
        info!(session_id = ?state.session_id, "session initialized");
        Ok(state.session_id.clone())
    }

    fn validate_session(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        if self.inner.config.session_mode == SessionMode::Stateless {
            return Ok(());
        }
        let state = self.inner.state.lock();
        if !state.initialized {
            return Err(bad_request("Bad Request: Server not initialized"));
        }
        match session_header(headers) {
            SessionHeader::Missing => Err(bad_request("Bad Request: Mcp-Session-Id header is required")),
            SessionHeader::Invalid => Err(bad_request(
                "Bad Request: Mcp-Session-Id header must be a single value",
            )),
            SessionHeader::Single(id) if state.session_id.as_deref() != Some(id.as_str()) => {
                Err(json_rpc_error_response(
                    StatusCode::NOT_FOUND,
                    SESSION_NOT_FOUND,
                    "Session not found",
                    None,
                ))
            }
            SessionHeader::Single(_) => Ok(()),
        }
    }

    fn register_stream(&self, stream_id: &str, request_ids: Vec<RequestId>, sink: Sink) {
        let mut state = self.inner.state.lock();
        for id in &request_ids {
            state.request_streams.insert(id.clone(), stream_id.to_string());
        }
        state.stream_requests.insert(stream_id.to_string(), request_ids);
        state.sinks.insert(stream_id.to_string(), sink);
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn guard(&self, stream_id: &str, generation: u64) -> SinkGuard {
        SinkGuard {
            inner: Arc::downgrade(&self.inner),
            stream_id: stream_id.to_string(),
            generation,
        }
    }

    fn forward(&self, frame: Bytes) -> TransportResult<()> {
        let inbound = self.inner.inbound_tx.lock();
        let sender = inbound.as_ref().ok_or(TransportError::Closed)?;
        sender.send(frame).map_err(|_| TransportError::Closed)
    }

    fn sse_body(
        &self,
        replayed: Vec<SseEvent>,
        mut receiver: mpsc::Receiver<SseEvent>,
        guard: SinkGuard,
    ) -> HttpBody {
        let keepalive = self.inner.config.keepalive_interval;
        let stream = async_stream::stream! {
            let _guard = guard;
            for event in replayed {
                yield Ok::<_, Infallible>(Frame::data(event.to_bytes()));
            }
            let mut ticker = keepalive.map(|period| interval_at(Instant::now() + period, period));
            loop {
                let next = match ticker.as_mut() {
                    Some(ticker) => tokio::select! {
                        event = receiver.recv() => Some(event),
                        _ = ticker.tick() => None,
                    },
                    None => Some(receiver.recv().await),
                };
                match next {
                    Some(Some(event)) => yield Ok(Frame::data(event.to_bytes())),
                    Some(None) => break,
                    None => yield Ok(Frame::data(Bytes::from_static(KEEPALIVE.as_bytes()))),
                }
            }
        };
        StreamBody::new(stream).boxed_unsync()
    }

    async fn route(&self, frame: Bytes, related: Option<&RequestId>) -> TransportResult<()> {
        let value: Value = serde_json::from_slice(&frame)
            .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;
        let messages = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for message in messages {
            self.route_message(message, related).await?;
        }
        Ok(())
    }

    async fn route_message(&self, message: Value, related: Option<&RequestId>) -> TransportResult<()> {
        let is_response = message.get("method").is_none();
        let target = if is_response {
            let id = message.get("id").and_then(RequestId::from_value).ok_or_else(|| {
                TransportError::Routing(
                    "Cannot send a response on a standalone SSE stream unless resuming a previous client request"
                        .to_string(),
                )
            })?;
            Some(id)
        } else {
            related.cloned()
        };

        let Some(request_id) = target else {
            return self.send_standalone(message).await;
        };
        let stream_id = self.inner.state.lock().request_streams.get(&request_id).cloned();
        match stream_id {
            Some(stream_id) => {
                self.send_on_stream(&stream_id, request_id, message, is_response)
                    .await;
                Ok(())
            }
            // The related request already finished
            None if !is_response => self.send_standalone(message).await,
            None => Err(TransportError::Routing(format!(
                "No connection established for request ID: {}",
                request_id
            ))),
        }
    }

    async fn send_standalone(&self, message: Value) -> TransportResult<()> {
        let Some(sender) = self.sse_sender(STANDALONE_STREAM_ID) else {
            debug!("no standalone stream open, dropping message");
            return Ok(());
        };
        let event_id = self.store(STANDALONE_STREAM_ID, &message).await;
        write_event(&sender, event_id, &message).await;
        Ok(())
    }

    async fn send_on_stream(&self, stream_id: &str, request_id: RequestId, message: Value, is_response: bool) {
        if !self.inner.config.enable_json_response {
            // Stored even while disconnected so a resumed stream can replay it
            let event_id = self.store(stream_id, &message).await;
            if let Some(sender) = self.sse_sender(stream_id) {
                write_event(&sender, event_id, &message).await;
            }
        } else if !is_response {
            debug!(stream_id = %stream_id, "JSON response mode cannot carry related messages");
        }

        if is_response {
            self.complete(stream_id, request_id, message);
        }
    }

    /// Record a response; once every request of the stream is answered the
    /// stream is finished
    fn complete(&self, stream_id: &str, request_id: RequestId, message: Value) {
        let mut state = self.inner.state.lock();
        state.responses.insert(request_id, message);

        let ids = state.stream_requests.get(stream_id).cloned().unwrap_or_default();
        if !ids.iter().all(|id| state.responses.contains_key(id)) {
            return;
        }
        let responses: Vec<Value> = ids.iter().filter_map(|id| state.responses.remove(id)).collect();
        for id in &ids {
            state.request_streams.remove(id);
        }
        state.stream_requests.remove(stream_id);

        match state.sinks.remove(stream_id) {
            Some(Sink::Json { reply }) => {
                let _ = reply.send(responses);
            }
            // Dropping the sender ends the SSE body after buffered events
            Some(Sink::Sse { .. }) => debug!(stream_id = %stream_id, "request stream complete"),
            None => debug!(stream_id = %stream_id, "request stream completed while disconnected"),
        }
    }

    fn sse_sender(&self, stream_id: &str) -> Option<mpsc::Sender<SseEvent>> {
        match self.inner.state.lock().sinks.get(stream_id) {
            Some(Sink::Sse { sender, .. }) => Some(sender.clone()),
            _ => None,
        }
    }

    async fn store(&self, stream_id: &str, message: &Value) -> Option<String> {
        let store = self.inner.config.event_store.as_ref()?;
        match store.store_event(stream_id, message).await {
            Ok(event_id) => Some(event_id),
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "failed to store event");
                None
            }
        }
    }

    /// End every stream and the inbound message stream
    fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            state.sinks.clear();
            state.request_streams.clear();
            state.stream_requests.clear();
            state.responses.clear();
        }
        self.inner.inbound_tx.lock().take();
        self.inner.closed.cancel();
    }
}

#[async_trait]
impl Transport for StreamableHttpServerTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.inner.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.close();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        self.route(frame, None).await
    }

    async fn send_related(&self, frame: Bytes, related_request: &RequestId) -> TransportResult<()> {
        self.route(frame, Some(related_request)).await
    }

    fn receive(&self) -> TransportResult<FrameStream> {
        let receiver = self
            .inner
            .inbound_rx
            .lock()
            .take()
            .ok_or(TransportError::AlreadyReceiving)?;
        Ok(UnboundedReceiverStream::new(receiver)
            .map(Ok)
            .take_until(self.inner.closed.cancelled_owned())
            .boxed())
    }

    fn is_connected(&self) -> bool {
        !self.inner.closed.is_cancelled()
    }

    fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    fn set_protocol_version(&self, version: &str) {
        self.inner.state.lock().protocol_version = Some(version.to_string());
    }
}

impl std::fmt::Debug for StreamableHttpServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamableHttpServerTransport")
            .field("session_id", &state.session_id)
            .field("initialized", &state.initialized)
            .field("streams", &state.sinks.len())
            .finish()
    }
}

async fn write_event(sender: &mpsc::Sender<SseEvent>, event_id: Option<String>, message: &Value) {
    if sender
        .send(SseEvent::message(event_id, message.to_string()))
        .await
        .is_err()
    {
        debug!("SSE stream closed before the event was written");
    }
}

pub(crate) async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Rejection>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(json_rpc_error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            CONNECTION_ERROR,
            format!("Payload Too Large: body exceeds {} bytes", limit),
            None,
        )),
        Err(e) => Err(json_rpc_error_response(
            StatusCode::BAD_REQUEST,
            PARSE_ERROR,
            "Parse error",
            Some(Value::String(e.to_string())),
        )),
    }
}

/// Decode a POST body into envelopes; any invalid element rejects the body
fn parse_messages(bytes: &[u8]) -> Result<Vec<JsonRpcEnvelope>, Rejection> {
    let parse_error = |detail: String| {
        json_rpc_error_response(
            StatusCode::BAD_REQUEST,
            PARSE_ERROR,
            "Parse error",
            Some(Value::String(detail)),
        )
    };
    let value: Value = serde_json::from_slice(bytes).map_err(|e| parse_error(e.to_string()))?;
    let items = match value {
        Value::Array(items) if items.is_empty() => {
            return Err(parse_error("Empty batch".to_string()));
        }
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| decode_envelope(item).map_err(|e| parse_error(e.error.message)))
        .collect()
}

fn validate_protocol_version(headers: &HeaderMap) -> Result<(), Rejection> {
    let version = extract_protocol_version(headers)
        .unwrap_or_else(|| DEFAULT_NEGOTIATED_PROTOCOL_VERSION.as_str().to_string());
    if McpVersion::is_supported(&version) {
        return Ok(());
    }
    warn!(version = %version, "unsupported protocol version header");
    Err(bad_request(format!(
        "Bad Request: Unsupported protocol version (supported versions: {})",
        McpVersion::supported_list()
    )))
}

fn bad_request(message: impl Into<String>) -> Rejection {
    json_rpc_error_response(StatusCode::BAD_REQUEST, CONNECTION_ERROR, message, None)
}

fn conflict() -> Rejection {
    json_rpc_error_response(
        StatusCode::CONFLICT,
        CONNECTION_ERROR,
        "Conflict: Only one SSE stream is allowed per session",
        None,
    )
}

fn closed_response(error: &TransportError) -> Rejection {
    json_rpc_error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        CONNECTION_ERROR,
        error.to_string(),
        None,
    )
}

pub(crate) fn method_not_allowed() -> Response<HttpBody> {
    let mut response = json_rpc_error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        CONNECTION_ERROR,
        "Method not allowed.",
        None,
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
    response
}
