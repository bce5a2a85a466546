use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use strand_json_rpc::{
    DecodedFrame, JsonRpcEnvelope, JsonRpcError, JsonRpcFrame, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, NotificationMethod, RequestId, decode_frame, decode_notification_params,
    decode_params, encode_frame, encode_params,
};
use strand_mcp_protocol::methods::{INITIALIZE, NOTIFICATION_CANCELLED, NOTIFICATION_INITIALIZED};
use strand_mcp_protocol::{
    Cancelled, CancelledNotificationParams, Implementation, Initialize, InitializeResult,
    McpVersion, ServerCapabilities, negotiate_version,
};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::handler::{HandlerRegistry, RequestContext};
use super::lifecycle::{LifecycleState, Role, ServerIdentity, SessionSnapshot};
use super::pending::Waiter;
use super::{CancelReason, Command, Connection, Outbound};
use crate::cancellation::CancellationHandle;
use crate::error::{McpError, TransportError};
use crate::transport::{FrameStream, Transport};

/// Upper bound on flushing queued writes during shutdown
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(super) struct ActorParts {
    pub role: Role,
    pub transport: Arc<dyn Transport>,
    pub handle: Connection,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub inbound: FrameStream,
    pub handlers: HandlerRegistry,
    pub snapshot: watch::Sender<SessionSnapshot>,
    pub identity: Option<ServerIdentity>,
    pub closed: CancellationHandle,
}

pub(super) fn spawn(parts: ActorParts) {
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_writer(parts.transport.clone(), writes_rx, events_tx.clone()));

    let actor = ConnectionActor {
        role: parts.role,
        transport: parts.transport,
        handle: parts.handle,
        commands: parts.commands,
        inbound: parts.inbound,
        writes: Some(writes_tx),
        writer: Some(writer),
        events_tx,
        events: events_rx,
        pending: HashMap::new(),
        handlers: parts.handlers,
        in_flight: HashMap::new(),
        batches: HashMap::new(),
        next_batch: 0,
        snapshot: parts.snapshot,
        identity: parts.identity,
        closed: parts.closed,
    };
    tokio::spawn(actor.run());
}

struct WriteJob {
    frame: Bytes,
    /// Requests carried by this frame; failed together if the send fails
    ids: Vec<RequestId>,
    related: Option<RequestId>,
}

enum ActorEvent {
    HandlerFinished {
        id: RequestId,
        response: JsonRpcEnvelope,
    },
    SendFailed {
        ids: Vec<RequestId>,
        error: TransportError,
    },
}

struct PendingCall {
    method: String,
    waiter: Waiter,
}

struct InFlight {
    cancellation: CancellationHandle,
    abort: AbortHandle,
    batch: Option<u64>,
}

/// Responses collected for an inbound batch until every request in it has
/// been answered or cancelled
struct BatchReply {
    remaining: usize,
    responses: Vec<JsonRpcEnvelope>,
}

enum Dispatch {
    Done,
    Reply(JsonRpcEnvelope),
    Spawned,
}

struct ConnectionActor {
    role: Role,
    transport: Arc<dyn Transport>,
    handle: Connection,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: FrameStream,
    writes: Option<mpsc::UnboundedSender<WriteJob>>,
    writer: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<ActorEvent>,
    events: mpsc::UnboundedReceiver<ActorEvent>,
    pending: HashMap<RequestId, PendingCall>,
    handlers: HandlerRegistry,
    in_flight: HashMap<RequestId, InFlight>,
    batches: HashMap<u64, BatchReply>,
    next_batch: u64,
    snapshot: watch::Sender<SessionSnapshot>,
    identity: Option<ServerIdentity>,
    closed: CancellationHandle,
}

impl ConnectionActor {
    async fn run(mut self) {
        info!(
            role = %self.role,
            transport = %self.transport.transport_type(),
            "connection started"
        );
        let mut close_reply = None;

        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => match command {
                    Command::Close { reply } => {
                        close_reply = reply;
                        break;
                    }
                    command => self.on_command(command),
                },
                Some(event) = self.events.recv() => self.on_event(event),
                frame = self.inbound.next() => match frame {
                    Some(Ok(bytes)) => self.on_frame(&bytes),
                    Some(Err(TransportError::InvalidFrame(reason))) => {
                        warn!(reason = %reason, "received undecodable frame");
                        self.write(JsonRpcError::parse_error(Some(Value::String(reason))).into(), None);
                    }
                    Some(Err(TransportError::RequestsFailed { ids, reason })) => {
                        warn!(requests = ids.len(), error = %reason, "request exchange failed");
                        self.fail_requests(ids, *reason);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "transport failed");
                        break;
                    }
                    None => {
                        info!("transport closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
    }

    fn state(&self) -> LifecycleState {
        self.snapshot.borrow().state
    }

    fn set_state(&self, state: LifecycleState) {
        self.snapshot.send_modify(|s| s.state = state);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(outbound) => self.send_outbound(vec![outbound], false),
            Command::Batch(entries) => self.send_outbound(entries, true),
            Command::Cancel { id, reason } => self.cancel_pending(id, reason),
            Command::RegisterRequest {
                method,
                handler,
                reply,
            } => {
                let _ = reply.send(self.handlers.insert_request(method, handler, false));
            }
            Command::RegisterNotification {
                method,
                handler,
                reply,
            } => {
                let _ = reply.send(self.handlers.insert_notification(method, handler, false));
            }
            // handled by the run loop
            Command::Close { .. } => {}
        }
    }

    fn send_outbound(&mut self, entries: Vec<Outbound>, as_batch: bool) {
        let mut envelopes = Vec::with_capacity(entries.len());
        let mut ids = Vec::new();
        let mut related = None;

        for Outbound {
            envelope,
            waiter,
            related: entry_related,
        } in entries
        {
            if let (JsonRpcEnvelope::Request(request), Some(waiter)) = (&envelope, waiter) {
                if self.pending.contains_key(&request.id) {
                    let _ = waiter.send(Err(McpError::invalid_request(format!(
                        "Duplicate request id {}",
                        request.id
                    ))));
                    continue;
                }
                self.pending.insert(
                    request.id.clone(),
                    PendingCall {
                        method: request.method.clone(),
                        waiter,
                    },
                );
                ids.push(request.id.clone());
            }
            self.observe_outbound(&envelope);
            related = related.or(entry_related);
            envelopes.push(envelope);
        }

        let frame = match (as_batch, envelopes.len()) {
            (_, 0) => return,
            (false, 1) => match envelopes.pop() {
                Some(envelope) => JsonRpcFrame::Single(envelope),
                None => return,
            },
            _ => JsonRpcFrame::Batch(envelopes),
        };

        match encode_frame(&frame) {
            Ok(bytes) => self.enqueue_write(WriteJob {
                frame: Bytes::from(bytes),
                ids,
                related,
            }),
            Err(e) => {
                error!(error = %e, "failed to encode outbound frame");
                for id in ids {
                    if let Some(call) = self.pending.remove(&id) {
                        let _ = call.waiter.send(Err(McpError::Internal(e.to_string())));
                    }
                }
            }
        }
    }

    /// The client becomes ready when it emits `notifications/initialized`
    fn observe_outbound(&self, envelope: &JsonRpcEnvelope) {
        if self.role == Role::Client
            && envelope.method() == Some(NOTIFICATION_INITIALIZED)
            && self.state() == LifecycleState::Initializing
        {
            self.set_state(LifecycleState::Ready);
            info!("session ready");
        }
    }

    fn enqueue_write(&mut self, job: WriteJob) {
        let Some(writes) = &self.writes else {
            return;
        };
        if let Err(mpsc::error::SendError(job)) = writes.send(job) {
            self.fail_requests(job.ids, TransportError::Closed);
        }
    }

    fn write(&mut self, envelope: JsonRpcEnvelope, related: Option<RequestId>) {
        match encode_frame(&JsonRpcFrame::Single(envelope)) {
            Ok(bytes) => self.enqueue_write(WriteJob {
                frame: Bytes::from(bytes),
                ids: Vec::new(),
                related,
            }),
            Err(e) => error!(error = %e, "failed to encode response"),
        }
    }

    fn write_batch(&mut self, responses: Vec<JsonRpcEnvelope>) {
        if responses.is_empty() {
            return;
        }
        match encode_frame(&JsonRpcFrame::Batch(responses)) {
            Ok(bytes) => self.enqueue_write(WriteJob {
                frame: Bytes::from(bytes),
                ids: Vec::new(),
                related: None,
            }),
            Err(e) => error!(error = %e, "failed to encode batch response"),
        }
    }

    fn fail_requests(&mut self, ids: Vec<RequestId>, error: TransportError) {
        for id in ids {
            if let Some(call) = self.pending.remove(&id) {
                debug!(id = %id, error = %error, "request failed in transport");
                let _ = call.waiter.send(Err(McpError::Transport(error.clone())));
            }
        }
    }

    fn cancel_pending(&mut self, id: RequestId, reason: CancelReason) {
        let Some(call) = self.pending.remove(&id) else {
            return;
        };
        let reason = match reason {
            CancelReason::Explicit(reason) => {
                let _ = call.waiter.send(Err(McpError::Cancelled));
                reason
            }
            CancelReason::Dropped => None,
        };
        debug!(id = %id, method = %call.method, "request cancelled");

        // initialize is never cancelled on the wire
        if call.method == INITIALIZE {
            return;
        }
        let mut params = CancelledNotificationParams::new(id);
        params.reason = reason;
        match encode_params(Cancelled::PARAMS, &params) {
            Ok(params) => {
                self.write(JsonRpcNotification::new(NOTIFICATION_CANCELLED, params).into(), None)
            }
            Err(e) => error!(error = %e, "failed to encode cancellation"),
        }
    }

    fn on_event(&mut self, event: ActorEvent) {
        match event {
            ActorEvent::HandlerFinished { id, response } => {
                let Some(flight) = self.in_flight.remove(&id) else {
                    debug!(id = %id, "discarding result of cancelled handler");
                    return;
                };
                match flight.batch {
                    None => self.write(response, Some(id)),
                    Some(key) => self.complete_batch_entry(key, Some(response)),
                }
            }
            ActorEvent::SendFailed { ids, error } => self.fail_requests(ids, error),
        }
    }

    fn complete_batch_entry(&mut self, key: u64, response: Option<JsonRpcEnvelope>) {
        let Some(batch) = self.batches.get_mut(&key) else {
            return;
        };
        batch.responses.extend(response);
        batch.remaining = batch.remaining.saturating_sub(1);
        if batch.remaining == 0
            && let Some(batch) = self.batches.remove(&key)
        {
            self.write_batch(batch.responses);
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        match decode_frame(bytes) {
            Err(error) => {
                debug!(code = error.error.code, "rejecting malformed frame");
                self.write(error.into(), None);
            }
            Ok(DecodedFrame::Single(envelope)) => {
                if let Dispatch::Reply(reply) = self.dispatch(envelope, None) {
                    self.write(reply, None);
                }
            }
            Ok(DecodedFrame::Batch(items)) => self.on_batch(items),
        }
    }

    fn on_batch(&mut self, items: Vec<Result<JsonRpcEnvelope, JsonRpcError>>) {
        let key = self.next_batch;
        self.next_batch = self.next_batch.wrapping_add(1);

        let mut responses = Vec::new();
        let mut spawned = 0;
        for item in items {
            match item {
                Err(error) => responses.push(error.into()),
                Ok(envelope) => match self.dispatch(envelope, Some(key)) {
                    Dispatch::Reply(reply) => responses.push(reply),
                    Dispatch::Spawned => spawned += 1,
                    Dispatch::Done => {}
                },
            }
        }

        if spawned == 0 {
            self.write_batch(responses);
        } else {
            self.batches.insert(
                key,
                BatchReply {
                    remaining: spawned,
                    responses,
                },
            );
        }
    }

    fn dispatch(&mut self, envelope: JsonRpcEnvelope, batch: Option<u64>) -> Dispatch {
        match envelope {
            JsonRpcEnvelope::Request(request) => self.on_request(request, batch),
            JsonRpcEnvelope::Notification(notification) => {
                self.on_notification(notification);
                Dispatch::Done
            }
            JsonRpcEnvelope::Response(response) => {
                self.resolve(response.id, Ok(response.result));
                Dispatch::Done
            }
            JsonRpcEnvelope::Error(error) => {
                match error.id {
                    Some(id) => self.resolve(id, Err(McpError::from_error_object(error.error))),
                    None => warn!(
                        code = error.error.code,
                        message = %error.error.message,
                        "peer reported an error without a request id"
                    ),
                }
                Dispatch::Done
            }
        }
    }

    fn resolve(&mut self, id: RequestId, result: Result<Value, McpError>) {
        let Some(call) = self.pending.remove(&id) else {
            debug!(id = %id, "discarding response for unknown or cancelled request");
            return;
        };
        if self.role == Role::Client
            && call.method == INITIALIZE
            && let Ok(value) = &result
        {
            self.on_initialize_result(value);
        }
        let _ = call.waiter.send(result);
    }

    fn on_initialize_result(&mut self, value: &Value) {
        let Ok(result) = serde_json::from_value::<InitializeResult>(value.clone()) else {
            warn!("initialize result does not match the expected shape");
            return;
        };
        let version = McpVersion::parse_version(&result.protocol_version);
        if let Some(version) = version {
            self.transport.set_protocol_version(version.as_str());
        }
        let session_id = self.transport.session_id();
        info!(
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "initialize result received"
        );
        self.snapshot.send_modify(|s| {
            s.state = LifecycleState::Initializing;
            s.protocol_version = version;
            s.session_id = session_id;
            s.peer_info = Some(result.server_info);
            s.server_capabilities = Some(result.capabilities);
            s.instructions = result.instructions;
        });
    }

    fn on_request(&mut self, request: JsonRpcRequest, batch: Option<u64>) -> Dispatch {
        let id = request.id.clone();

        if request.method == INITIALIZE && self.role == Role::Server {
            return Dispatch::Reply(self.on_initialize(request));
        }
        if !self.state().is_ready() {
            debug!(method = %request.method, "request before initialization completed");
            return Dispatch::Reply(
                JsonRpcError::invalid_request(
                    Some(id),
                    format!("'{}' received before initialization completed", request.method),
                )
                .into(),
            );
        }
        if self.in_flight.contains_key(&id) {
            return Dispatch::Reply(
                JsonRpcError::invalid_request(Some(id), "Duplicate request id").into(),
            );
        }
        let Some(handler) = self.handlers.request(&request.method) else {
            return Dispatch::Reply(JsonRpcError::method_not_found(id, &request.method).into());
        };

        let cancellation = CancellationHandle::new();
        let context = RequestContext::new(
            id.clone(),
            request.method,
            self.snapshot.borrow().clone(),
            cancellation.clone(),
            self.handle.clone(),
        );
        let events = self.events_tx.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(request.params, context))
                .catch_unwind()
                .await;
            let response = match outcome {
                Ok(Ok(result)) => JsonRpcResponse::new(task_id.clone(), result).into(),
                Ok(Err(error)) => {
                    JsonRpcError::new(Some(task_id.clone()), error.to_error_object()).into()
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(id = %task_id, message = %message, "request handler panicked");
                    JsonRpcError::internal_error(Some(task_id.clone()), Some(message)).into()
                }
            };
            let _ = events.send(ActorEvent::HandlerFinished {
                id: task_id,
                response,
            });
        });

        self.in_flight.insert(
            id,
            InFlight {
                cancellation,
                abort: task.abort_handle(),
                batch,
            },
        );
        Dispatch::Spawned
    }

    fn on_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcEnvelope {
        let id = request.id;
        if matches!(self.state(), LifecycleState::Initializing | LifecycleState::Ready) {
            return JsonRpcError::invalid_request(Some(id), "Server already initialized").into();
        }
        let params = match decode_params::<Initialize>(request.params) {
            Ok(params) => params,
            Err(error) => return JsonRpcError::new(Some(id), error).into(),
        };

        let version = negotiate_version(&params.protocol_version);
        let identity = self.identity.clone().unwrap_or_else(|| ServerIdentity {
            info: Implementation::new("strand-mcp", env!("CARGO_PKG_VERSION")),
            capabilities: ServerCapabilities::default(),
            instructions: None,
        });
        self.transport.set_protocol_version(version.as_str());
        let session_id = self.transport.session_id();

        info!(
            client = %params.client_info.name,
            requested = %params.protocol_version,
            negotiated = %version,
            "initialize"
        );
        self.snapshot.send_modify(|s| {
            s.state = LifecycleState::Initializing;
            s.protocol_version = Some(version);
            s.session_id = session_id;
            s.peer_info = Some(params.client_info);
            s.client_capabilities = Some(params.capabilities);
            s.server_capabilities = Some(identity.capabilities.clone());
            s.instructions = identity.instructions.clone();
        });

        let mut result = InitializeResult::new(version, identity.capabilities, identity.info);
        result.instructions = identity.instructions;
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::new(id, value).into(),
            Err(e) => JsonRpcError::internal_error(Some(id), Some(e.to_string())).into(),
        }
    }

    fn on_notification(&mut self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            NOTIFICATION_CANCELLED => self.on_cancelled(notification.params.clone()),
            NOTIFICATION_INITIALIZED if self.role == Role::Server => {
                if self.state() == LifecycleState::Initializing {
                    self.set_state(LifecycleState::Ready);
                    info!("session ready");
                } else {
                    debug!(state = ?self.state(), "ignoring unexpected initialized notification");
                }
            }
            _ => {}
        }

        match self.handlers.notification(&notification.method) {
            Some(handler) => {
                let session = self.snapshot.borrow().clone();
                let method = notification.method;
                let params = notification.params;
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(params, session).await {
                        warn!(method = %method, error = %e, "notification handler failed");
                    }
                });
            }
            None => debug!(method = %notification.method, "no handler for notification"),
        }
    }

    fn on_cancelled(&mut self, params: Option<Value>) {
        let params = match decode_notification_params::<Cancelled>(params) {
            Ok(params) => params,
            Err(e) => {
                debug!(error = %e, "ignoring malformed cancellation");
                return;
            }
        };
        let Some(flight) = self.in_flight.remove(&params.request_id) else {
            debug!(id = %params.request_id, "cancellation for unknown request");
            return;
        };
        info!(
            id = %params.request_id,
            reason = params.reason.as_deref().unwrap_or(""),
            "peer cancelled request"
        );
        flight.cancellation.cancel();
        flight.abort.abort();
        if let Some(key) = flight.batch {
            self.complete_batch_entry(key, None);
        }
    }

    async fn shutdown(&mut self) {
        for (_, call) in self.pending.drain() {
            let _ = call.waiter.send(Err(McpError::ConnectionClosed));
        }
        for (_, flight) in self.in_flight.drain() {
            flight.cancellation.cancel();
            flight.abort.abort();
        }
        self.batches.clear();
        self.set_state(LifecycleState::Closed);

        // Let already-queued frames reach the transport before disconnecting
        self.writes.take();
        if let Some(writer) = self.writer.take()
            && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err()
        {
            warn!("writer did not drain before shutdown");
        }
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "transport disconnect failed");
        }
        self.closed.cancel();
        info!(role = %self.role, "connection closed");
    }
}

async fn run_writer(
    transport: Arc<dyn Transport>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    events: mpsc::UnboundedSender<ActorEvent>,
) {
    while let Some(job) = jobs.recv().await {
        let result = match &job.related {
            Some(related) => transport.send_related(job.frame, related).await,
            None => transport.send(job.frame).await,
        };
        if let Err(error) = result {
            warn!(error = %error, "transport send failed");
            if !job.ids.is_empty() {
                let _ = events.send(ActorEvent::SendFailed { ids: job.ids, error });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
