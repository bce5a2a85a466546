//! The correlation engine.
//!
//! A [`Connection`] is a cheap, cloneable handle to a single actor task that
//! owns all mutable session state: the pending-request table, in-flight
//! inbound handlers, handler registry and lifecycle. Handles talk to the actor
//! through an unbounded command queue, so enqueuing never blocks and the
//! order of calls made from one task is the order they reach the wire. A
//! separate writer task performs transport sends and reports failures back
//! to the actor.

mod actor;
mod batch;
mod handler;
mod lifecycle;
mod pending;

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use strand_json_rpc::{
    JsonRpcEnvelope, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest, Method,
    NotificationMethod, RequestId, encode_params,
};
use strand_mcp_protocol::methods::{required_client_feature, required_server_feature};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

pub use batch::Batch;
pub use handler::{
    FunctionHandler, FunctionNotificationHandler, NotificationHandler, RequestContext,
    RequestHandler, TypedHandler, TypedNotificationHandler,
};
pub use lifecycle::{LifecycleState, Role, SessionSnapshot};
pub use pending::ResponseFuture;

pub(crate) use handler::HandlerRegistry;
pub(crate) use lifecycle::ServerIdentity;

use crate::cancellation::CancellationHandle;
use crate::config::{ConnectionConfig, IdStrategy};
use crate::error::{McpError, McpResult};
use crate::transport::Transport;
use pending::Waiter;

pub(crate) enum CancelReason {
    /// `ResponseFuture::cancel` or a timeout
    Explicit(Option<String>),
    /// The future was dropped unresolved
    Dropped,
}

pub(crate) struct Outbound {
    pub envelope: JsonRpcEnvelope,
    pub waiter: Option<Waiter>,
    pub related: Option<RequestId>,
}

pub(crate) enum Command {
    Send(Outbound),
    Batch(Vec<Outbound>),
    Cancel {
        id: RequestId,
        reason: CancelReason,
    },
    RegisterRequest {
        method: String,
        handler: Arc<dyn RequestHandler>,
        reply: oneshot::Sender<McpResult<()>>,
    },
    RegisterNotification {
        method: String,
        handler: Arc<dyn NotificationHandler>,
        reply: oneshot::Sender<McpResult<()>>,
    },
    Close {
        reply: Option<oneshot::Sender<()>>,
    },
}

struct Shared {
    role: Role,
    config: ConnectionConfig,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    next_id: AtomicI64,
    closed: CancellationHandle,
}

/// Handle to a running session
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Connect the transport and spawn the actor and writer tasks
    pub(crate) async fn start(
        role: Role,
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        handlers: HandlerRegistry,
        identity: Option<ServerIdentity>,
    ) -> McpResult<Self> {
        transport.connect().await?;
        let inbound = transport.receive()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(role));
        let closed = CancellationHandle::new();

        let connection = Connection {
            shared: Arc::new(Shared {
                role,
                config,
                commands: commands_tx,
                snapshot: snapshot_rx,
                next_id: AtomicI64::new(1),
                closed: closed.clone(),
            }),
        };

        actor::spawn(actor::ActorParts {
            role,
            transport,
            handle: connection.clone(),
            commands: commands_rx,
            inbound,
            handlers,
            snapshot: snapshot_tx,
            identity,
            closed,
        });

        Ok(connection)
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        match self.shared.config.id_strategy {
            IdStrategy::Random => RequestId::random(),
            IdStrategy::Sequential => {
                RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
            }
        }
    }

    pub(crate) fn send_command(&self, command: Command) -> McpResult<()> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| McpError::ConnectionClosed)
    }

    pub(crate) fn response_slot(&self, id: RequestId) -> (Waiter, ResponseFuture) {
        let (sender, receiver) = oneshot::channel();
        (
            sender,
            ResponseFuture::new(id, receiver, self.shared.commands.clone()),
        )
    }

    /// Strict mode: refuse methods the peer has not advertised
    pub(crate) fn check_capability(&self, method: &str) -> McpResult<()> {
        if !self.shared.config.strict_capabilities {
            return Ok(());
        }
        let snapshot = self.shared.snapshot.borrow();
        let missing = match self.shared.role {
            Role::Client => required_server_feature(method)
                .filter(|feature| {
                    !snapshot
                        .server_capabilities
                        .as_ref()
                        .is_some_and(|caps| caps.has(*feature))
                })
                .map(|feature| format!("Server does not support {:?} (required for {})", feature, method)),
            Role::Server => required_client_feature(method)
                .filter(|feature| {
                    !snapshot
                        .client_capabilities
                        .as_ref()
                        .is_some_and(|caps| caps.has(*feature))
                })
                .map(|feature| format!("Client does not support {:?} (required for {})", feature, method)),
        };
        match missing {
            Some(message) => {
                debug!(method, "refusing call in strict mode");
                Err(McpError::rpc(JsonRpcErrorCode::MethodNotFound, message))
            }
            None => Ok(()),
        }
    }

    /// Issue a request with raw JSON params
    pub fn call(&self, method: impl Into<String>, params: Option<Value>) -> ResponseFuture {
        self.call_related(method.into(), params, None)
    }

    pub(crate) fn call_related(
        &self,
        method: String,
        params: Option<Value>,
        related: Option<RequestId>,
    ) -> ResponseFuture {
        let id = self.next_request_id();
        if let Err(error) = self.check_capability(&method) {
            return ResponseFuture::ready(id, Err(error));
        }
        let (waiter, future) = self.response_slot(id.clone());
        // On failure the waiter is dropped with the command, which resolves
        // the future with ConnectionClosed.
        let _ = self.send_command(Command::Send(Outbound {
            envelope: JsonRpcRequest::new(id, method, params).into(),
            waiter: Some(waiter),
            related,
        }));
        future
    }

    /// Typed call honouring the configured request timeout
    pub async fn request<M: Method>(&self, params: M::Params) -> McpResult<M::Result> {
        let params = encode_params(M::PARAMS, &params)?;
        let value = self.with_timeout(self.call(M::NAME, params)).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::InvalidResponse(format!("{}: {}", M::NAME, e)))
    }

    /// Await a response, cancelling it if the configured timeout elapses
    pub async fn with_timeout(&self, future: ResponseFuture) -> McpResult<Value> {
        match self.shared.config.request_timeout {
            Some(limit) => Self::await_within(future, limit).await,
            None => future.await,
        }
    }

    /// Raw call with a per-call timeout overriding the configured one
    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        limit: Duration,
    ) -> McpResult<Value> {
        Self::await_within(self.call(method, params), limit).await
    }

    async fn await_within(mut future: ResponseFuture, limit: Duration) -> McpResult<Value> {
        match tokio::time::timeout(limit, &mut future).await {
            Ok(result) => result,
            Err(_) => {
                future.cancel_with_reason(Some(format!("Request timed out after {:?}", limit)));
                Err(McpError::Timeout(limit))
            }
        }
    }

    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<()> {
        self.notify_related(method, params, None)
    }

    pub(crate) fn notify_related(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        related: Option<RequestId>,
    ) -> McpResult<()> {
        self.send_command(Command::Send(Outbound {
            envelope: JsonRpcNotification::new(method, params).into(),
            waiter: None,
            related,
        }))
    }

    pub fn notify_typed<N: NotificationMethod>(&self, params: N::Params) -> McpResult<()> {
        let params = encode_params(N::PARAMS, &params)?;
        self.notify(N::NAME, params)
    }

    /// Start an explicit batch; it is sent when flushed or dropped
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Run `f` against a fresh batch and flush it afterwards
    pub fn with_batch<R>(&self, f: impl FnOnce(&mut Batch) -> R) -> McpResult<R> {
        let mut batch = self.batch();
        let result = f(&mut batch);
        batch.flush()?;
        Ok(result)
    }

    /// Add a request handler to a running connection; fails if the method
    /// already has one
    pub async fn register_request_handler(
        &self,
        method: impl Into<String>,
        handler: impl RequestHandler + 'static,
    ) -> McpResult<()> {
        let (reply, result) = oneshot::channel();
        self.send_command(Command::RegisterRequest {
            method: method.into(),
            handler: Arc::new(handler),
            reply,
        })?;
        result.await.map_err(|_| McpError::ConnectionClosed)?
    }

    pub async fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) -> McpResult<()> {
        let (reply, result) = oneshot::channel();
        self.send_command(Command::RegisterNotification {
            method: method.into(),
            handler: Arc::new(handler),
            reply,
        })?;
        result.await.map_err(|_| McpError::ConnectionClosed)?
    }

    /// Typed request handler registered on a running connection
    pub async fn on_request<M, F, Fut>(&self, handler_fn: F) -> McpResult<()>
    where
        M: Method + 'static,
        F: Fn(M::Params, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<M::Result>> + Send + 'static,
    {
        self.register_request_handler(M::NAME, TypedHandler::<M, F>::new(handler_fn))
            .await
    }

    pub fn session(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.snapshot.borrow().state
    }

    pub fn session_changes(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.clone()
    }

    /// Wait until the handshake completed; errors if the connection closes
    /// first
    pub async fn ready(&self) -> McpResult<()> {
        let mut changes = self.shared.snapshot.clone();
        let snapshot = changes
            .wait_for(|s| matches!(s.state, LifecycleState::Ready | LifecycleState::Closed))
            .await
            .map_err(|_| McpError::ConnectionClosed)?;
        match snapshot.state {
            LifecycleState::Ready => Ok(()),
            _ => Err(McpError::ConnectionClosed),
        }
    }

    /// Stop the engine: pending calls fail with `ConnectionClosed`, queued
    /// writes are flushed, the transport is disconnected
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.send_command(Command::Close { reply: Some(reply) }).is_ok() {
            let _ = done.await;
        }
        self.shared.closed.cancelled().await;
    }

    /// Request shutdown without waiting for it
    pub(crate) fn close_in_background(&self) {
        let _ = self.send_command(Command::Close { reply: None });
    }

    /// Resolves once the engine has stopped
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.shared.role)
            .field("state", &self.lifecycle())
            .finish()
    }
}
