//! Inbound request and notification handlers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use strand_json_rpc::{Method, NotificationMethod, RequestId, decode_notification_params, decode_params};
use tracing::debug;

use super::Connection;
use super::lifecycle::SessionSnapshot;
use crate::cancellation::CancellationHandle;
use crate::error::{McpError, McpResult};

/// Context handed to a request handler.
///
/// Carries the request id, a snapshot of the session, a cancellation signal
/// that fires when the peer sends `notifications/cancelled`, and a handle to
/// the connection for sending related traffic.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: String,
    pub session: SessionSnapshot,
    cancellation: CancellationHandle,
    connection: Connection,
}

impl RequestContext {
    pub(crate) fn new(
        request_id: RequestId,
        method: String,
        session: SessionSnapshot,
        cancellation: CancellationHandle,
        connection: Connection,
    ) -> Self {
        Self {
            request_id,
            method,
            session,
            cancellation,
            connection,
        }
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Notification associated with this request (progress, logging).
    /// Streamable HTTP delivers it on the request's own stream.
    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<()> {
        self.connection
            .notify_related(method, params, Some(self.request_id.clone()))
    }

    /// Request to the peer issued on behalf of this request
    pub fn request(&self, method: impl Into<String>, params: Option<Value>) -> super::ResponseFuture {
        self.connection
            .call_related(method.into(), params, Some(self.request_id.clone()))
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handles one inbound request method
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Result value on success. `McpError::Rpc` keeps its code; every other
    /// error is reported to the peer as `InternalError` with its text.
    async fn handle(&self, params: Option<Value>, context: RequestContext) -> McpResult<Value>;
}

/// Handles one inbound notification method
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>, session: SessionSnapshot) -> McpResult<()>;
}

/// A closure-based request handler over raw JSON params
pub struct FunctionHandler<F> {
    handler_fn: F,
}

impl<F, Fut> FunctionHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut> RequestHandler for FunctionHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    async fn handle(&self, params: Option<Value>, context: RequestContext) -> McpResult<Value> {
        (self.handler_fn)(params, context).await
    }
}

/// A closure-based handler for a typed [`Method`]; params are decoded (and
/// rejected with `InvalidParams`) before the closure runs.
pub struct TypedHandler<M, F> {
    handler_fn: F,
    _method: PhantomData<fn() -> M>,
}

impl<M, F, Fut> TypedHandler<M, F>
where
    M: Method + 'static,
    F: Fn(M::Params, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<M::Result>> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self {
            handler_fn,
            _method: PhantomData,
        }
    }
}

#[async_trait]
impl<M, F, Fut> RequestHandler for TypedHandler<M, F>
where
    M: Method + 'static,
    F: Fn(M::Params, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<M::Result>> + Send,
{
    async fn handle(&self, params: Option<Value>, context: RequestContext) -> McpResult<Value> {
        let params = decode_params::<M>(params)?;
        let result = (self.handler_fn)(params, context).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// A closure-based notification handler over raw JSON params
pub struct FunctionNotificationHandler<F> {
    handler_fn: F,
}

impl<F, Fut> FunctionNotificationHandler<F>
where
    F: Fn(Option<Value>, SessionSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<()>> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut> NotificationHandler for FunctionNotificationHandler<F>
where
    F: Fn(Option<Value>, SessionSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<()>> + Send,
{
    async fn handle(&self, params: Option<Value>, session: SessionSnapshot) -> McpResult<()> {
        (self.handler_fn)(params, session).await
    }
}

/// A closure-based handler for a typed [`NotificationMethod`]
pub struct TypedNotificationHandler<N, F> {
    handler_fn: F,
    _method: PhantomData<fn() -> N>,
}

impl<N, F, Fut> TypedNotificationHandler<N, F>
where
    N: NotificationMethod + 'static,
    F: Fn(N::Params, SessionSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<()>> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self {
            handler_fn,
            _method: PhantomData,
        }
    }
}

#[async_trait]
impl<N, F, Fut> NotificationHandler for TypedNotificationHandler<N, F>
where
    N: NotificationMethod + 'static,
    F: Fn(N::Params, SessionSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<()>> + Send,
{
    async fn handle(&self, params: Option<Value>, session: SessionSnapshot) -> McpResult<()> {
        let params = decode_notification_params::<N>(params)?;
        (self.handler_fn)(params, session).await
    }
}

struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    async fn handle(&self, _params: Option<Value>, _context: RequestContext) -> McpResult<Value> {
        Ok(Value::Object(Default::default()))
    }
}

/// Handlers keyed by method name
#[derive(Clone)]
pub(crate) struct HandlerRegistry {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    /// Registry with the built-in `ping` responder
    pub fn new() -> Self {
        let mut requests: HashMap<String, Arc<dyn RequestHandler>> = HashMap::new();
        requests.insert(strand_mcp_protocol::methods::PING.to_string(), Arc::new(PingHandler));
        Self {
            requests,
            notifications: HashMap::new(),
        }
    }

    /// During bootstrap (`replace = true`) a later registration overrides an
    /// earlier one; once the connection runs, duplicates are refused.
    pub fn insert_request(
        &mut self,
        method: String,
        handler: Arc<dyn RequestHandler>,
        replace: bool,
    ) -> McpResult<()> {
        if !replace && self.requests.contains_key(&method) {
            return Err(McpError::DuplicateHandler(method));
        }
        debug!(method = %method, "registered request handler");
        self.requests.insert(method, handler);
        Ok(())
    }

    pub fn insert_notification(
        &mut self,
        method: String,
        handler: Arc<dyn NotificationHandler>,
        replace: bool,
    ) -> McpResult<()> {
        if !replace && self.notifications.contains_key(&method) {
            return Err(McpError::DuplicateHandler(method));
        }
        debug!(method = %method, "registered notification handler");
        self.notifications.insert(method, handler);
        Ok(())
    }

    pub fn request(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests.get(method).cloned()
    }

    pub fn notification(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.get(method).cloned()
    }

    pub fn request_methods(&self) -> impl Iterator<Item = &str> {
        self.requests.keys().map(String::as_str)
    }
}
