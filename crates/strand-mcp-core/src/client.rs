//! MCP client: performs the `initialize` handshake over a transport and
//! exposes typed calls on the resulting session.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strand_json_rpc::{EmptyParams, Method};
use strand_mcp_protocol::{
    ClientCapabilities, Implementation, Initialize, InitializeRequest, Initialized, McpVersion,
    Ping, ServerCapabilities,
};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{
    Batch, Connection, FunctionHandler, FunctionNotificationHandler, HandlerRegistry,
    NotificationHandler, RequestContext, RequestHandler, ResponseFuture, Role, SessionSnapshot,
    TypedHandler,
};
use crate::error::{McpError, McpResult};
use crate::transport::Transport;

/// Builder for [`McpClient`]
pub struct McpClientBuilder {
    info: Implementation,
    capabilities: ClientCapabilities,
    config: ConnectionConfig,
    protocol_version: Option<String>,
    handlers: HandlerRegistry,
}

impl McpClientBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            capabilities: ClientCapabilities::default(),
            config: ConnectionConfig::default(),
            protocol_version: None,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.info = self.info.with_title(title);
        self
    }

    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Refuse outbound calls the server did not advertise
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict_capabilities = strict;
        self
    }

    /// Version to request in `initialize`; defaults to the latest supported
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }

    /// Handle server-initiated requests (`sampling/createMessage`,
    /// `roots/list`, ...). A later registration for the same method wins.
    pub fn request_handler(
        mut self,
        method: impl Into<String>,
        handler: impl RequestHandler + 'static,
    ) -> Self {
        // replace = true never fails
        let _ = self
            .handlers
            .insert_request(method.into(), Arc::new(handler), true);
        self
    }

    pub fn request_fn<F, Fut>(self, method: impl Into<String>, handler_fn: F) -> Self
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        self.request_handler(method, FunctionHandler::new(handler_fn))
    }

    pub fn on_request<M, F, Fut>(self, handler_fn: F) -> Self
    where
        M: Method + 'static,
        F: Fn(M::Params, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<M::Result>> + Send + 'static,
    {
        self.request_handler(M::NAME, TypedHandler::<M, F>::new(handler_fn))
    }

    pub fn notification_handler(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        let _ = self
            .handlers
            .insert_notification(method.into(), Arc::new(handler), true);
        self
    }

    pub fn notification_fn<F, Fut>(self, method: impl Into<String>, handler_fn: F) -> Self
    where
        F: Fn(Option<Value>, SessionSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<()>> + Send + 'static,
    {
        self.notification_handler(method, FunctionNotificationHandler::new(handler_fn))
    }

    pub async fn connect(self, transport: impl Transport + 'static) -> McpResult<McpClient> {
        self.connect_arc(Arc::new(transport)).await
    }

    /// Connect the transport, run the handshake and return a ready client.
    /// The connection is closed again if the handshake fails.
    pub async fn connect_arc(self, transport: Arc<dyn Transport>) -> McpResult<McpClient> {
        let connection =
            Connection::start(Role::Client, transport, self.config, self.handlers, None).await?;

        let mut request = InitializeRequest::new(self.capabilities, self.info);
        if let Some(version) = self.protocol_version {
            request = request.with_protocol_version(version);
        }

        let result = match connection.request::<Initialize>(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "initialize failed");
                connection.close().await;
                return Err(e);
            }
        };

        if result.negotiated_version().is_none() {
            warn!(version = %result.protocol_version, "server chose an unsupported protocol version");
            connection.close().await;
            return Err(McpError::UnsupportedProtocolVersion(result.protocol_version));
        }

        connection.notify_typed::<Initialized>(EmptyParams::default())?;
        connection.ready().await?;

        info!(
            server = %result.server_info.name,
            server_version = %result.server_info.version,
            protocol_version = %result.protocol_version,
            "client session ready"
        );
        Ok(McpClient { connection })
    }
}

/// A connected, initialized client session
pub struct McpClient {
    connection: Connection,
}

impl McpClient {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpClientBuilder {
        McpClientBuilder::new(name, version)
    }

    pub async fn ping(&self) -> McpResult<()> {
        self.connection.request::<Ping>(EmptyParams::default()).await?;
        Ok(())
    }

    /// Typed request with the configured timeout
    pub async fn request<M: Method>(&self, params: M::Params) -> McpResult<M::Result> {
        self.connection.request::<M>(params).await
    }

    /// Raw request; the returned future cancels the request if dropped
    pub fn call(&self, method: impl Into<String>, params: Option<Value>) -> ResponseFuture {
        self.connection.call(method, params)
    }

    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        limit: Duration,
    ) -> McpResult<Value> {
        self.connection.call_with_timeout(method, params, limit).await
    }

    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<()> {
        self.connection.notify(method, params)
    }

    pub fn batch(&self) -> Batch {
        self.connection.batch()
    }

    pub fn with_batch<R>(&self, f: impl FnOnce(&mut Batch) -> R) -> McpResult<R> {
        self.connection.with_batch(f)
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.connection.session().peer_info
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.connection.session().server_capabilities
    }

    pub fn instructions(&self) -> Option<String> {
        self.connection.session().instructions
    }

    pub fn protocol_version(&self) -> Option<McpVersion> {
        self.connection.session().protocol_version
    }

    pub fn session_id(&self) -> Option<String> {
        self.connection.session().session_id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn disconnect(&self) {
        self.connection.close().await;
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if !self.connection.is_closed() {
            self.connection.close_in_background();
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("connection", &self.connection)
            .finish()
    }
}
