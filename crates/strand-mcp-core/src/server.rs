//! MCP server definition. One [`McpServer`] can serve any number of
//! transports; each call to [`McpServer::serve`] runs an independent session.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use strand_json_rpc::{Method, NotificationMethod};
use strand_mcp_protocol::{Implementation, ServerCapabilities};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::{
    Connection, FunctionHandler, FunctionNotificationHandler, HandlerRegistry, NotificationHandler,
    RequestContext, RequestHandler, Role, ServerIdentity, SessionSnapshot, TypedHandler,
    TypedNotificationHandler,
};
use crate::error::McpResult;
use crate::transport::Transport;

struct ServerDefinition {
    identity: ServerIdentity,
    config: ConnectionConfig,
    handlers: HandlerRegistry,
}

#[derive(Clone)]
pub struct McpServer {
    definition: Arc<ServerDefinition>,
}

impl McpServer {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name, version)
    }

    pub fn info(&self) -> &Implementation {
        &self.definition.identity.info
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.definition.identity.capabilities
    }

    /// Registered request methods, including the built-in `ping`
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .definition
            .handlers
            .request_methods()
            .map(str::to_string)
            .collect();
        methods.sort();
        methods
    }

    pub async fn serve(&self, transport: impl Transport + 'static) -> McpResult<Connection> {
        self.serve_arc(Arc::new(transport)).await
    }

    /// Start a session on the transport. The returned connection becomes
    /// ready once the client completes the handshake.
    pub async fn serve_arc(&self, transport: Arc<dyn Transport>) -> McpResult<Connection> {
        debug!(
            server = %self.definition.identity.info.name,
            transport = %transport.transport_type(),
            "serving session"
        );
        Connection::start(
            Role::Server,
            transport,
            self.definition.config.clone(),
            self.definition.handlers.clone(),
            Some(self.definition.identity.clone()),
        )
        .await
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.definition.identity.info)
            .field("capabilities", &self.definition.identity.capabilities)
            .finish()
    }
}

/// Builder for MCP servers
pub struct McpServerBuilder {
    info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    config: ConnectionConfig,
    handlers: HandlerRegistry,
}

impl McpServerBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            capabilities: ServerCapabilities::default(),
            instructions: None,
            config: ConnectionConfig::default(),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.info = self.info.with_title(title);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Advertised capabilities, merged into anything set before
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities.merge(&capabilities);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Refuse server-initiated calls the client did not advertise
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict_capabilities = strict;
        self
    }

    pub fn request_handler(
        mut self,
        method: impl Into<String>,
        handler: impl RequestHandler + 'static,
    ) -> Self {
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

    /// Typed handler for `M`; params are decoded before the closure runs
    pub fn method<M, F, Fut>(self, handler_fn: F) -> Self
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

    pub fn on_notification<N, F, Fut>(self, handler_fn: F) -> Self
    where
        N: NotificationMethod + 'static,
        F: Fn(N::Params, SessionSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<()>> + Send + 'static,
    {
        self.notification_handler(N::NAME, TypedNotificationHandler::<N, F>::new(handler_fn))
    }

    pub fn build(self) -> McpServer {
        McpServer {
            definition: Arc::new(ServerDefinition {
                identity: ServerIdentity {
                    info: self.info,
                    capabilities: self.capabilities,
                    instructions: self.instructions,
                },
                config: self.config,
                handlers: self.handlers,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McpError;
    use crate::transport::InMemoryTransport;
    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    fn frame(value: Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    #[test]
    fn test_builtin_ping_listed() {
        let server = McpServer::builder("listing", "1.0.0")
            .request_fn("tools/list", |_params, _ctx| async { Ok(json!({"tools": []})) })
            .build();
        let methods = server.methods();
        assert!(methods.contains(&"ping".to_string()));
        assert!(methods.contains(&"tools/list".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_call_times_out_and_cancels() {
        let (server_end, peer) = InMemoryTransport::pair();
        peer.connect().await.unwrap();
        let mut inbound = peer.receive().unwrap();

        let connection = McpServer::builder("timeouts", "1.0.0")
            .build()
            .serve(server_end)
            .await
            .unwrap();

        peer.send(frame(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-11-25",
                "capabilities": {},
                "clientInfo": {"name": "peer", "version": "1.0.0"}
            }
        })))
        .await
        .unwrap();
        let reply: Value = serde_json::from_slice(&inbound.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"]["protocolVersion"], "2025-11-25");

        peer.send(frame(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
            .await
            .unwrap();
        connection.ready().await.unwrap();

        let result = connection
            .call_with_timeout("ping", None, Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(McpError::Timeout(limit)) if limit == Duration::from_secs(30)));

        let request: Value = serde_json::from_slice(&inbound.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(request["method"], "ping");
        let cancel: Value = serde_json::from_slice(&inbound.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(cancel["method"], "notifications/cancelled");
        assert_eq!(cancel["params"]["requestId"], request["id"]);
        assert!(
            cancel["params"]["reason"]
                .as_str()
                .unwrap()
                .starts_with("Request timed out")
        );
    }
}
