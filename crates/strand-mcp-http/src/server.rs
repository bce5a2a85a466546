//! HTTP server hosting an [`McpServer`] over Streamable HTTP

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use strand_json_rpc::error_codes::{CONNECTION_ERROR, SESSION_NOT_FOUND};
use strand_mcp_core::{Connection, McpServer, Transport};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::{HttpServerConfig, SessionMode, StreamableHttpConfig};
use crate::event_store::EventStore;
use crate::protocol::{SessionHeader, session_header};
use crate::responses::{HttpBody, json_rpc_error_response, status_response};
use crate::security::DnsRebindingProtection;
use crate::transport::{StreamableHttpServerTransport, method_not_allowed};
use crate::{HttpMcpError, Result};

struct Session {
    transport: StreamableHttpServerTransport,
    connection: Connection,
}

struct ServerInner {
    config: HttpServerConfig,
    mcp: McpServer,
    sessions: Mutex<HashMap<String, Session>>,
    /// Stateless mode shares one engine across all requests
    stateless: OnceCell<Session>,
}

/// Streamable HTTP server: one transport and connection per session
#[derive(Clone)]
pub struct StreamableHttpServer {
    inner: Arc<ServerInner>,
}

impl StreamableHttpServer {
    pub fn builder(mcp: McpServer) -> StreamableHttpServerBuilder {
        StreamableHttpServerBuilder::new(mcp)
    }

    pub fn new(config: HttpServerConfig, mcp: McpServer) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                mcp,
                sessions: Mutex::new(HashMap::new()),
                stateless: OnceCell::new(),
            }),
        }
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.inner.config
    }

    /// Number of live stateful sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Bind the configured address and serve until an accept error
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.inner.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Streamable HTTP MCP server listening on {}", local_addr);
        info!("MCP endpoint available at: {}", self.inner.config.mcp_path);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("New connection from {}", peer_addr);

            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }

    /// Route one HTTP request to its session
    pub async fn handle<B>(&self, request: Request<B>) -> Response<HttpBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if request.uri().path() != self.inner.config.mcp_path {
            return status_response(StatusCode::NOT_FOUND);
        }
        let transport_config = &self.inner.config.transport;
        if let Err(message) = transport_config.dns_rebinding.validate(request.headers()) {
            warn!(reason = %message, "rejected by DNS rebinding protection");
            return json_rpc_error_response(StatusCode::FORBIDDEN, CONNECTION_ERROR, message, None);
        }

        if transport_config.session_mode == SessionMode::Stateless {
            return match self.stateless_session().await {
                Ok(transport) => transport.handle_request(request).await,
                Err(e) => internal_error(&e),
            };
        }

        match session_header(request.headers()) {
            SessionHeader::Single(id) => {
                let transport = self
                    .inner
                    .sessions
                    .lock()
                    .get(&id)
                    .map(|session| session.transport.clone());
                match transport {
                    Some(transport) => {
                        let terminating = request.method() == Method::DELETE;
                        let response = transport.handle_request(request).await;
                        if terminating && response.status().is_success() {
                            self.inner.sessions.lock().remove(&id);
                            info!(session_id = %id, "session terminated");
                        }
                        response
                    }
                    None => {
                        debug!(session_id = %id, "request for unknown session");
                        json_rpc_error_response(
                            StatusCode::NOT_FOUND,
                            SESSION_NOT_FOUND,
                            "Session not found",
                            None,
                        )
                    }
                }
            }
            SessionHeader::Invalid => json_rpc_error_response(
                StatusCode::BAD_REQUEST,
                CONNECTION_ERROR,
                "Bad Request: Mcp-Session-Id header must be a single value",
                None,
            ),
            SessionHeader::Missing => match *request.method() {
                Method::POST => self.start_session(request).await,
                Method::GET | Method::DELETE => json_rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    CONNECTION_ERROR,
                    "Bad Request: Mcp-Session-Id header is required",
                    None,
                ),
                _ => method_not_allowed(),
            },
        }
    }

    /// A POST without a session must be an initialize request; the new
    /// session is kept only if its transport issued a session id
    async fn start_session<B>(&self, request: Request<B>) -> Response<HttpBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let transport = StreamableHttpServerTransport::new(self.inner.config.transport.clone());
        let connection = match self.inner.mcp.serve(transport.clone()).await {
            Ok(connection) => connection,
            Err(e) => return internal_error(&HttpMcpError::Mcp(e)),
        };

        let response = transport.handle_request(request).await;
        let Some(session_id) = transport.session_id() else {
            let _ = transport.disconnect().await;
            return response;
        };

        self.inner.sessions.lock().insert(
            session_id.clone(),
            Session {
                transport,
                connection: connection.clone(),
            },
        );
        info!(session_id = %session_id, "session created");

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            connection.closed().await;
            if let Some(inner) = inner.upgrade() {
                inner.sessions.lock().remove(&session_id);
                info!(session_id = %session_id, "session removed");
            }
        });
        response
    }

    async fn stateless_session(&self) -> Result<StreamableHttpServerTransport> {
        let session = self
            .inner
            .stateless
            .get_or_try_init(|| async {
                let transport =
                    StreamableHttpServerTransport::new(self.inner.config.transport.clone());
                let connection = self.inner.mcp.serve(transport.clone()).await?;
                Ok::<_, HttpMcpError>(Session { transport, connection })
            })
            .await?;
        Ok(session.transport.clone())
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let sessions: Vec<Session> = self
            .inner
            .sessions
            .lock()
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.connection.close().await;
        }
        if let Some(session) = self.inner.stateless.get() {
            session.connection.close().await;
        }
    }
}

impl std::fmt::Debug for StreamableHttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpServer")
            .field("bind_address", &self.inner.config.bind_address)
            .field("mcp_path", &self.inner.config.mcp_path)
            .field("sessions", &self.session_count())
            .finish()
    }
}

fn internal_error(error: &HttpMcpError) -> Response<HttpBody> {
    error!(error = %error, "failed to start MCP session");
    json_rpc_error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        CONNECTION_ERROR,
        error.to_string(),
        None,
    )
}

/// Builder for [`StreamableHttpServer`]
pub struct StreamableHttpServerBuilder {
    mcp: McpServer,
    config: HttpServerConfig,
}

impl StreamableHttpServerBuilder {
    pub fn new(mcp: McpServer) -> Self {
        Self {
            mcp,
            config: HttpServerConfig::default(),
        }
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn mcp_path(mut self, path: impl Into<String>) -> Self {
        self.config.mcp_path = path.into();
        self
    }

    /// Answer POSTs with a single JSON body instead of an SSE stream
    pub fn json_response(mut self, enable: bool) -> Self {
        self.config.transport.enable_json_response = enable;
        self
    }

    pub fn stateless(mut self) -> Self {
        self.config.transport.session_mode = SessionMode::Stateless;
        self
    }

    /// Enables resumability through `Last-Event-ID`
    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.config.transport.event_store = Some(store);
        self
    }

    pub fn dns_rebinding(mut self, protection: DnsRebindingProtection) -> Self {
        self.config.transport.dns_rebinding = protection;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.transport.max_body_size = size;
        self
    }

    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.transport.keepalive_interval = interval;
        self
    }

    pub fn transport_config(mut self, transport: StreamableHttpConfig) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn build(self) -> StreamableHttpServer {
        StreamableHttpServer::new(self.config, self.mcp)
    }
}
