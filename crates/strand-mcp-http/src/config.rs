//! Configuration for the Streamable HTTP server and client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use strand_mcp_core::ReconnectConfig;
use url::Url;

use crate::event_store::EventStore;
use crate::security::DnsRebindingProtection;

/// Default cap on POST bodies
pub const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Issue an `Mcp-Session-Id` on initialize and require it afterwards
    #[default]
    Stateful,
    /// No session ids are issued or validated
    Stateless,
}

/// Behaviour of one server-side transport
#[derive(Clone)]
pub struct StreamableHttpConfig {
    pub session_mode: SessionMode,
    /// Answer POSTs with a JSON body instead of an SSE stream
    pub enable_json_response: bool,
    pub event_store: Option<Arc<dyn EventStore>>,
    pub dns_rebinding: DnsRebindingProtection,
    pub max_body_size: usize,
    /// Interval of `: keepalive` comments on idle SSE streams; `None` disables them
    pub keepalive_interval: Option<Duration>,
    /// Buffered events per SSE stream
    pub channel_buffer_size: usize,
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        Self {
            session_mode: SessionMode::Stateful,
            enable_json_response: false,
            event_store: None,
            dns_rebinding: DnsRebindingProtection::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            keepalive_interval: Some(Duration::from_secs(30)),
            channel_buffer_size: 1000,
        }
    }
}

impl StreamableHttpConfig {
    pub fn stateless(mut self) -> Self {
        self.session_mode = SessionMode::Stateless;
        self
    }

    pub fn with_json_response(mut self, enable: bool) -> Self {
        self.enable_json_response = enable;
        self
    }

    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn with_dns_rebinding(mut self, protection: DnsRebindingProtection) -> Self {
        self.dns_rebinding = protection;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }
}

impl std::fmt::Debug for StreamableHttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpConfig")
            .field("session_mode", &self.session_mode)
            .field("enable_json_response", &self.enable_json_response)
            .field("event_store", &self.event_store.is_some())
            .field("dns_rebinding", &self.dns_rebinding)
            .field("max_body_size", &self.max_body_size)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("channel_buffer_size", &self.channel_buffer_size)
            .finish()
    }
}

/// Configuration for the HTTP MCP server
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path for MCP endpoint
    pub mcp_path: String,
    pub transport: StreamableHttpConfig,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            mcp_path: "/mcp".to_string(),
            transport: StreamableHttpConfig::default(),
        }
    }
}

/// Client-side transport configuration
#[derive(Debug, Clone)]
pub struct StreamableHttpClientConfig {
    pub endpoint: Url,
    /// Timeout for each HTTP exchange, excluding streamed SSE bodies
    pub request_timeout: Option<Duration>,
    /// Open the standalone GET stream once the session is initialized
    pub open_standalone_stream: bool,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
    /// Retry policy for the standalone GET stream
    pub reconnect: ReconnectConfig,
}

impl StreamableHttpClientConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            request_timeout: Some(Duration::from_secs(30)),
            open_standalone_stream: true,
            headers: Vec::new(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn parse(endpoint: &str) -> crate::Result<Self> {
        Ok(Self::new(Url::parse(endpoint)?))
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_standalone_stream(mut self, enable: bool) -> Self {
        self.open_standalone_stream = enable;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}
