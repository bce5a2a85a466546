//! DNS-rebinding protection for locally bound servers

use http::HeaderMap;
use http::header::{HOST, ORIGIN};
use serde::{Deserialize, Serialize};

/// Allow-lists for the `Host` and `Origin` headers.
///
/// An empty list leaves that header unchecked. When a list is set, a request
/// without the header is rejected as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRebindingProtection {
    pub enabled: bool,
    pub allowed_hosts: Vec<String>,
    pub allowed_origins: Vec<String>,
}

impl DnsRebindingProtection {
    pub fn new(allowed_hosts: Vec<String>, allowed_origins: Vec<String>) -> Self {
        Self {
            enabled: true,
            allowed_hosts,
            allowed_origins,
        }
    }

    /// Accept only loopback hosts and origins on `port`
    pub fn localhost(port: u16) -> Self {
        let hosts = ["127.0.0.1", "localhost", "[::1]"];
        Self::new(
            hosts.iter().map(|h| format!("{}:{}", h, port)).collect(),
            hosts.iter().map(|h| format!("http://{}:{}", h, port)).collect(),
        )
    }

    /// The rejection message, if the request must be refused
    pub fn validate(&self, headers: &HeaderMap) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if !self.allowed_hosts.is_empty() {
            let host = headers.get(HOST).and_then(|h| h.to_str().ok());
            if !host.is_some_and(|h| self.allowed_hosts.iter().any(|a| a == h)) {
                return Err(format!("Invalid Host header: {}", host.unwrap_or("undefined")));
            }
        }
        if !self.allowed_origins.is_empty() {
            let origin = headers.get(ORIGIN).and_then(|h| h.to_str().ok());
            if !origin.is_some_and(|o| self.allowed_origins.iter().any(|a| a == o)) {
                return Err(format!(
                    "Invalid Origin header: {}",
                    origin.unwrap_or("undefined")
                ));
            }
        }
        Ok(())
    }
}
