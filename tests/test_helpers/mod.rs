//! Shared helpers for the engine and transport integration tests

#![allow(dead_code)]

use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use strand_mcp_core::prelude::*;
use strand_mcp_core::FrameStream;
use tracing_subscriber::EnvFilter;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One end of an in-memory pair driven by hand with raw JSON
pub struct RawPeer {
    transport: InMemoryTransport,
    inbound: FrameStream,
}

impl RawPeer {
    pub async fn new(transport: InMemoryTransport) -> Self {
        transport.connect().await.unwrap();
        let inbound = transport.receive().unwrap();
        Self { transport, inbound }
    }

    /// Next frame as JSON; panics if nothing arrives in time
    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.inbound.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer stream ended")
            .expect("transport error");
        serde_json::from_slice(&frame).expect("frame is not JSON")
    }

    /// Next frame if one arrives within `limit`
    pub async fn recv_within(&mut self, limit: Duration) -> Option<Value> {
        match tokio::time::timeout(limit, self.inbound.next()).await {
            Ok(Some(Ok(frame))) => serde_json::from_slice(&frame).ok(),
            _ => None,
        }
    }

    pub async fn send(&self, message: Value) {
        self.send_raw(&message.to_string()).await
    }

    pub async fn send_raw(&self, text: &str) {
        self.transport
            .send(Bytes::from(text.to_string()))
            .await
            .unwrap();
    }

    pub async fn respond(&self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
            .await
    }

    pub async fn close(&self) {
        self.transport.disconnect().await.unwrap();
    }
}

pub fn initialize_result(capabilities: Value) -> Value {
    json!({
        "protocolVersion": "2025-11-25",
        "capabilities": capabilities,
        "serverInfo": {"name": "raw-server", "version": "0.1.0"},
        "instructions": "be brief"
    })
}

pub fn initialize_request(id: Value, version: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": version,
            "capabilities": {},
            "clientInfo": {"name": "raw-client", "version": "0.1.0"}
        }
    })
}

/// Client over `transport` whose handshake is answered by `peer`
pub async fn connect_over(
    builder: McpClientBuilder,
    transport: impl Transport + 'static,
    peer: &mut RawPeer,
    capabilities: Value,
) -> McpClient {
    let connecting = tokio::spawn(builder.connect(transport));
    let init = peer.recv().await;
    assert_eq!(init["method"], "initialize");
    peer.respond(&init, initialize_result(capabilities)).await;
    let initialized = peer.recv().await;
    assert_eq!(initialized["method"], "notifications/initialized");
    connecting.await.unwrap().unwrap()
}

/// Client connected to a raw server peer with the handshake completed
pub async fn connect_client(builder: McpClientBuilder) -> (McpClient, RawPeer) {
    let (client_end, server_end) = InMemoryTransport::pair();
    let mut peer = RawPeer::new(server_end).await;
    let client = connect_over(builder, client_end, &mut peer, json!({})).await;
    (client, peer)
}

/// Server served over an in-memory pair, driven by a raw client peer
pub async fn serve_raw(server: McpServer) -> (Connection, RawPeer) {
    let (server_end, client_end) = InMemoryTransport::pair();
    let connection = server.serve(server_end).await.unwrap();
    let peer = RawPeer::new(client_end).await;
    (connection, peer)
}

/// Run the client side of the handshake by hand; returns the initialize result
pub async fn handshake(peer: &mut RawPeer, version: &str) -> Value {
    peer.send(initialize_request(json!("init"), version)).await;
    let response = peer.recv().await;
    assert_eq!(response["id"], "init");
    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    response["result"].clone()
}

pub async fn wait_ready(connection: &Connection) {
    let mut changes = connection.session_changes();
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            if changes.borrow_and_update().state.is_ready() {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("connection never became ready");
}
