//! Server-side engine behaviour against a hand-driven client peer

mod test_helpers;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strand_mcp_core::prelude::*;
use strand_mcp_protocol::{EmptyResult, Ping};
use test_helpers::{handshake, initialize_request, serve_raw, wait_ready};
use tokio::sync::{Notify, mpsc};

const QUIET: Duration = Duration::from_millis(150);

fn echo_server() -> McpServerBuilder {
    McpServer::builder("engine-server", "2.0.0")
        .instructions("use echo")
        .request_fn("tools/call", |params, _ctx| async move {
            Ok(json!({"echo": params.unwrap_or_default()}))
        })
}

#[tokio::test]
async fn test_initialize_echoes_supported_version() {
    let (connection, mut peer) = serve_raw(echo_server().build()).await;

    let result = handshake(&mut peer, "2025-06-18").await;
    assert_eq!(result["protocolVersion"], "2025-06-18");
    assert_eq!(result["serverInfo"]["name"], "engine-server");
    assert_eq!(result["instructions"], "use echo");

    wait_ready(&connection).await;
    let session = connection.session();
    assert_eq!(session.protocol_version, Some(McpVersion::V2025_06_18));
    assert_eq!(session.peer_info.unwrap().name, "raw-client");
}

#[tokio::test]
async fn test_initialize_falls_back_to_latest_version() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;
    let result = handshake(&mut peer, "1999-01-01").await;
    assert_eq!(result["protocolVersion"], "2025-11-25");
}

#[tokio::test]
async fn test_requests_before_initialized_are_rejected() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["error"]["code"], -32600);

    // Still rejected between the initialize response and `initialized`
    peer.send(initialize_request(json!(2), "2025-11-25")).await;
    let _ = peer.recv().await;
    peer.send(json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn test_second_initialize_is_rejected() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(initialize_request(json!(9), "2025-11-25")).await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 9);
    assert_eq!(response["error"]["code"], -32600);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Server already initialized")
    );
}

#[tokio::test]
async fn test_dispatch_and_method_not_found() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": "a", "method": "tools/call", "params": {"x": 1}}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["id"], "a");
    assert_eq!(response["result"]["echo"], json!({"x": 1}));

    peer.send(json!({"jsonrpc": "2.0", "id": "b", "method": "resources/list"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["id"], "b");
    assert_eq!(response["error"]["code"], -32601);

    peer.send(json!({"jsonrpc": "2.0", "id": "c", "method": "ping"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn test_typed_method_rejects_bad_params() {
    let server = McpServer::builder("engine-server", "2.0.0")
        .method::<Ping, _, _>(|_params, _ctx| async move { Ok(EmptyResult::default()) })
        .build();
    assert!(server.methods().contains(&"ping".to_string()));
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": {"_meta": 5}}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let server = McpServer::builder("engine-server", "2.0.0")
        .request_fn("tools/call", |_params, _ctx| async move {
            if true {
                panic!("tool exploded");
            }
            Ok(json!({}))
        })
        .build();
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 5);
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(response["error"]["message"], "tool exploded");

    // The engine survives the panic
    peer.send(json!({"jsonrpc": "2.0", "id": 6, "method": "ping"}))
        .await;
    assert_eq!(peer.recv().await["id"], 6);
}

#[tokio::test]
async fn test_handler_errors_keep_their_code() {
    let server = McpServer::builder("engine-server", "2.0.0")
        .request_fn("tools/call", |_params, _ctx| async move {
            Err(McpError::invalid_params("missing 'name'"))
        })
        .request_fn("prompts/get", |_params, _ctx| async move {
            Err(McpError::Internal("database offline".to_string()))
        })
        .build();
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32602);

    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "prompts/get"}))
        .await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(response["error"]["message"], "database offline");
}

#[tokio::test]
async fn test_inbound_cancellation_stops_handler() {
    let started = Arc::new(Notify::new());
    let server = {
        let started = started.clone();
        McpServer::builder("engine-server", "2.0.0")
            .request_fn("tools/call", move |_params, ctx| {
                let started = started.clone();
                async move {
                    started.notify_one();
                    ctx.cancellation().cancelled().await;
                    Ok(json!({"finished": true}))
                }
            })
            .build()
    };
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": 11, "method": "tools/call"}))
        .await;
    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .unwrap();
    peer.send(json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": 11, "reason": "changed my mind"}
    }))
    .await;

    assert!(peer.recv_within(QUIET).await.is_none());

    // The id is free again
    peer.send(json!({"jsonrpc": "2.0", "id": 11, "method": "ping"}))
        .await;
    assert_eq!(peer.recv().await["result"], json!({}));
}

#[tokio::test]
async fn test_duplicate_in_flight_id_rejected() {
    let release = Arc::new(Notify::new());
    let server = {
        let release = release.clone();
        McpServer::builder("engine-server", "2.0.0")
            .request_fn("tools/call", move |_params, _ctx| {
                let release = release.clone();
                async move {
                    release.notified().await;
                    Ok(json!({"done": true}))
                }
            })
            .build()
    };
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call"}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call"}))
        .await;
    let duplicate = peer.recv().await;
    assert_eq!(duplicate["error"]["code"], -32600);

    release.notify_one();
    let response = peer.recv().await;
    assert_eq!(response["result"]["done"], true);
}

#[tokio::test]
async fn test_malformed_json_gets_parse_error() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send_raw("{\"jsonrpc\": \"2.0\", \"id\": ").await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["id"].is_null());

    peer.send_raw("[]").await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn test_inbound_batch_gets_one_reply() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!([
        {"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"n": 1}},
        {"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progressToken": 1, "progress": 1}},
        {"jsonrpc": "2.0", "id": 2, "method": "nope"},
        {"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"n": 3}}
    ]))
    .await;

    let reply = peer.recv().await;
    let entries = reply.as_array().expect("batch reply is an array");
    assert_eq!(entries.len(), 3);
    let by_id = |id: i64| entries.iter().find(|e| e["id"] == id).unwrap();
    assert_eq!(by_id(1)["result"]["echo"]["n"], 1);
    assert_eq!(by_id(2)["error"]["code"], -32601);
    assert_eq!(by_id(3)["result"]["echo"]["n"], 3);
}

#[tokio::test]
async fn test_notification_only_batch_gets_no_reply() {
    let (_connection, mut peer) = serve_raw(echo_server().build()).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!([
        {"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progressToken": 1, "progress": 1}}
    ]))
    .await;
    assert!(peer.recv_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_handler_can_call_back_into_client() {
    let server = McpServer::builder("engine-server", "2.0.0")
        .request_fn("tools/call", |_params, ctx| async move {
            ctx.notify("notifications/progress", Some(json!({"progressToken": "t", "progress": 50})))?;
            let roots = ctx.request("roots/list", None).await?;
            Ok(json!({"roots": roots["roots"]}))
        })
        .build();
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"}))
        .await;
    let progress = peer.recv().await;
    assert_eq!(progress["method"], "notifications/progress");
    let roots_request = peer.recv().await;
    assert_eq!(roots_request["method"], "roots/list");
    peer.respond(&roots_request, json!({"roots": [{"uri": "file:///a"}]}))
        .await;

    let response = peer.recv().await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["roots"][0]["uri"], "file:///a");
}

#[tokio::test]
async fn test_notification_handlers_run() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = McpServer::builder("engine-server", "2.0.0")
        .notification_fn("notifications/roots/list_changed", move |_params, session| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(session.state);
                Ok(())
            }
        })
        .build();
    let (_connection, mut peer) = serve_raw(server).await;
    let _ = handshake(&mut peer, "2025-11-25").await;

    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/roots/list_changed"}))
        .await;
    let state = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, LifecycleState::Ready);
}

#[tokio::test]
async fn test_client_disconnect_closes_connection() {
    let (connection, mut peer) = serve_raw(echo_server().build()).await;
    let _ = handshake(&mut peer, "2025-11-25").await;
    wait_ready(&connection).await;

    peer.close().await;
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .unwrap();
    assert_eq!(connection.lifecycle(), LifecycleState::Closed);
}
