//! McpClient over the Streamable HTTP client transport, end to end

mod test_helpers;

use serde_json::{Value, json};
use std::time::{Duration, Instant};
use strand_mcp_core::prelude::*;
use strand_mcp_http::{
    StreamableHttpClientConfig, StreamableHttpClientTransport, StreamableHttpServer,
    StreamableHttpServerBuilder,
};
use test_helpers::init_tracing;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn mcp_server() -> McpServer {
    McpServer::builder("http-e2e", "1.0.0")
        .capabilities(ServerCapabilities {
            tools: Some(Default::default()),
            ..Default::default()
        })
        .request_fn("tools/call", |params, ctx| async move {
            let params = params.unwrap_or_default();
            if params["name"] == "ask_roots" {
                ctx.notify(
                    "notifications/progress",
                    Some(json!({"progressToken": "roots", "progress": 1})),
                )?;
                let roots = ctx.request("roots/list", None).await?;
                return Ok(json!({"roots": roots["roots"]}));
            }
            if params["name"] == "slow" {
                tokio::time::sleep(Duration::from_secs(2)).await;
                return Ok(json!({"slow": true}));
            }
            Ok(json!({"echo": params["arguments"]}))
        })
        .build()
}

async fn start(
    configure: impl FnOnce(StreamableHttpServerBuilder) -> StreamableHttpServerBuilder,
) -> (String, StreamableHttpServer) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = configure(StreamableHttpServer::builder(mcp_server()).bind_address(addr)).build();
    let running = server.clone();
    tokio::spawn(async move {
        if let Err(e) = running.serve(listener).await {
            eprintln!("Server error: {}", e);
        }
    });
    (format!("http://{}/mcp", addr), server)
}

fn transport(url: &str) -> StreamableHttpClientTransport {
    let config = StreamableHttpClientConfig::parse(url)
        .unwrap()
        .with_request_timeout(Some(Duration::from_secs(10)))
        .with_reconnect(ReconnectConfig::disabled());
    StreamableHttpClientTransport::new(config).unwrap()
}

async fn wait_for_sessions(server: &StreamableHttpServer, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.session_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {} sessions", expected));
}

#[tokio::test]
async fn test_client_round_trip_over_sse() -> anyhow::Result<()> {
    let (url, server) = start(|b| b).await;
    let client = McpClient::builder("http-client", "1.0.0")
        .strict(true)
        .connect(transport(&url))
        .await?;

    assert!(client.session_id().is_some());
    assert_eq!(client.protocol_version(), Some(McpVersion::V2025_11_25));
    assert_eq!(client.server_info().unwrap().name, "http-e2e");
    assert_eq!(server.session_count(), 1);

    client.ping().await?;
    let result = client
        .call("tools/call", Some(json!({"name": "echo", "arguments": {"v": 7}})))
        .await?;
    assert_eq!(result["echo"]["v"], 7);

    client.disconnect().await;
    wait_for_sessions(&server, 0).await;
    Ok(())
}

#[tokio::test]
async fn test_client_round_trip_over_json() -> anyhow::Result<()> {
    let (url, _server) = start(|b| b.json_response(true)).await;
    let client = McpClient::builder("http-client", "1.0.0")
        .connect(transport(&url))
        .await?;

    let futures = client
        .with_batch(|batch| {
            vec![
                batch.call("tools/call", Some(json!({"name": "echo", "arguments": 1}))),
                batch.call("tools/call", Some(json!({"name": "echo", "arguments": 2}))),
            ]
        })?;
    let results = futures::future::try_join_all(futures).await?;
    assert_eq!(results[0]["echo"], 1);
    assert_eq!(results[1]["echo"], 2);
    Ok(())
}

#[tokio::test]
async fn test_server_requests_travel_on_request_stream() {
    let (url, _server) = start(|b| b).await;
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let client = McpClient::builder("http-client", "1.0.0")
        .request_fn("roots/list", |_params, _ctx| async move {
            Ok(json!({"roots": [{"uri": "file:///workspace", "name": "workspace"}]}))
        })
        .notification_fn("notifications/progress", move |params, _session| {
            let progress_tx = progress_tx.clone();
            async move {
                let _ = progress_tx.send(params);
                Ok(())
            }
        })
        .connect(transport(&url))
        .await
        .unwrap();

    let result = client
        .call_with_timeout(
            "tools/call",
            Some(json!({"name": "ask_roots"})),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(result["roots"][0]["name"], "workspace");

    let progress = tokio::time::timeout(Duration::from_secs(5), progress_rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(progress["progressToken"], "roots");
}

#[tokio::test]
async fn test_terminated_session_reports_expiry() {
    let (url, server) = start(|b| b).await;
    let client = McpClient::builder("http-client", "1.0.0")
        .connect(transport(&url))
        .await
        .unwrap();

    server.shutdown().await;
    wait_for_sessions(&server, 0).await;

    let err = client.call("tools/call", None).await.unwrap_err();
    assert!(matches!(
        err,
        McpError::Transport(TransportError::SessionExpired)
    ));
}

#[tokio::test]
async fn test_connect_to_missing_server_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = McpClient::builder("http-client", "1.0.0")
        .connect(transport(&format!("http://{}/mcp", addr)))
        .await;
    assert!(matches!(
        result,
        Err(McpError::Transport(TransportError::ConnectionFailed(_)))
    ));
}

#[tokio::test]
async fn test_slow_call_does_not_hold_up_later_calls() -> anyhow::Result<()> {
    let (url, _server) = start(|b| b.json_response(true)).await;
    let client = McpClient::builder("http-client", "1.0.0")
        .connect(transport(&url))
        .await?;

    let started = Instant::now();
    let (slow, (fast, fast_elapsed)) = tokio::join!(
        client.call("tools/call", Some(json!({"name": "slow"}))),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let result = client
                .call("tools/call", Some(json!({"name": "echo", "arguments": "fast"})))
                .await;
            (result, started.elapsed())
        }
    );

    assert_eq!(fast?["echo"], "fast");
    assert!(
        fast_elapsed < Duration::from_millis(1500),
        "fast call waited {:?}",
        fast_elapsed
    );
    assert_eq!(slow?["slow"], true);
    Ok(())
}

/// Minimal HTTP/1.1 MCP endpoint: JSON replies, except a `tools/call` named
/// `drop`, which opens an SSE reply and closes the socket mid-stream
async fn serve_raw(listener: TcpListener) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(handle_raw_connection(stream));
    }
}

async fn handle_raw_connection(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                content_length = value.trim().parse().unwrap();
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).await.unwrap();

        let reply = match request_line.split_whitespace().next() {
            Some("GET") => empty_reply("405 Method Not Allowed"),
            Some("DELETE") => empty_reply("200 OK"),
            _ => {
                let message: Value = serde_json::from_slice(&body).unwrap();
                let Some(id) = message.get("id").cloned() else {
                    write.write_all(empty_reply("202 Accepted").as_bytes()).await.unwrap();
                    continue;
                };
                match message["method"].as_str() {
                    Some("initialize") => json_reply(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": message["params"]["protocolVersion"],
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "raw", "version": "0"}
                        }
                    })),
                    Some("tools/call") if message["params"]["name"] == "drop" => {
                        let event = ": stream open\n\n";
                        let head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nMcp-Session-Id: raw-1\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
                            event.len(),
                            event
                        );
                        write.write_all(head.as_bytes()).await.unwrap();
                        return;
                    }
                    _ => json_reply(json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}})),
                }
            }
        };
        write.write_all(reply.as_bytes()).await.unwrap();
    }
}

fn empty_reply(status: &str) -> String {
    format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status)
}

fn json_reply(body: Value) -> String {
    let body = body.to_string();
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nMcp-Session-Id: raw-1\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

#[tokio::test]
async fn test_broken_request_stream_fails_only_its_call() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/mcp", listener.local_addr().unwrap());
    tokio::spawn(serve_raw(listener));

    let client = McpClient::builder("http-client", "1.0.0")
        .connect(transport(&url))
        .await
        .unwrap();
    assert_eq!(client.session_id().as_deref(), Some("raw-1"));

    let dropped = tokio::time::timeout(
        Duration::from_secs(5),
        client.call("tools/call", Some(json!({"name": "drop"}))),
    )
    .await
    .expect("dropped stream should fail the call promptly");
    assert!(matches!(dropped, Err(McpError::Transport(_))));

    let result = client
        .call("tools/call", Some(json!({"name": "after"})))
        .await
        .unwrap();
    assert_eq!(result["ok"], true);
}
