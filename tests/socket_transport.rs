//! Socket transport: framing with peers, heartbeats, reconnection

mod test_helpers;

use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use strand_mcp_core::prelude::*;
use strand_mcp_core::transport::Heartbeat;
use test_helpers::init_tracing;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

fn quiet_config() -> SocketConfig {
    SocketConfig {
        heartbeat: HeartbeatConfig {
            enabled: false,
            ..Default::default()
        },
        reconnect: ReconnectConfig::disabled(),
        ..Default::default()
    }
}

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        max_attempts,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        jitter: 0.0,
    }
}

async fn wait_for_state(transport: &SocketTransport, wanted: SocketState) {
    let mut changes = transport.state_changes();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *changes.borrow_and_update() != wanted {
            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("socket never reached {:?}", wanted));
}

#[tokio::test]
async fn test_client_server_over_tcp() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = McpServer::builder("socket-server", "1.0.0")
        .request_fn("tools/call", |params, _ctx| async move {
            Ok(json!({"got": params}))
        })
        .build();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        server
            .serve(SocketTransport::from_stream(stream, quiet_config()))
            .await
            .unwrap()
    });

    let client = McpClient::builder("socket-client", "1.0.0")
        .connect(SocketTransport::connect_to(addr.to_string(), quiet_config()))
        .await
        .unwrap();
    let _server_connection = accept.await.unwrap();

    let result = client
        .call("tools/call", Some(json!({"name": "x"})))
        .await
        .unwrap();
    assert_eq!(result["got"]["name"], "x");
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_are_sent_without_traffic() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = SocketConfig {
        heartbeat: HeartbeatConfig {
            enabled: true,
            interval: Duration::from_millis(50),
            initial_delay: Duration::from_millis(10),
        },
        reconnect: ReconnectConfig::disabled(),
        ..Default::default()
    };
    let transport = SocketTransport::connect_to(addr.to_string(), config);
    let (connected, accepted) = tokio::join!(transport.connect(), listener.accept());
    connected.unwrap();
    let (mut stream, _) = accepted.unwrap();

    let mut buf = [0u8; 12];
    let mut beats = Vec::new();
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        beats.push(Heartbeat::parse(&buf).expect("expected a heartbeat frame"));
    }
    assert!(beats[1].timestamp_millis >= beats[0].timestamp_millis);

    transport.disconnect().await.unwrap();
    assert_eq!(transport.state(), SocketState::Cancelled);
}

#[tokio::test]
async fn test_reconnect_exhaustion_on_connect() {
    // Reserve a port with nothing listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SocketConfig {
        reconnect: fast_reconnect(2),
        ..quiet_config()
    };
    let transport = SocketTransport::connect_to(addr.to_string(), config);
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::ReconnectExhausted { attempts: 2 }));
    assert_eq!(transport.state(), SocketState::Failed);

    let send = transport
        .send(bytes::Bytes::from_static(br#"{"jsonrpc":"2.0","method":"x"}"#))
        .await;
    assert!(matches!(send, Err(TransportError::NotConnected)));
}

#[tokio::test]
async fn test_reconnects_after_peer_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = SocketConfig {
        reconnect: fast_reconnect(5),
        ..quiet_config()
    };
    let transport = SocketTransport::connect_to(addr.to_string(), config);
    let (connected, accepted) = tokio::join!(transport.connect(), listener.accept());
    connected.unwrap();
    let _inbound = transport.receive().unwrap();
    drop(accepted.unwrap());

    let (mut second, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    wait_for_state(&transport, SocketState::Ready).await;

    transport
        .send(bytes::Bytes::from_static(br#"{"jsonrpc":"2.0","method":"hello"}"#))
        .await
        .unwrap();
    let mut line = vec![0u8; 35];
    second.read_exact(&mut line).await.unwrap();
    assert_eq!(&line, b"{\"jsonrpc\":\"2.0\",\"method\":\"hello\"}\n");
}

#[tokio::test]
async fn test_exhausted_reconnect_ends_inbound_with_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = SocketConfig {
        reconnect: fast_reconnect(2),
        ..quiet_config()
    };
    let transport = SocketTransport::connect_to(addr.to_string(), config);
    let (connected, accepted) = tokio::join!(transport.connect(), listener.accept());
    connected.unwrap();
    let mut inbound = transport.receive().unwrap();

    // Peer goes away for good
    drop(accepted.unwrap());
    drop(listener);

    let item = tokio::time::timeout(Duration::from_secs(5), inbound.next())
        .await
        .unwrap()
        .expect("inbound should report the failure");
    assert!(matches!(item, Err(TransportError::ReconnectExhausted { attempts: 2 })));
    assert_eq!(transport.state(), SocketState::Failed);
}
