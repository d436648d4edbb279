//! End-to-end tests: real server on an ephemeral port, real WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use wsrpc_server::{InvocationContext, MethodRegistry, RpcServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn registry() -> MethodRegistry {
    let registry = MethodRegistry::new();
    registry
        .register_normal("hello", |_ctx: InvocationContext, name: String| async move {
            Ok::<_, String>(format!("hello {name}"))
        })
        .unwrap();
    registry
        .register_normal("fail", |_ctx: InvocationContext, (): ()| async move {
            Err::<(), _>("nope")
        })
        .unwrap();
    registry
        .register_stream("ticks", |ctx: InvocationContext, every_ms: u64| async move {
            let mut n = 0u64;
            loop {
                tokio::select! {
                    () = ctx.cancelled() => return Ok::<(), String>(()),
                    () = tokio::time::sleep(Duration::from_millis(every_ms)) => {}
                }
                ctx.push(&format!("cnt = {n}"))
                    .await
                    .map_err(|e| e.to_string())?;
                n += 1;
            }
        })
        .unwrap();
    registry
}

async fn boot_server_with(config: ServerConfig) -> (String, Arc<RpcServer>) {
    let server = Arc::new(RpcServer::new(
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..config
        },
        registry(),
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn boot_server() -> (String, Arc<RpcServer>) {
    boot_server_with(ServerConfig {
        pool_capacity: 8,
        ..ServerConfig::default()
    })
    .await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timeout")
        .expect("connect failed");
    ws
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next envelope from the server, heartbeat pings included.
async fn read_envelope(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timeout")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next envelope that is not a heartbeat ping.
async fn read_response(ws: &mut WsStream) -> Value {
    loop {
        let env = read_envelope(ws).await;
        if env["status"] != 1 {
            return env;
        }
    }
}

/// Drain until the server closes; returns how many pings arrived first.
async fn wait_for_close(ws: &mut WsStream) -> usize {
    let mut pings = 0;
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("close timeout") {
            None | Some(Err(_) | Ok(Message::Close(_))) => return pings,
            Some(Ok(Message::Text(text))) => {
                let env: Value = serde_json::from_str(&text).unwrap();
                if env["method"] == "ping" {
                    pings += 1;
                }
            }
            Some(Ok(_)) => {}
        }
    }
}

// ── Request / response ──

#[tokio::test]
async fn e2e_hello_round_trip() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "hello", "clientId": 7, "args": "world"})).await;
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["status"], 0);
    assert_eq!(resp["method"], "hello");
    assert_eq!(resp["clientId"], 7);
    assert_eq!(resp["data"], "hello world");
}

#[tokio::test]
async fn e2e_unknown_method() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "nope", "clientId": 1})).await;
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["status"], 3);
    assert_eq!(resp["method"], "nope");
    assert_eq!(resp["clientId"], 1);
    assert_eq!(resp["data"]["code"], "METHOD_NOT_FOUND");
}

#[tokio::test]
async fn e2e_invalid_args() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "hello", "clientId": 2, "args": 5})).await;
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["status"], 4);
    assert_eq!(resp["clientId"], 2);
}

#[tokio::test]
async fn e2e_handler_error() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "fail", "clientId": 3})).await;
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["status"], 5);
    assert_eq!(resp["data"]["message"], "nope");
}

#[tokio::test]
async fn e2e_malformed_frame_keeps_connection() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["status"], 2);
    assert_eq!(resp["method"], "");

    send(&mut ws, json!({"method": "hello", "args": "again"})).await;
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["data"], "hello again");
    assert!(resp.get("clientId").is_none());
}

#[tokio::test]
async fn e2e_rapid_fire_requests() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    for id in 0..20 {
        send(&mut ws, json!({"method": "hello", "clientId": id, "args": id.to_string()})).await;
    }
    let mut seen = Vec::new();
    for _ in 0..20 {
        let resp = read_response(&mut ws).await;
        let id = resp["clientId"].as_i64().unwrap();
        assert_eq!(resp["data"], format!("hello {id}"));
        seen.push(id);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn e2e_two_clients_are_isolated() {
    let (url, _server) = boot_server().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    send(&mut a, json!({"method": "hello", "clientId": 1, "args": "a"})).await;
    send(&mut b, json!({"method": "hello", "clientId": 1, "args": "b"})).await;
    assert_eq!(read_response(&mut a).await["data"], "hello a");
    assert_eq!(read_response(&mut b).await["data"], "hello b");
}

// ── Streams ──

#[tokio::test]
async fn e2e_stream_pushes_until_disconnect() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "ticks", "clientId": 9, "args": 20})).await;
    for n in 0..3 {
        let push = read_response(&mut ws).await;
        assert_eq!(push["status"], 0);
        assert_eq!(push["method"], "ticks");
        assert_eq!(push["clientId"], 9);
        assert_eq!(push["data"], format!("cnt = {n}"));
    }

    ws.close(None).await.unwrap();
    drop(ws);

    // The stream handler observes cancellation and frees its executor.
    timeout(TIMEOUT, async {
        while server.pool().busy() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream handler still running");
}

#[tokio::test]
async fn e2e_stream_and_requests_interleave() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "ticks", "clientId": 1, "args": 10})).await;
    send(&mut ws, json!({"method": "hello", "clientId": 2, "args": "there"})).await;

    let mut got_hello = false;
    let mut pushes = 0;
    while !got_hello || pushes < 2 {
        let env = read_response(&mut ws).await;
        match env["method"].as_str() {
            Some("hello") => {
                assert_eq!(env["data"], "hello there");
                got_hello = true;
            }
            Some("ticks") => pushes += 1,
            other => panic!("unexpected envelope {other:?}"),
        }
    }
}

// ── Heartbeat ──

#[tokio::test]
async fn e2e_pong_produces_no_response() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "pong", "args": {"ts": 1}})).await;
    send(&mut ws, json!({"method": "hello", "clientId": 5, "args": "x"})).await;
    let resp = read_response(&mut ws).await;
    assert_eq!(resp["method"], "hello");
    assert_eq!(resp["clientId"], 5);
}

#[tokio::test]
async fn e2e_silent_client_is_closed_by_heartbeat() {
    let (url, _server) = boot_server_with(ServerConfig {
        pool_capacity: 2,
        heartbeat_interval_ms: 100,
        pong_timeout_ms: 200,
        ..ServerConfig::default()
    })
    .await;
    let mut ws = connect(&url).await;

    let pings = wait_for_close(&mut ws).await;
    assert!(pings >= 1, "expected heartbeat pings before close, got {pings}");
}

#[tokio::test]
async fn e2e_answering_client_stays_connected() {
    let (url, _server) = boot_server_with(ServerConfig {
        pool_capacity: 2,
        heartbeat_interval_ms: 50,
        pong_timeout_ms: 150,
        ..ServerConfig::default()
    })
    .await;
    let mut ws = connect(&url).await;

    let mut pings = 0;
    while pings < 10 {
        let env = read_envelope(&mut ws).await;
        assert_eq!(env["status"], 1);
        assert_eq!(env["method"], "ping");
        let ts = env["data"]["ts"].as_i64().unwrap();
        assert!(ts > 0);
        send(&mut ws, json!({"method": "pong", "args": {"ts": ts}})).await;
        pings += 1;
    }

    send(&mut ws, json!({"method": "hello", "clientId": 1, "args": "alive"})).await;
    assert_eq!(read_response(&mut ws).await["data"], "hello alive");
}

// ── Shutdown ──

#[tokio::test]
async fn e2e_graceful_shutdown_closes_clients() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, json!({"method": "hello", "clientId": 1, "args": "bye"})).await;
    assert_eq!(read_response(&mut ws).await["data"], "hello bye");

    assert!(server.shutdown().graceful_shutdown(vec![], TIMEOUT).await);
    let _ = wait_for_close(&mut ws).await;
    assert_eq!(server.shutdown().active_sessions(), 0);
}
