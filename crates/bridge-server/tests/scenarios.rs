//! End-to-end acceptance scenarios covering dispatch, retry, recovery
//! from a dropped client, and heartbeat-driven disconnection.

use std::sync::Arc;
use std::time::Duration;

use bridge_proto::{Frame, RetryConfig, WireError};
use bridge_server::dispatcher::{Dispatcher, DispatcherConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Stub = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn dispatcher_with(config: DispatcherConfig) -> (Arc<Dispatcher>, String) {
    let dispatcher = Dispatcher::new(config);
    let addr = dispatcher.start().await.expect("bind");
    (dispatcher, format!("ws://{addr}"))
}

async fn connect_stub(url: &str, client_id: &str) -> Stub {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    let hello = Frame::Hello { client_id: client_id.to_string(), extension_version: "0".to_string() };
    ws.send(Message::Text(hello.to_text().unwrap())).await.unwrap();
    let ack = ws.next().await.unwrap().unwrap();
    assert!(matches!(Frame::parse(ack.to_text().unwrap()).unwrap(), Some(Frame::HelloAck {})));
    ws
}

async fn next_cmd(ws: &mut Stub) -> (String, String, Value) {
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = msg {
            if let Ok(Some(Frame::Cmd { id, cmd, params })) = Frame::parse(&text) {
                return (id, cmd, params);
            }
        }
    }
}

async fn reply_ok(ws: &mut Stub, id: String, result: Value) {
    let frame = Frame::Res { id, ok: true, result: Some(result), error: None };
    ws.send(Message::Text(frame.to_text().unwrap())).await.unwrap();
}

async fn reply_err(ws: &mut Stub, id: String, wire: WireError) {
    let frame = Frame::Res { id, ok: false, result: None, error: Some(wire) };
    ws.send(Message::Text(frame.to_text().unwrap())).await.unwrap();
}

fn config_with(mutate: impl FnOnce(&mut DispatcherConfig)) -> DispatcherConfig {
    let mut config = DispatcherConfig { port: 0, ..DispatcherConfig::default() };
    mutate(&mut config);
    config
}

#[tokio::test]
async fn scenario_1_no_client_connected() {
    let (dispatcher, url) = dispatcher_with(config_with(|_| {})).await;
    let err = dispatcher.call("listTabs", json!({}), 200).await.unwrap_err();
    assert!(err.message().contains(&url), "expected message to contain {url}, got {}", err.message());
    dispatcher.stop().await;
}

#[tokio::test]
async fn scenario_2_call_response_round_trip() {
    let (dispatcher, url) = dispatcher_with(config_with(|_| {})).await;
    let mut stub = connect_stub(&url, "t").await;

    let responder = tokio::spawn(async move {
        let (id, _cmd, _params) = next_cmd(&mut stub).await;
        reply_ok(&mut stub, id, json!({"ok": 1})).await;
        stub
    });

    let result = dispatcher.call("listTabs", json!({}), 1000).await.unwrap();
    assert_eq!(result, json!({"ok": 1}));
    responder.await.unwrap();
    dispatcher.stop().await;
}

#[tokio::test]
async fn scenario_3_per_call_timeout() {
    let config = config_with(|c| c.retry = RetryConfig { max_attempts: 1, ..RetryConfig::default() });
    let (dispatcher, url) = dispatcher_with(config).await;
    let mut stub = connect_stub(&url, "t").await;

    let holder = tokio::spawn(async move {
        let _ = next_cmd(&mut stub).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        stub
    });

    let err = dispatcher.call("listTabs", json!({}), 100).await.unwrap_err();
    assert_eq!(err.reason(), Some("timeout"));
    dispatcher.stop().await;
    holder.abort();
}

#[tokio::test]
async fn scenario_4_retryable_error_is_retried() {
    let (dispatcher, url) = dispatcher_with(config_with(|_| {})).await;
    let mut stub = connect_stub(&url, "t").await;

    let responder = tokio::spawn(async move {
        let (id, _, _) = next_cmd(&mut stub).await;
        reply_err(&mut stub, id, WireError::new("temp").with_reason("temp_fail").with_code("TEMP").with_retryable(true)).await;
        let (id, _, _) = next_cmd(&mut stub).await;
        reply_ok(&mut stub, id, json!({"ok": true})).await;
        stub
    });

    let result = dispatcher.call("listTabs", json!({}), 2000).await.unwrap();
    assert_eq!(result, json!({"ok": true}));
    responder.await.unwrap();
    dispatcher.stop().await;
}

#[tokio::test]
async fn scenario_5_abrupt_socket_loss_recovers_on_another_client() {
    let config = config_with(|c| c.retry_wait_for_client = Duration::from_millis(500));
    let (dispatcher, url) = dispatcher_with(config).await;

    let mut stub_a = connect_stub(&url, "a").await;
    let mut stub_b = connect_stub(&url, "b").await;

    let call = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.call("listTabs", json!({}), 3000).await }
    });

    // stub A receives the command, then vanishes without a close frame.
    let (_id_a, _, _) = next_cmd(&mut stub_a).await;
    drop(stub_a);

    // stub B should see the same command redispatched to it.
    let (id_b, _, _) = next_cmd(&mut stub_b).await;
    reply_ok(&mut stub_b, id_b, json!({"recovered": true})).await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"recovered": true}));
    dispatcher.stop().await;
}

#[tokio::test]
async fn scenario_6_heartbeat_death_closes_socket() {
    let config = config_with(|c| {
        c.heartbeat_interval = Duration::from_millis(20);
        c.pong_timeout = Duration::from_millis(70);
    });
    let (dispatcher, url) = dispatcher_with(config).await;
    let mut stub = connect_stub(&url, "silent").await;

    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match stub.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return frame,
                Some(Ok(_)) => continue,
                _ => panic!("socket ended without a close frame"),
            }
        }
    })
    .await
    .expect("closed within one second");

    assert_eq!(u16::from(closed.code), 4002);
    assert!(closed.reason.contains("pong_timeout"));
    dispatcher.stop().await;
}

#[tokio::test]
async fn scenario_8_duplicate_id_is_rejected_on_the_server_facade_boundary() {
    // The duplicate-id check itself lives client-side; here we
    // confirm the server-side `BridgeError::DuplicateRequestId` mapping
    // round-trips a wire error shaped exactly like what the client sends.
    let wire = WireError::new("duplicate request id")
        .with_reason("duplicate_request_id")
        .with_code("DUPLICATE_REQUEST_ID")
        .with_retryable(false);
    let err = bridge_proto::BridgeError::from_wire(wire);
    assert!(!err.retryable());
    assert_eq!(err.code(), Some("DUPLICATE_REQUEST_ID"));
}
