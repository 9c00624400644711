//! End-to-end coverage of the FIFO queue and duplicate-id rejection,
//! driven against a real `Supervisor` connecting out to a hand-rolled
//! stub "server" socket.

use std::sync::Arc;
use std::time::Duration;

use bridge_client::browser::StubBrowserOps;
use bridge_client::kvstore::MemoryKv;
use bridge_client::{Supervisor, SupervisorConfig};
use bridge_proto::Frame;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn start_stub_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, format!("ws://127.0.0.1:{port}"))
}

#[tokio::test]
async fn scenario_7_queue_is_strictly_fifo() {
    let (listener, url) = start_stub_listener().await;

    let supervisor = Supervisor::start(SupervisorConfig {
        user_configured_url: Some(url),
        browser: Arc::new(StubBrowserOps),
        kv: Arc::new(MemoryKv::default()),
        extension_version: "test".to_string(),
    })
    .await;

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let hello = ws.next().await.unwrap().unwrap();
    assert!(matches!(Frame::parse(hello.to_text().unwrap()).unwrap(), Some(Frame::Hello { .. })));
    ws.send(Message::Text(Frame::HelloAck {}.to_text().unwrap())).await.unwrap();

    let cmd_a = Frame::Cmd { id: "a".into(), cmd: "listTabs".into(), params: json!({}) };
    ws.send(Message::Text(cmd_a.to_text().unwrap())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    let cmd_b = Frame::Cmd { id: "b".into(), cmd: "listTabs".into(), params: json!({}) };
    ws.send(Message::Text(cmd_b.to_text().unwrap())).await.unwrap();

    let first = ws.next().await.unwrap().unwrap();
    let second = ws.next().await.unwrap().unwrap();

    let first_id = match Frame::parse(first.to_text().unwrap()).unwrap() {
        Some(Frame::Res { id, .. }) => id,
        other => panic!("expected res, got {other:?}"),
    };
    let second_id = match Frame::parse(second.to_text().unwrap()).unwrap() {
        Some(Frame::Res { id, .. }) => id,
        other => panic!("expected res, got {other:?}"),
    };

    assert_eq!(first_id, "a");
    assert_eq!(second_id, "b");

    supervisor.stop().await;
}

#[tokio::test]
async fn scenario_8_duplicate_id_rejected_without_invoking_browser_op() {
    let (listener, url) = start_stub_listener().await;

    let supervisor = Supervisor::start(SupervisorConfig {
        user_configured_url: Some(url),
        browser: Arc::new(StubBrowserOps),
        kv: Arc::new(MemoryKv::default()),
        extension_version: "test".to_string(),
    })
    .await;

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let hello = ws.next().await.unwrap().unwrap();
    assert!(matches!(Frame::parse(hello.to_text().unwrap()).unwrap(), Some(Frame::Hello { .. })));
    ws.send(Message::Text(Frame::HelloAck {}.to_text().unwrap())).await.unwrap();

    let cmd = Frame::Cmd { id: "dup".into(), cmd: "listTabs".into(), params: json!({}) };
    ws.send(Message::Text(cmd.to_text().unwrap())).await.unwrap();
    ws.send(Message::Text(cmd.to_text().unwrap())).await.unwrap();

    let first = ws.next().await.unwrap().unwrap();
    let second = ws.next().await.unwrap().unwrap();

    let (first_ok, _) = match Frame::parse(first.to_text().unwrap()).unwrap() {
        Some(Frame::Res { ok, error, .. }) => (ok, error),
        other => panic!("expected res, got {other:?}"),
    };
    let (second_ok, second_err) = match Frame::parse(second.to_text().unwrap()).unwrap() {
        Some(Frame::Res { ok, error, .. }) => (ok, error),
        other => panic!("expected res, got {other:?}"),
    };

    assert!(first_ok);
    assert!(!second_ok);
    let err = second_err.unwrap();
    assert_eq!(err.reason.as_deref(), Some("duplicate_request_id"));
    assert_eq!(err.code.as_deref(), Some("DUPLICATE_REQUEST_ID"));
    assert_eq!(err.retryable, Some(false));

    supervisor.stop().await;
}
