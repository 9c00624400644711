//! Per-endpoint connection state machine and reconnect scheduler.
//!
//! One task per candidate endpoint runs this loop for the supervisor's
//! entire lifetime: connect, go OPEN, run until the socket closes, then
//! back off and retry. Each (re)connect attempt gets a fresh socket-session
//! key, which the shared queue uses to discard work belonging to an
//! aborted connection.

use std::sync::Arc;
use std::time::Duration;

use bridge_proto::Frame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::SocketKey;
use crate::supervisor::SharedState;

pub const CONNECT_TIMEOUT_MS: u64 = 4_000;
pub const BASE_RECONNECT_MS: u64 = 500;
pub const MAX_RECONNECT_MS: u64 = 10_000;
pub const OPEN_TIMEOUT_CLOSE_CODE: u16 = 4001;
pub const OPEN_TIMEOUT_CLOSE_REASON: &str = "open_timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

pub(crate) enum OutboundMsg {
    Frame(Frame),
}

/// Runs the reconnect loop for one endpoint until `shutdown` fires. Spawned
/// once per candidate by [`crate::supervisor::Supervisor::start`].
pub(crate) async fn run_endpoint(url: String, state: Arc<SharedState>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
    let mut backoff = Duration::from_millis(BASE_RECONNECT_MS);

    loop {
        if shutdown.try_recv().is_ok() {
            state.set_endpoint_state(&url, ConnectionState::Idle, None).await;
            return;
        }

        state.set_endpoint_state(&url, ConnectionState::Connecting, None).await;
        let socket_key: SocketKey = Uuid::new_v4();

        match tokio::time::timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), connect(&url)).await {
            Ok(Ok((write, read))) => {
                backoff = Duration::from_millis(BASE_RECONNECT_MS);
                state.set_endpoint_state(&url, ConnectionState::Open, None).await;
                state.persist_sticky(&url);
                info!(url = %url, %socket_key, "connect_open");

                run_open_session(&url, socket_key, write, read, &state).await;

                state.unregister_socket(socket_key).await;
                state.set_endpoint_state(&url, ConnectionState::Closed, Some("socket closed".to_string())).await;
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                debug!(url = %url, %message, "connect_close");
                state.set_endpoint_state(&url, ConnectionState::Closed, Some(message)).await;
            }
            Err(_elapsed) => {
                // no socket exists yet at this point (the timeout fires on the
                // `connect()` future itself), so there's nothing to send a
                // 4001/open_timeout close frame on. The reason still surfaces
                // through last_error so status reporting matches the closed
                // socket case.
                warn!(url = %url, "connect timed out, treating as open_timeout");
                state
                    .set_endpoint_state(&url, ConnectionState::Closed, Some(OPEN_TIMEOUT_CLOSE_REASON.to_string()))
                    .await;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = &mut shutdown => {
                state.set_endpoint_state(&url, ConnectionState::Idle, None).await;
                return;
            }
        }
        backoff = std::cmp::min(backoff * 2, Duration::from_millis(MAX_RECONNECT_MS));
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRead =
    futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>;

async fn connect(url: &str) -> Result<(WsWrite, WsRead), anyhow::Error> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws.split())
}

/// Drives one OPEN socket: sends `hello`, then loops reading frames until
/// the socket closes or errors. Incoming `cmd` frames are admitted into
/// the shared queue; `ping` is answered inline; `pong`/`hello_ack` are
/// logged and otherwise ignored (the client never sends its own ping).
async fn run_open_session(url: &str, socket_key: SocketKey, mut write: WsWrite, mut read: WsRead, state: &Arc<SharedState>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMsg>();
    state.register_socket(socket_key, tx.clone()).await;

    let client_id = Uuid::new_v4().to_string();
    let hello = Frame::Hello { client_id, extension_version: state.extension_version.clone() };
    let Ok(text) = hello.to_text() else { return };
    if write.send(Message::Text(text)).await.is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(OutboundMsg::Frame(frame)) = rx.recv().await {
            let Ok(text) = frame.to_text() else { continue };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => handle_incoming_text(&text, url, socket_key, state).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(url = %url, %err, "socket read error");
                break;
            }
        }
    }

    writer.abort();
}

async fn handle_incoming_text(text: &str, url: &str, socket_key: SocketKey, state: &Arc<SharedState>) {
    match Frame::parse(text) {
        Ok(Some(Frame::Cmd { id, cmd, params })) => {
            state.admit_command(socket_key, id, cmd, params).await;
        }
        Ok(Some(Frame::Ping {})) => {
            state.send_to_socket(socket_key, Frame::Pong { t: now_millis() }).await;
        }
        Ok(Some(Frame::HelloAck {})) => {
            debug!(url = %url, "hello acknowledged");
        }
        Ok(Some(Frame::Error { message })) => {
            warn!(url = %url, %message, "server rejected connection");
        }
        Ok(Some(_other)) => {}
        Ok(None) => debug!(url = %url, "ignoring unknown frame type"),
        Err(err) => warn!(url = %url, %err, "dropping malformed frame"),
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Duration::from_millis(BASE_RECONNECT_MS);
        let mut seen = vec![backoff];
        for _ in 0..6 {
            backoff = std::cmp::min(backoff * 2, Duration::from_millis(MAX_RECONNECT_MS));
            seen.push(backoff);
        }
        assert_eq!(seen[0], Duration::from_millis(500));
        assert_eq!(seen[1], Duration::from_millis(1_000));
        assert_eq!(seen[2], Duration::from_millis(2_000));
        assert_eq!(*seen.last().unwrap(), Duration::from_millis(MAX_RECONNECT_MS));
    }
}
