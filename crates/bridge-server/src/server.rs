//! WebSocket accept loop and per-connection framing.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bridge_proto::Frame;
use bridge_proto::BridgeError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatcher::{ClientKey, Dispatcher};

/// Messages the dispatcher pushes to a connection's writer task.
pub enum OutboundMsg {
    Frame(Frame),
    Close { code: u16, reason: String },
}

pub async fn accept_loop(dispatcher: Arc<Dispatcher>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(dispatcher, stream, peer).await {
                debug!(%peer, %err, "connection ended");
            }
        });
    }
}

async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    stream: TcpStream,
    peer: std::net::SocketAddr,
) -> Result<(), anyhow::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let first_text = match read.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            send_error_and_close(&mut write, "expected hello as the first frame").await;
            return Ok(());
        }
    };

    let (client_id, extension_version) = match Frame::parse(&first_text) {
        Ok(Some(Frame::Hello { client_id, extension_version })) => (client_id, extension_version),
        Ok(_) => {
            send_error_and_close(&mut write, "first frame must be hello").await;
            return Ok(());
        }
        Err(err) => {
            send_error_and_close(&mut write, &format!("malformed hello frame: {err}")).await;
            return Ok(());
        }
    };

    let key: ClientKey = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMsg>();

    dispatcher.register_client(key, client_id, extension_version, tx.clone()).await;
    let _ = tx.send(OutboundMsg::Frame(Frame::HelloAck {}));

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                OutboundMsg::Frame(frame) => {
                    let Ok(text) = frame.to_text() else { continue };
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundMsg::Close { code, reason } => {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.into() })))
                        .await;
                    break;
                }
            }
        }
        let _ = write.close().await;
    });

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                Ok(Some(Frame::Res { id, ok, result, error })) => {
                    dispatcher.resolve_response(key, id, ok, result, error).await;
                }
                Ok(Some(Frame::Pong { .. })) => {
                    dispatcher.record_pong(key).await;
                }
                Ok(Some(Frame::Ping {})) => {
                    dispatcher.send_to_client(key, Frame::Pong { t: now_millis() }).await;
                }
                Ok(Some(_other)) => {
                    debug!(%key, "ignoring frame not expected from a client");
                }
                Ok(None) => {
                    debug!(%key, "ignoring unknown frame type");
                }
                Err(err) => {
                    warn!(%key, %err, "dropping malformed frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(%key, %err, "read error");
                break;
            }
        }
    }

    dispatcher.remove_client(key, BridgeError::SocketClosed).await;
    writer.abort();
    Ok(())
}

async fn send_error_and_close<S>(write: &mut S, message: &str)
where
    S: futures_util::Sink<Message> + Unpin,
{
    if let Ok(text) = (Frame::Error { message: message.to_string() }).to_text() {
        let _ = write.send(Message::Text(text)).await;
    }
    let _ = write.close().await;
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
