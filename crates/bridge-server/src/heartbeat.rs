//! Heartbeat loop for connected clients.
//!
//! One process-wide ticker: every `heartbeatIntervalMs`, each connected
//! client either gets a `ping` or, if it has missed `pongTimeoutMs`, gets
//! closed with code 4002 / reason `pong_timeout`. Closing a client fails
//! its outstanding pending requests, which the caller's retry loop in
//! [`crate::dispatcher::Dispatcher::call`] picks up on its next attempt.

use std::sync::Arc;
use std::time::Instant;

use bridge_proto::Frame;
use tracing::warn;

use crate::dispatcher::{Dispatcher, PONG_TIMEOUT_CLOSE_CODE, PONG_TIMEOUT_CLOSE_REASON};

pub async fn run(dispatcher: Arc<Dispatcher>) {
    let mut interval = tokio::time::interval(dispatcher.config().heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        tick(&dispatcher).await;
    }
}

async fn tick(dispatcher: &Arc<Dispatcher>) {
    let pong_timeout = dispatcher.config().pong_timeout;
    let now = Instant::now();

    for (key, last_pong) in dispatcher.clients_snapshot().await {
        if now.duration_since(last_pong) > pong_timeout {
            warn!(%key, "pong timeout, closing client");
            dispatcher.close_client(key, PONG_TIMEOUT_CLOSE_CODE, PONG_TIMEOUT_CLOSE_REASON).await;
        } else {
            dispatcher.send_to_client(key, Frame::Ping {}).await;
        }
    }
}
