//! Ambient `/health` and `/status` HTTP surface, grounded in the gateway's
//! axum router. This is purely observational — no tool call is reachable
//! over HTTP, only the dispatcher's own connectivity state.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::dispatcher::Dispatcher;

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn handle_status(State(dispatcher): State<Arc<Dispatcher>>) -> Json<serde_json::Value> {
    Json(dispatcher.status().await)
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().route("/health", get(handle_health)).route("/status", get(handle_status)).with_state(dispatcher)
}

pub async fn serve(dispatcher: Arc<Dispatcher>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "status endpoint listening");
    axum::serve(listener, router(dispatcher)).await?;
    Ok(())
}
