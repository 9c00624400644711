//! Client table, pending-request table, round-robin selection, retry, and
//! the heartbeat loop.
//!
//! `call()` is the single entry point used by the facade. Internally it
//! loops over `dispatch_once` up to `RetryConfig::max_attempts`, re-running
//! client selection on every attempt — this collapses the event-driven
//! retry bookkeeping of the original design into a plain per-call state
//! machine, one task per in-flight `call()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_proto::{BridgeError, Frame, RetryConfig, WireError};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::server::{self, OutboundMsg};

pub type ClientKey = Uuid;

pub const HEARTBEAT_INTERVAL_MS: u64 = 10_000;
pub const PONG_TIMEOUT_MS: u64 = 25_000;
pub const RETRY_WAIT_FOR_CLIENT_MS: u64 = 1_200;
pub const CLIENT_POLL_INTERVAL_MS: u64 = 50;
pub const PONG_TIMEOUT_CLOSE_CODE: u16 = 4002;
pub const PONG_TIMEOUT_CLOSE_REASON: &str = "pong_timeout";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub bind_host: String,
    pub port: u16,
    /// Host embedded in externally-visible `ws://host:port` strings.
    pub advertise_host: String,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub retry: RetryConfig,
    pub retry_wait_for_client: Duration,
}

impl DispatcherConfig {
    pub fn from_bridge_config(config: &bridge_config::BridgeConfig) -> Self {
        Self {
            bind_host: config.host.clone(),
            port: config.port,
            advertise_host: config.external_host().to_string(),
            ..Self::default()
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: bridge_config::DEFAULT_PORT,
            advertise_host: "127.0.0.1".to_string(),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            pong_timeout: Duration::from_millis(PONG_TIMEOUT_MS),
            retry: RetryConfig::default(),
            retry_wait_for_client: Duration::from_millis(RETRY_WAIT_FOR_CLIENT_MS),
        }
    }
}

pub(crate) struct ClientRecord {
    pub key: ClientKey,
    pub client_id: String,
    pub extension_version: String,
    pub last_pong_at: Instant,
    pub outbound: mpsc::UnboundedSender<OutboundMsg>,
}

#[derive(Default)]
struct ClientTable {
    order: Vec<ClientKey>,
    clients: HashMap<ClientKey, ClientRecord>,
    cursor: usize,
}

impl ClientTable {
    fn insert(&mut self, record: ClientRecord) {
        self.order.push(record.key);
        self.clients.insert(record.key, record);
    }

    fn remove(&mut self, key: &ClientKey) -> Option<ClientRecord> {
        self.order.retain(|k| k != key);
        self.clients.remove(key)
    }

    /// Picks the next client in round-robin order and advances the cursor.
    /// Stable across inserts; a removal before the cursor simply shifts
    /// which physical slot the cursor lands on next, which is an
    /// acceptable one-time fairness wobble rather than a skip/repeat bug.
    fn next_open(&mut self) -> Option<ClientKey> {
        if self.order.is_empty() {
            return None;
        }
        let idx = self.cursor % self.order.len();
        self.cursor = (self.cursor + 1) % self.order.len();
        Some(self.order[idx])
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct PendingEntry {
    client_key: ClientKey,
    tx: oneshot::Sender<Result<Value, BridgeError>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<String, PendingEntry>,
}

impl PendingTable {
    fn register(&mut self, id: String, client_key: ClientKey) -> oneshot::Receiver<Result<Value, BridgeError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, PendingEntry { client_key, tx });
        rx
    }

    fn take(&mut self, id: &str) -> Option<PendingEntry> {
        self.entries.remove(id)
    }

    /// Resolves a pending request. Returns `false` (and drops the response)
    /// when `id` is unknown or its client key no longer matches — the
    /// latter happens when a retry has already re-registered `id` against a
    /// different client and a stale response from the old socket arrives late.
    fn resolve(&mut self, id: &str, client_key: ClientKey, outcome: Result<Value, BridgeError>) -> bool {
        match self.entries.get(id) {
            Some(entry) if entry.client_key == client_key => {}
            _ => return false,
        }
        if let Some(entry) = self.entries.remove(id) {
            let _ = entry.tx.send(outcome);
            true
        } else {
            false
        }
    }

    fn fail_all_for_client(&mut self, client_key: ClientKey, err: &BridgeError) {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.client_key == client_key)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(entry) = self.entries.remove(&id) {
                let _ = entry.tx.send(Err(err.clone()));
            }
        }
    }

    fn fail_all(&mut self, err: &BridgeError) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(err.clone()));
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("address {addr} already in use")]
    PortInUse { addr: String },
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
}

pub struct Dispatcher {
    config: DispatcherConfig,
    /// The actually-bound port, set once `start()` completes. Differs from
    /// `config.port` when the caller asked for an ephemeral port (`0`).
    bound_port: std::sync::atomic::AtomicU16,
    clients: Mutex<ClientTable>,
    pending: Mutex<PendingTable>,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Arc<Self> {
        let bound_port = std::sync::atomic::AtomicU16::new(config.port);
        Arc::new(Self {
            config,
            bound_port,
            clients: Mutex::new(ClientTable::default()),
            pending: Mutex::new(PendingTable::default()),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn external_ws_url(&self) -> String {
        format!("ws://{}:{}", self.config.advertise_host, self.bound_port.load(Ordering::SeqCst))
    }

    pub async fn connected_client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Binds the listener and spawns the accept loop and heartbeat task.
    pub async fn start(self: &Arc<Self>) -> Result<std::net::SocketAddr, StartError> {
        let addr = format!("{}:{}", self.config.bind_host, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                StartError::PortInUse { addr: addr.clone() }
            } else {
                StartError::Bind { addr: addr.clone(), source }
            }
        })?;
        let bound = listener.local_addr().map_err(|source| StartError::Bind { addr: addr.clone(), source })?;
        self.bound_port.store(bound.port(), Ordering::SeqCst);

        let accept_dispatcher = Arc::clone(self);
        let accept_task = tokio::spawn(async move {
            server::accept_loop(accept_dispatcher, listener).await;
        });

        let heartbeat_dispatcher = Arc::clone(self);
        let heartbeat_task = tokio::spawn(async move {
            crate::heartbeat::run(heartbeat_dispatcher).await;
        });

        self.tasks.lock().await.extend([accept_task, heartbeat_task]);
        info!(%bound, "dispatcher listening");
        Ok(bound)
    }

    /// Idempotent: closes every connected client, fails every pending
    /// request with `ServerStopped`, and aborts the background tasks.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let keys: Vec<ClientKey> = { self.clients.lock().await.order.clone() };
        for key in keys {
            self.remove_client(key, BridgeError::ServerStopped).await;
        }
        self.pending.lock().await.fail_all(&BridgeError::ServerStopped);
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("dispatcher stopped");
    }

    /// Dispatches `cmd` to one connected client, retrying per the configured
    /// `RetryConfig` on retryable failures. `timeout_ms` bounds each
    /// individual attempt, not the call as a whole.
    pub async fn call(&self, cmd: &str, params: Value, timeout_ms: u64) -> Result<Value, BridgeError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BridgeError::ServerStopped);
        }
        let id = Uuid::new_v4().to_string();
        let call_timeout = Duration::from_millis(timeout_ms.max(1));
        let mut last_err = BridgeError::no_client(self.external_ws_url());

        for attempt in 1..=self.config.retry.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
            }
            match self.dispatch_once(&id, cmd, params.clone(), call_timeout, attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let keep_retrying = err.retryable() && attempt < self.config.retry.max_attempts;
                    last_err = err;
                    if !keep_retrying {
                        return Err(last_err);
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn dispatch_once(
        &self,
        id: &str,
        cmd: &str,
        params: Value,
        call_timeout: Duration,
        attempt: u32,
    ) -> Result<Value, BridgeError> {
        let client_key = self.select_client(attempt).await?;

        let rx = {
            let mut pending = self.pending.lock().await;
            pending.register(id.to_string(), client_key)
        };

        let frame = Frame::Cmd { id: id.to_string(), cmd: cmd.to_string(), params };
        let sent = {
            let clients = self.clients.lock().await;
            clients
                .clients
                .get(&client_key)
                .map(|c| c.outbound.send(OutboundMsg::Frame(frame)).is_ok())
                .unwrap_or(false)
        };
        if !sent {
            self.pending.lock().await.take(id);
            return Err(BridgeError::SocketClosed);
        }

        match tokio::time::timeout(call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_dropped)) => Err(BridgeError::SocketClosed),
            Err(_elapsed) => {
                self.pending.lock().await.take(id);
                Err(BridgeError::Timeout)
            }
        }
    }

    /// On the first attempt, an empty client pool fails fast. On retries, a
    /// short bounded poll gives a replacement client (e.g. a reconnecting
    /// stub) a chance to register before giving up.
    async fn select_client(&self, attempt: u32) -> Result<ClientKey, BridgeError> {
        if attempt == 1 {
            return self
                .clients
                .lock()
                .await
                .next_open()
                .ok_or_else(|| BridgeError::no_client(self.external_ws_url()));
        }

        let deadline = Instant::now() + self.config.retry_wait_for_client;
        loop {
            if let Some(key) = self.clients.lock().await.next_open() {
                return Ok(key);
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::no_client(self.external_ws_url()));
            }
            tokio::time::sleep(Duration::from_millis(CLIENT_POLL_INTERVAL_MS)).await;
        }
    }

    pub(crate) async fn register_client(
        &self,
        key: ClientKey,
        client_id: String,
        extension_version: String,
        outbound: mpsc::UnboundedSender<OutboundMsg>,
    ) {
        let mut clients = self.clients.lock().await;
        clients.insert(ClientRecord { key, client_id, extension_version, last_pong_at: Instant::now(), outbound });
        info!(%key, "client connected");
    }

    pub(crate) async fn remove_client(&self, key: ClientKey, reason: BridgeError) {
        let removed = { self.clients.lock().await.remove(&key) };
        if removed.is_some() {
            self.pending.lock().await.fail_all_for_client(key, &reason);
            info!(%key, reason = %reason, "client disconnected");
        }
    }

    pub(crate) async fn resolve_response(
        &self,
        client_key: ClientKey,
        id: String,
        ok: bool,
        result: Option<Value>,
        error: Option<WireError>,
    ) {
        let outcome = if ok {
            Ok(result.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::from_wire(error.unwrap_or_else(|| WireError::new("unknown remote error"))))
        };
        self.pending.lock().await.resolve(&id, client_key, outcome);
    }

    pub(crate) async fn record_pong(&self, key: ClientKey) {
        let mut clients = self.clients.lock().await;
        if let Some(record) = clients.clients.get_mut(&key) {
            record.last_pong_at = Instant::now();
        }
    }

    pub(crate) async fn send_to_client(&self, key: ClientKey, frame: Frame) -> bool {
        let clients = self.clients.lock().await;
        clients.clients.get(&key).map(|c| c.outbound.send(OutboundMsg::Frame(frame)).is_ok()).unwrap_or(false)
    }

    /// Used by the heartbeat loop when a client misses its pong deadline.
    pub(crate) async fn close_client(&self, key: ClientKey, code: u16, reason: &str) {
        {
            let clients = self.clients.lock().await;
            if let Some(record) = clients.clients.get(&key) {
                let _ = record.outbound.send(OutboundMsg::Close { code, reason: reason.to_string() });
            }
        }
        self.remove_client(key, BridgeError::SocketClosed).await;
    }

    pub(crate) async fn clients_snapshot(&self) -> Vec<(ClientKey, Instant)> {
        self.clients.lock().await.clients.values().map(|c| (c.key, c.last_pong_at)).collect()
    }

    pub async fn status(&self) -> Value {
        let clients = self.clients.lock().await;
        serde_json::json!({
            "connectedClients": clients.len(),
            "endpoint": self.external_ws_url(),
            "stopped": self.stopped.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_in_insertion_order() {
        let mut table = ClientTable::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        for key in [a, b, c] {
            let (tx, _rx) = mpsc::unbounded_channel();
            table.insert(ClientRecord {
                key,
                client_id: "x".into(),
                extension_version: "1".into(),
                last_pong_at: Instant::now(),
                outbound: tx,
            });
        }
        assert_eq!(table.next_open(), Some(a));
        assert_eq!(table.next_open(), Some(b));
        assert_eq!(table.next_open(), Some(c));
        assert_eq!(table.next_open(), Some(a));
    }

    #[test]
    fn empty_table_yields_no_client() {
        let mut table = ClientTable::default();
        assert_eq!(table.next_open(), None);
    }

    #[tokio::test]
    async fn pending_resolve_ignores_stale_client_key() {
        let mut pending = PendingTable::default();
        let client_a = Uuid::new_v4();
        let client_b = Uuid::new_v4();
        let _rx = pending.register("req-1".to_string(), client_a);
        // a retry has silently re-registered the same id for client_b
        let rx2 = pending.register("req-1".to_string(), client_b);
        assert!(!pending.resolve("req-1", client_a, Ok(Value::Null)));
        assert!(pending.resolve("req-1", client_b, Ok(Value::from(1))));
        assert_eq!(rx2.await.unwrap().unwrap(), Value::from(1));
    }

    #[tokio::test]
    async fn fail_all_for_client_only_touches_that_client() {
        let mut pending = PendingTable::default();
        let client_a = Uuid::new_v4();
        let client_b = Uuid::new_v4();
        let rx_a = pending.register("a".to_string(), client_a);
        let rx_b = pending.register("b".to_string(), client_b);
        pending.fail_all_for_client(client_a, &BridgeError::SocketClosed);
        assert!(rx_a.await.unwrap().is_err());
        assert!(pending.entries.contains_key("b"));
        drop(rx_b);
    }
}
