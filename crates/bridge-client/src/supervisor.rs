//! The client-side supervisor: ties endpoint resolution,
//! per-endpoint connections, the shared FIFO queue, and status aggregation
//! together into one handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bridge_proto::{BridgeError, Frame};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::browser::BrowserOps;
use crate::connection::{self, ConnectionState, OutboundMsg};
use crate::endpoint::resolve_candidates;
use crate::kvstore::{KvStore, STICKY_ENDPOINT_KEY, USER_CONFIGURED_URL_KEY};
use crate::queue::{AdmissionRejection, CommandQueue, QueuedCommand, SocketKey};
use crate::status::{self, BridgeStatus, EndpointSnapshot};

pub struct SupervisorConfig {
    pub user_configured_url: Option<String>,
    pub browser: Arc<dyn BrowserOps>,
    pub kv: Arc<dyn KvStore>,
    pub extension_version: String,
}

pub(crate) struct SharedState {
    endpoints: Mutex<HashMap<String, EndpointSnapshot>>,
    sockets: Mutex<HashMap<SocketKey, mpsc::UnboundedSender<OutboundMsg>>>,
    queue: Mutex<CommandQueue>,
    notify: Notify,
    kv: Arc<dyn KvStore>,
    browser: Arc<dyn BrowserOps>,
    status_tx: watch::Sender<BridgeStatus>,
    configured_head: Option<String>,
    default_url: String,
    pub(crate) extension_version: String,
}

impl SharedState {
    pub(crate) async fn set_endpoint_state(&self, url: &str, conn_state: ConnectionState, last_error: Option<String>) {
        let changed = {
            let mut endpoints = self.endpoints.lock().await;
            let entry = endpoints.entry(url.to_string()).or_insert_with(|| EndpointSnapshot {
                url: url.to_string(),
                state: ConnectionState::Idle,
                last_error: None,
            });
            // OPEN's entry action clears errors per spec §4.3; every other
            // transition only overwrites last_error when a new one is given,
            // so a Closed->Closed retry log doesn't erase the reason.
            let new_last_error = if conn_state == ConnectionState::Open {
                None
            } else if last_error.is_some() {
                last_error
            } else {
                entry.last_error.clone()
            };
            let changed = entry.state != conn_state || entry.last_error != new_last_error;
            entry.state = conn_state;
            entry.last_error = new_last_error;
            changed
        };
        if changed {
            self.publish_status().await;
        }
    }

    async fn publish_status(&self) {
        let snapshots: Vec<EndpointSnapshot> = self.endpoints.lock().await.values().cloned().collect();
        let status = status::aggregate(&snapshots, self.configured_head.as_deref(), &self.default_url, now_millis());
        let _ = self.status_tx.send(status);
    }

    pub(crate) fn persist_sticky(&self, url: &str) {
        self.kv.set(STICKY_ENDPOINT_KEY, url);
    }

    pub(crate) async fn register_socket(&self, key: SocketKey, sender: mpsc::UnboundedSender<OutboundMsg>) {
        self.sockets.lock().await.insert(key, sender);
    }

    pub(crate) async fn unregister_socket(&self, key: SocketKey) {
        self.sockets.lock().await.remove(&key);
        let now = Instant::now();
        self.queue.lock().await.purge_socket(key, now);
    }

    async fn is_socket_registered(&self, key: SocketKey) -> bool {
        self.sockets.lock().await.contains_key(&key)
    }

    pub(crate) async fn send_to_socket(&self, key: SocketKey, frame: Frame) -> bool {
        let sockets = self.sockets.lock().await;
        sockets.get(&key).map(|s| s.send(OutboundMsg::Frame(frame)).is_ok()).unwrap_or(false)
    }

    pub(crate) async fn admit_command(&self, socket_key: SocketKey, id: String, cmd: String, params: Value) {
        let now = Instant::now();
        let result = self.queue.lock().await.admit(id.clone(), socket_key, cmd, params, now);
        match result {
            Ok(()) => self.notify.notify_one(),
            Err(AdmissionRejection::DuplicateRequestId) => {
                self.reject(socket_key, id, BridgeError::DuplicateRequestId).await;
            }
            Err(AdmissionRejection::QueueOverflow) => {
                self.reject(socket_key, id, BridgeError::QueueOverflow).await;
            }
        }
    }

    async fn reject(&self, socket_key: SocketKey, id: String, err: BridgeError) {
        let frame = Frame::Res { id, ok: false, result: None, error: Some(err.to_wire()) };
        self.send_to_socket(socket_key, frame).await;
    }

    async fn process_item(&self, item: QueuedCommand) {
        let now = Instant::now();
        if !self.is_socket_registered(item.socket_key).await {
            self.queue.lock().await.mark_completed(&item.id, now);
            return;
        }
        if item.is_expired(now) {
            self.reject(item.socket_key, item.id.clone(), BridgeError::QueueWaitTimeout).await;
            self.queue.lock().await.mark_completed(&item.id, now);
            return;
        }

        let outcome = self.browser.invoke(&item.cmd, item.params.clone()).await;
        let frame = match outcome {
            Ok(result) => Frame::Res { id: item.id.clone(), ok: true, result: Some(result), error: None },
            Err(err) => Frame::Res { id: item.id.clone(), ok: false, result: None, error: Some(err.to_wire()) },
        };
        self.send_to_socket(item.socket_key, frame).await;
        self.queue.lock().await.mark_completed(&item.id, now);
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

async fn run_worker(state: Arc<SharedState>) {
    loop {
        let item = state.queue.lock().await.dequeue();
        match item {
            Some(item) => state.process_item(item).await,
            None => state.notify.notified().await,
        }
    }
}

/// Owns the supervisor's background tasks. Dropping this does not stop
/// them; call [`Supervisor::stop`] for a graceful shutdown.
pub struct Supervisor {
    state: Arc<SharedState>,
    shutdowns: Mutex<Vec<oneshot::Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    status_rx: watch::Receiver<BridgeStatus>,
}

impl Supervisor {
    /// Resolves candidate endpoints, persists the user-configured URL, and
    /// spawns one connection task per candidate plus the single queue worker.
    pub async fn start(config: SupervisorConfig) -> Arc<Supervisor> {
        if let Some(url) = &config.user_configured_url {
            config.kv.set(USER_CONFIGURED_URL_KEY, url);
        }
        let sticky = config.kv.get(STICKY_ENDPOINT_KEY);
        let candidates = resolve_candidates(config.user_configured_url.as_deref(), sticky.as_deref());
        let configured_head = config.user_configured_url.clone().or(sticky);

        let (status_tx, status_rx) = watch::channel(status::aggregate(&[], None, "ws://localhost:8766", now_millis()));

        let state = Arc::new(SharedState {
            endpoints: Mutex::new(HashMap::new()),
            sockets: Mutex::new(HashMap::new()),
            queue: Mutex::new(CommandQueue::default()),
            notify: Notify::new(),
            kv: config.kv,
            browser: config.browser,
            status_tx,
            configured_head,
            default_url: "ws://localhost:8766".to_string(),
            extension_version: config.extension_version,
        });

        let mut shutdowns = Vec::new();
        let mut handles = Vec::new();

        for url in candidates {
            let (tx, rx) = oneshot::channel();
            shutdowns.push(tx);
            let endpoint_state = Arc::clone(&state);
            handles.push(tokio::spawn(connection::run_endpoint(url, endpoint_state, rx)));
        }

        let worker_state = Arc::clone(&state);
        handles.push(tokio::spawn(run_worker(worker_state)));

        info!(candidate_count = handles.len() - 1, "supervisor started");

        Arc::new(Supervisor {
            state,
            shutdowns: Mutex::new(shutdowns),
            handles: Mutex::new(handles),
            stopped: AtomicBool::new(false),
            status_rx,
        })
    }

    /// The current aggregate status, recomputed on every
    /// endpoint state change.
    pub fn status(&self) -> BridgeStatus {
        self.status_rx.borrow().clone()
    }

    /// A clone of the status watch channel for subscribing to changes.
    pub fn subscribe_status(&self) -> watch::Receiver<BridgeStatus> {
        self.status_rx.clone()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.queue.lock().await.len()
    }

    /// Idempotent. Signals every connection task to stop reconnecting and
    /// aborts all background tasks.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for tx in self.shutdowns.lock().await.drain(..) {
            let _ = tx.send(());
        }
        for handle in self.handles.lock().await.drain(..) {
            handle.abort();
        }
    }
}
