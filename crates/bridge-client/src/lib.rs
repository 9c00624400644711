//! Browser-extension-side supervisor for the MCP-to-browser-extension
//! WebSocket bridge: endpoint resolution, per-endpoint connection state
//! machines, a process-global FIFO command queue, duplicate-id
//! suppression, and status aggregation.

pub mod browser;
pub mod connection;
pub mod endpoint;
pub mod kvstore;
pub mod logging;
pub mod queue;
pub mod status;
pub mod supervisor;

pub use browser::{BrowserOps, StubBrowserOps};
pub use kvstore::{FileKv, KvStore, MemoryKv};
pub use status::BridgeStatus;
pub use supervisor::{Supervisor, SupervisorConfig};
