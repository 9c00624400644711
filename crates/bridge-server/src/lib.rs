//! Server-side dispatcher for the MCP-to-browser-extension WebSocket bridge.

pub mod dispatcher;
pub mod facade;
pub mod heartbeat;
pub mod http;
pub mod logging;
pub mod server;

pub use dispatcher::{Dispatcher, DispatcherConfig, StartError};
pub use facade::{ArtifactCleanupArgs, DispatcherFacade, OpenUrlArgs, ScreenshotArgs, ToolFacade};
