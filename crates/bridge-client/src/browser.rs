//! Bridge into the browser control surface.
//!
//! The concrete screenshot/tab APIs are an out-of-scope collaborator: this
//! module only defines the seam the queue worker invokes.
//! A real extension build supplies a [`BrowserOps`] implementation backed
//! by the browser runtime's tab/capture APIs; tests and the standalone
//! binary use [`StubBrowserOps`].

use async_trait::async_trait;
use bridge_proto::BridgeError;
use serde_json::Value;

/// The commands the extension accepts from the server.
pub const CMD_LIST_TABS: &str = "listTabs";
pub const CMD_OPEN_URL: &str = "openUrl";
pub const CMD_SCREENSHOT: &str = "screenshot";

#[async_trait]
pub trait BrowserOps: Send + Sync {
    async fn invoke(&self, cmd: &str, params: Value) -> Result<Value, BridgeError>;
}

/// A browser bridge with no real tab model: `listTabs` returns an empty
/// array and any other recognized command errors as unimplemented. Useful
/// for exercising the supervisor/queue machinery without a real browser.
pub struct StubBrowserOps;

#[async_trait]
impl BrowserOps for StubBrowserOps {
    async fn invoke(&self, cmd: &str, _params: Value) -> Result<Value, BridgeError> {
        match cmd {
            CMD_LIST_TABS => Ok(Value::Array(Vec::new())),
            CMD_OPEN_URL | CMD_SCREENSHOT => {
                Err(BridgeError::remote("stub browser bridge has no tab model", None, None, false))
            }
            other => Err(BridgeError::remote(format!("unknown command: {other}"), None, None, false)),
        }
    }
}
