//! Frame codec, error taxonomy, and retry math shared by the bridge server
//! and bridge client.

pub mod error;
pub mod frame;
pub mod retry;

pub use error::BridgeError;
pub use frame::{Frame, FrameError, WireError};
pub use retry::RetryConfig;
