//! The error taxonomy used end-to-end by the bridge.
//!
//! `BridgeError` is a closed sum type: one variant per internal reason, plus
//! `Remote` for the `{message, reason, code, retryable}` quadruple reported
//! by the extension itself. Every variant can be rendered to and parsed from
//! the wire's `WireError` shape so the taxonomy survives the server/client
//! boundary intact.

use crate::frame::WireError;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum BridgeError {
    /// No extension is currently connected. Message embeds the externally
    /// visible `ws://host:port`. Never retried by the dispatcher itself.
    #[error("no client connected at {endpoint}")]
    NoClient { endpoint: String },

    /// The per-call deadline elapsed. Retried up to `MAX_ATTEMPTS`.
    #[error("call timed out")]
    Timeout,

    /// A queued command exceeded `QUEUE_WAIT_TIMEOUT_MS` before the client
    /// worker reached it. Retryable by the server.
    #[error("queue wait timeout")]
    QueueWaitTimeout,

    /// The client's global queue was full. Retryable by the server.
    #[error("client queue overflow")]
    QueueOverflow,

    /// The same request id was already active or recently completed.
    /// Never retryable.
    #[error("duplicate request id")]
    DuplicateRequestId,

    /// The owning socket finalized while the item was in flight. Retryable.
    #[error("socket closed")]
    SocketClosed,

    /// An arbitrary error reported by the extension, carrying the full
    /// quadruple. Retryable iff `retryable == true`.
    #[error("{message}")]
    Remote {
        message: String,
        reason: Option<String>,
        code: Option<String>,
        retryable: bool,
    },

    /// The dispatcher is shutting down. Terminal.
    #[error("server stopped")]
    ServerStopped,

    /// A facade argument failed validation. Terminal.
    #[error("invalid url: {message}")]
    InvalidUrl { message: String },
}

impl BridgeError {
    pub fn no_client(endpoint: impl Into<String>) -> Self {
        BridgeError::NoClient { endpoint: endpoint.into() }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        BridgeError::InvalidUrl { message: message.into() }
    }

    pub fn remote(message: impl Into<String>, reason: Option<String>, code: Option<String>, retryable: bool) -> Self {
        BridgeError::Remote { message: message.into(), reason, code, retryable }
    }

    /// The human-readable message for this error, as surfaced to callers.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The machine-readable `reason` slug, when one applies.
    pub fn reason(&self) -> Option<&str> {
        match self {
            BridgeError::NoClient { .. } => None,
            BridgeError::Timeout => Some("timeout"),
            BridgeError::QueueWaitTimeout => Some("queue_wait_timeout"),
            BridgeError::QueueOverflow => Some("queue_overflow"),
            BridgeError::DuplicateRequestId => Some("duplicate_request_id"),
            BridgeError::SocketClosed => Some("socket_closed"),
            BridgeError::Remote { reason, .. } => reason.as_deref(),
            BridgeError::ServerStopped => Some("server_stopped"),
            BridgeError::InvalidUrl { .. } => Some("invalid_url"),
        }
    }

    /// The machine-readable `code`, when one applies.
    pub fn code(&self) -> Option<&str> {
        match self {
            BridgeError::QueueWaitTimeout => Some("QUEUE_WAIT_TIMEOUT"),
            BridgeError::QueueOverflow => Some("QUEUE_OVERFLOW"),
            BridgeError::DuplicateRequestId => Some("DUPLICATE_REQUEST_ID"),
            BridgeError::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the dispatcher's retry policy should re-dispatch this error.
    pub fn retryable(&self) -> bool {
        match self {
            BridgeError::Timeout => true,
            BridgeError::QueueWaitTimeout => true,
            BridgeError::QueueOverflow => true,
            BridgeError::SocketClosed => true,
            BridgeError::Remote { retryable, .. } => *retryable,
            BridgeError::NoClient { .. }
            | BridgeError::DuplicateRequestId
            | BridgeError::ServerStopped
            | BridgeError::InvalidUrl { .. } => false,
        }
    }

    /// Renders this error as the wire shape carried in a `res` frame.
    pub fn to_wire(&self) -> WireError {
        let mut wire = WireError::new(self.message()).with_retryable(self.retryable());
        if let Some(reason) = self.reason() {
            wire = wire.with_reason(reason);
        }
        if let Some(code) = self.code() {
            wire = wire.with_code(code);
        }
        wire
    }

    /// Reconstructs a `BridgeError::Remote` from a wire error received from
    /// the extension. Used by the dispatcher when mapping `res{ok:false}`.
    pub fn from_wire(wire: WireError) -> Self {
        BridgeError::Remote {
            message: wire.message,
            reason: wire.reason,
            code: wire.code,
            retryable: wire.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_client_message_embeds_endpoint() {
        let err = BridgeError::no_client("ws://127.0.0.1:8766");
        assert!(err.message().contains("ws://127.0.0.1:8766"));
        assert!(!err.retryable());
    }

    #[test]
    fn remote_retryable_flag_round_trips_through_wire() {
        let err = BridgeError::remote("temp", Some("temp_fail".into()), Some("TEMP".into()), true);
        let wire = err.to_wire();
        let back = BridgeError::from_wire(wire);
        assert!(back.retryable());
        assert_eq!(back.reason(), Some("temp_fail"));
        assert_eq!(back.code(), Some("TEMP"));
    }

    #[test]
    fn queue_overflow_is_retryable_with_fixed_code() {
        let err = BridgeError::QueueOverflow;
        assert!(err.retryable());
        assert_eq!(err.code(), Some("QUEUE_OVERFLOW"));
    }

    #[test]
    fn duplicate_request_id_is_terminal() {
        let err = BridgeError::DuplicateRequestId;
        assert!(!err.retryable());
        assert_eq!(err.code(), Some("DUPLICATE_REQUEST_ID"));
    }
}
