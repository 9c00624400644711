//! JSON envelope frames shared by the bridge server and bridge client.
//!
//! Frames are plain JSON objects tagged by a `type` field. Parsing never
//! fails on an unrecognized `type` — that case is reported as `Ok(None)` so
//! callers can log-and-ignore for forward compatibility, matching the rule
//! that unknown frame types must not terminate a connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The structured error shape that rides in a `res` frame's `error` field.
///
/// This is the wire representation of [`crate::error::BridgeError::Remote`]
/// and of every other taxonomy variant once it crosses the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl WireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), reason: None, code: None, retryable: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "hello")]
    Hello {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "extensionVersion")]
        extension_version: String,
    },
    #[serde(rename = "hello_ack")]
    HelloAck {},
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "cmd")]
    Cmd { id: String, cmd: String, params: Value },
    #[serde(rename = "res")]
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "pong")]
    Pong { t: u64 },
}

impl Frame {
    /// Returns the wire `type` discriminant for this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::HelloAck {} => "hello_ack",
            Frame::Error { .. } => "error",
            Frame::Cmd { .. } => "cmd",
            Frame::Res { .. } => "res",
            Frame::Ping {} => "ping",
            Frame::Pong { .. } => "pong",
        }
    }

    /// Serializes this frame to a single-line JSON text frame.
    pub fn to_text(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Parses a text frame.
    ///
    /// Returns `Ok(None)` when the `type` field is present but unrecognized
    /// (forward-compatible no-op). Returns `Err` only when the text is not a
    /// JSON object, lacks a `type` field entirely, or a recognized `type`'s
    /// payload fails to deserialize.
    pub fn parse(text: &str) -> Result<Option<Frame>, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Decode)?;
        let Some(type_field) = value.get("type").and_then(Value::as_str) else {
            return Err(FrameError::MissingType);
        };

        match type_field {
            "hello" | "hello_ack" | "error" | "cmd" | "res" | "ping" | "pong" => {
                serde_json::from_value(value).map(Some).map_err(FrameError::Decode)
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Decode(serde_json::Error),
    #[error("frame has no `type` field")]
    MissingType,
    #[error("failed to encode frame: {0}")]
    Encode(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hello_round_trips_camel_case_fields() {
        let frame = Frame::Hello { client_id: "t".into(), extension_version: "0".into() };
        let text = frame.to_text().unwrap();
        assert!(text.contains("\"clientId\":\"t\""));
        assert!(text.contains("\"extensionVersion\":\"0\""));

        let parsed = Frame::parse(&text).unwrap().unwrap();
        match parsed {
            Frame::Hello { client_id, extension_version } => {
                assert_eq!(client_id, "t");
                assert_eq!(extension_version, "0");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_ignored_not_errored() {
        let text = r#"{"type":"future_frame","whatever":1}"#;
        assert!(Frame::parse(text).unwrap().is_none());
    }

    #[test]
    fn missing_type_is_an_error() {
        let text = r#"{"foo":"bar"}"#;
        assert!(Frame::parse(text).is_err());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let text = "{not json";
        assert!(Frame::parse(text).is_err());
    }

    #[test]
    fn res_omits_absent_result_and_error() {
        let frame = Frame::Res { id: "1".into(), ok: true, result: Some(Value::from(1)), error: None };
        let text = frame.to_text().unwrap();
        assert!(!text.contains("\"error\""));
    }

    #[test]
    fn res_error_carries_full_quadruple() {
        let err = WireError::new("temp").with_reason("temp_fail").with_code("TEMP").with_retryable(true);
        let frame = Frame::Res { id: "1".into(), ok: false, result: None, error: Some(err) };
        let text = frame.to_text().unwrap();
        let parsed = Frame::parse(&text).unwrap().unwrap();
        match parsed {
            Frame::Res { ok, error: Some(err), .. } => {
                assert!(!ok);
                assert_eq!(err.reason.as_deref(), Some("temp_fail"));
                assert_eq!(err.code.as_deref(), Some("TEMP"));
                assert!(err.is_retryable());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
