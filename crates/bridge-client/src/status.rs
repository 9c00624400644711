//! Aggregate connection status published to an external observer.

use serde::Serialize;

use crate::connection::ConnectionState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisconnectedEndpoint {
    pub ws_url: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub ws_url: Option<String>,
    pub connected_endpoints: Vec<String>,
    pub disconnected_endpoints: Vec<DisconnectedEndpoint>,
    pub last_error: Option<String>,
    /// Millisecond epoch timestamp of the last status change, stamped by
    /// the caller (this module takes no clock dependency so it stays pure
    /// and test-friendly).
    pub last_change_at: u64,
}

/// One endpoint's last-known state, as tracked by the supervisor.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub url: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

/// Computes the aggregate status from per-endpoint snapshots. `configured_head` is the first configured
/// candidate (used as the `wsUrl` fallback when nothing is OPEN);
/// `last_change_at` is stamped by the caller.
pub fn aggregate(
    snapshots: &[EndpointSnapshot],
    configured_head: Option<&str>,
    default_url: &str,
    last_change_at: u64,
) -> BridgeStatus {
    let mut connected_endpoints = Vec::new();
    let mut disconnected_endpoints = Vec::new();

    for snapshot in snapshots {
        if snapshot.state == ConnectionState::Open {
            connected_endpoints.push(snapshot.url.clone());
        } else {
            disconnected_endpoints.push(DisconnectedEndpoint {
                ws_url: snapshot.url.clone(),
                last_error: snapshot.last_error.clone(),
            });
        }
    }

    let ws_url = connected_endpoints
        .first()
        .cloned()
        .or_else(|| configured_head.map(str::to_string))
        .or_else(|| Some(default_url.to_string()));

    let last_error = disconnected_endpoints.iter().rev().find_map(|e| e.last_error.clone());

    BridgeStatus {
        connected: !connected_endpoints.is_empty(),
        ws_url,
        connected_endpoints,
        disconnected_endpoints,
        last_error,
        last_change_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(url: &str, state: ConnectionState, err: Option<&str>) -> EndpointSnapshot {
        EndpointSnapshot { url: url.to_string(), state, last_error: err.map(str::to_string) }
    }

    #[test]
    fn connected_true_when_any_endpoint_open() {
        let snapshots = vec![snap("ws://a:1", ConnectionState::Closed, Some("x")), snap("ws://b:2", ConnectionState::Open, None)];
        let status = aggregate(&snapshots, None, "ws://localhost:8766", 0);
        assert!(status.connected);
        assert_eq!(status.ws_url.as_deref(), Some("ws://b:2"));
        assert_eq!(status.connected_endpoints, vec!["ws://b:2".to_string()]);
    }

    #[test]
    fn ws_url_falls_back_to_configured_head_then_default() {
        let none_open = vec![snap("ws://a:1", ConnectionState::Closed, None)];
        let status = aggregate(&none_open, Some("ws://configured:9"), "ws://localhost:8766", 0);
        assert_eq!(status.ws_url.as_deref(), Some("ws://configured:9"));

        let status = aggregate(&none_open, None, "ws://localhost:8766", 0);
        assert_eq!(status.ws_url.as_deref(), Some("ws://localhost:8766"));
    }

    #[test]
    fn disconnected_endpoints_carry_last_error() {
        let snapshots = vec![snap("ws://a:1", ConnectionState::Closed, Some("refused"))];
        let status = aggregate(&snapshots, None, "ws://localhost:8766", 0);
        assert_eq!(status.disconnected_endpoints[0].last_error.as_deref(), Some("refused"));
        assert_eq!(status.last_error.as_deref(), Some("refused"));
    }
}
