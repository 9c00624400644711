//! Candidate endpoint resolution.
//!
//! Turns an optional user-configured URL (possibly a comma-separated list)
//! plus a default port sweep into an ordered, deduplicated candidate list,
//! with the sticky endpoint (if any) moved to the head.

use std::collections::HashSet;

pub const DEFAULT_SWEEP_PORT_START: u16 = 8766;
pub const DEFAULT_SWEEP_PORT_END_EXCLUSIVE: u16 = 8776;
pub const DEFAULT_SWEEP_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "wsl.localhost"];

/// The single-endpoint default that must not itself be treated as a seed,
/// so the default sweep runs unimpeded when the user hasn't configured
/// anything.
pub const UNSEEDED_DEFAULT_URL: &str = "ws://localhost:8766";

/// Canonicalizes a single `ws://host:port` endpoint string: strips
/// path/query/fragment, normalizes a trailing slash, and requires an
/// explicit `ws`/`wss` scheme and port.
///
/// `normalize(normalize(u)) == normalize(u)` for any `u` that parses.
pub fn normalize(raw: &str) -> Result<String, String> {
    let url = url::Url::parse(raw.trim()).map_err(|e| format!("{raw}: {e}"))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(format!("{raw}: unsupported scheme {other}")),
    }
    let host = url.host_str().ok_or_else(|| format!("{raw}: missing host"))?;
    let port = url.port().ok_or_else(|| format!("{raw}: missing explicit port"))?;
    Ok(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Expands a normalized `scheme://host:port` endpoint into its host
/// equivalents: `0.0.0.0` expands to `{localhost, 127.0.0.1,
/// wsl.localhost}`; `localhost`/`127.0.0.1` cross-expand and both also add
/// `wsl.localhost`. Other hosts are returned unchanged (just themselves).
pub fn host_equivalents(endpoint: &str) -> Vec<String> {
    let Some((scheme_host, port)) = endpoint.rsplit_once(':') else {
        return vec![endpoint.to_string()];
    };
    let Some((scheme, host)) = scheme_host.split_once("://") else {
        return vec![endpoint.to_string()];
    };

    let hosts: Vec<&str> = match host {
        "0.0.0.0" => vec!["localhost", "127.0.0.1", "wsl.localhost"],
        "localhost" => vec!["localhost", "127.0.0.1", "wsl.localhost"],
        "127.0.0.1" => vec!["127.0.0.1", "localhost", "wsl.localhost"],
        other => vec![other],
    };

    hosts.into_iter().map(|h| format!("{scheme}://{h}:{port}")).collect()
}

/// Parses a user-configured URL setting, which may be a comma-separated
/// list, into a list of seed endpoints with their host equivalents
/// expanded. Invalid entries are dropped (and would be logged by the
/// caller); an entirely empty/invalid setting yields no seeds.
fn parse_seeds(user_configured: &str) -> Vec<String> {
    let mut seeds = Vec::new();
    for entry in user_configured.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Ok(normalized) = normalize(entry) {
            seeds.extend(host_equivalents(&normalized));
        }
    }
    seeds
}

fn default_sweep() -> Vec<String> {
    let mut sweep = Vec::new();
    for port in DEFAULT_SWEEP_PORT_START..DEFAULT_SWEEP_PORT_END_EXCLUSIVE {
        for host in DEFAULT_SWEEP_HOSTS {
            sweep.push(format!("ws://{host}:{port}"));
        }
    }
    sweep
}

fn dedupe_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

/// Resolves the full ordered candidate endpoint list.
///
/// `user_configured` is the raw setting from durable KV (may be
/// comma-separated, or `None`/empty for "not configured"). `sticky` is the
/// last endpoint that reached OPEN, if known; it's moved to the head.
pub fn resolve_candidates(user_configured: Option<&str>, sticky: Option<&str>) -> Vec<String> {
    let mut candidates = Vec::new();

    let is_unseeded_default =
        user_configured.map(|u| u.trim() == UNSEEDED_DEFAULT_URL).unwrap_or(true);

    if let Some(user_configured) = user_configured {
        if !is_unseeded_default && !user_configured.trim().is_empty() {
            candidates.extend(parse_seeds(user_configured));
        }
    }

    candidates.extend(default_sweep());
    let mut candidates = dedupe_preserving_order(candidates);

    if let Some(sticky) = sticky {
        if let Ok(sticky) = normalize(sticky) {
            if let Some(pos) = candidates.iter().position(|c| *c == sticky) {
                candidates.remove(pos);
            }
            candidates.insert(0, sticky);
        }
    }

    candidates
}
