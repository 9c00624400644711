//! Host-side boundary configuration for the bridge server and bridge client.
//!
//! Layered loading, later wins:
//! 1. Compiled defaults
//! 2. `/etc/bridge/config.toml` (system)
//! 3. `~/.config/bridge/config.toml` (user)
//! 4. `./bridge.toml` (local override, or a CLI-supplied path)
//! 5. Environment variables (`WS_HOST`, `WS_PORT`, `WS_ENDPOINT_HOSTS`)

pub mod wsl;

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8766;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_host")]
    pub host: String,
    #[serde(default = "BridgeConfig::default_port")]
    pub port: u16,
    /// Hosts to advertise in the externally-visible `ws://host:port`
    /// (e.g. in `NoClient` error messages). Empty means "use `127.0.0.1`".
    #[serde(default)]
    pub endpoint_hosts: Vec<String>,
    #[serde(default = "BridgeConfig::default_log_level")]
    pub log_level: String,
}

impl BridgeConfig {
    fn default_host() -> String {
        if wsl::is_wsl() { "0.0.0.0".to_string() } else { "127.0.0.1".to_string() }
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    /// The host to embed in externally-visible endpoint strings.
    pub fn external_host(&self) -> &str {
        self.endpoint_hosts.first().map(String::as_str).unwrap_or("127.0.0.1")
    }

    /// The externally-visible `ws://host:port` for this configuration.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.external_host(), self.port)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            endpoint_hosts: Vec::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Load configuration from all sources.
pub fn load() -> Result<BridgeConfig, ConfigError> {
    load_from(None)
}

/// Load configuration, optionally overriding the local config file path
/// (e.g. from a CLI `--config` flag).
pub fn load_from(cli_path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let mut config = BridgeConfig::default();
    for path in discover_config_files(cli_path) {
        let overlay = load_overlay_file(&path)?;
        apply_overlay(&mut config, overlay);
    }
    apply_env_overrides(&mut config);
    Ok(config)
}

fn discover_config_files(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/bridge/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("bridge/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("bridge.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// A config file's fields, left unset (`None`) where the file doesn't
/// mention them, so layering one file over another can tell "absent" from
/// "explicitly set to the default value".
#[derive(Debug, Default, Deserialize)]
struct BridgeConfigOverlay {
    host: Option<String>,
    port: Option<u16>,
    endpoint_hosts: Option<Vec<String>>,
    log_level: Option<String>,
}

/// Applies only the fields `overlay` actually set, leaving everything else
/// in `config` untouched — this is what makes layering later-wins per
/// field rather than later-file-replaces-everything.
fn apply_overlay(config: &mut BridgeConfig, overlay: BridgeConfigOverlay) {
    if let Some(host) = overlay.host {
        config.host = host;
    }
    if let Some(port) = overlay.port {
        config.port = port;
    }
    if let Some(endpoint_hosts) = overlay.endpoint_hosts {
        config.endpoint_hosts = endpoint_hosts;
    }
    if let Some(log_level) = overlay.log_level {
        config.log_level = log_level;
    }
}

fn load_overlay_file(path: &Path) -> Result<BridgeConfigOverlay, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })
}

/// Parses a single file in isolation, with every unset field falling back
/// to the compiled default rather than an earlier layer. Used directly by
/// callers that want to inspect one file's effective config on its own.
fn load_from_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let mut config = BridgeConfig::default();
    apply_overlay(&mut config, load_overlay_file(path)?);
    Ok(config)
}

/// Applies `WS_HOST` / `WS_PORT` / `WS_ENDPOINT_HOSTS` over a config already
/// loaded from files. `RUST_LOG` sets the log level; `BRIDGE_LOG` overrides
/// it when both are set.
pub fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(v) = env::var("WS_HOST") {
        config.host = v;
    }
    if let Ok(v) = env::var("WS_PORT") {
        match v.parse::<u16>() {
            Ok(port) if port >= 1 => config.port = port,
            _ => config.port = BridgeConfig::default_port(),
        }
    }
    if let Ok(v) = env::var("WS_ENDPOINT_HOSTS") {
        config.endpoint_hosts = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.log_level = v;
    }
    if let Ok(v) = env::var("BRIDGE_LOG") {
        config.log_level = v;
    }
}
