//! Tool-call facade.
//!
//! This is the thin request layer between an MCP host and the dispatcher:
//! it validates arguments, clamps numeric ranges, defaults booleans, and
//! rejects malformed URLs before handing a call off to
//! [`crate::dispatcher::Dispatcher::call`]. Wiring an actual MCP stdio
//! transport to this trait is explicitly out of scope — that
//! adapter is a thin wrapper the host process supplies elsewhere.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bridge_proto::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::Dispatcher;

fn default_true() -> bool {
    true
}

fn clamp_u64(value: u64, min: u64, max: u64) -> u64 {
    value.clamp(min, max)
}

fn clamp_u32(value: u32, min: u32, max: u32) -> u32 {
    value.clamp(min, max)
}

/// `match` enum for tab lookup: falls back to `Prefix` on any other value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Prefix,
    Exact,
}

impl Default for MatchMode {
    fn default() -> Self {
        MatchMode::Prefix
    }
}

impl MatchMode {
    fn from_str_or_default(s: &str) -> Self {
        match s {
            "exact" => MatchMode::Exact,
            _ => MatchMode::Prefix,
        }
    }
}

/// `format` enum for screenshots: falls back to `Png` on any other value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    fn from_str_or_default(s: &str) -> Self {
        match s {
            "jpeg" => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        }
    }
}

/// `returnMode` enum for screenshots: falls back to `Artifact` on any other value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnMode {
    Artifact,
    Image,
}

impl ReturnMode {
    fn from_str_or_default(s: &str) -> Self {
        match s {
            "image" => ReturnMode::Image,
            _ => ReturnMode::Artifact,
        }
    }
}

const OPEN_URL_TIMEOUT_MIN_MS: u64 = 1_000;
const OPEN_URL_TIMEOUT_MAX_MS: u64 = 120_000;
const OPEN_URL_TIMEOUT_DEFAULT_MS: u64 = 15_000;

const SCREENSHOT_EXTRA_WAIT_MIN_MS: u64 = 0;
const SCREENSHOT_EXTRA_WAIT_MAX_MS: u64 = 10_000;
const SCREENSHOT_EXTRA_WAIT_DEFAULT_MS: u64 = 250;

const JPEG_QUALITY_MIN: u32 = 0;
const JPEG_QUALITY_MAX: u32 = 100;
const JPEG_QUALITY_DEFAULT: u32 = 80;

const ARTIFACT_MAX_AGE_MIN_HOURS: u64 = 1;
const ARTIFACT_MAX_AGE_MAX_HOURS: u64 = 87_600;
const ARTIFACT_MAX_AGE_DEFAULT_HOURS: u64 = 24;

fn default_open_url() -> String {
    "http://localhost:5173/".to_string()
}

/// Raw, loosely-typed request body for `open_url`/`screenshot`, mirroring
/// what arrives over the MCP boundary before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNavigationArgs {
    url: Option<String>,
    #[serde(rename = "match")]
    match_mode: Option<String>,
    reuse_if_exists: Option<bool>,
    open_if_missing: Option<bool>,
    focus_window: Option<bool>,
    activate_tab: Option<bool>,
    wait_for_complete: Option<bool>,
    timeout_ms: Option<u64>,
    extra_wait_ms: Option<u64>,
    format: Option<String>,
    jpeg_quality: Option<u32>,
    return_mode: Option<String>,
    artifact_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenUrlArgs {
    pub url: String,
    pub match_mode: MatchMode,
    pub reuse_if_exists: bool,
    pub open_if_missing: bool,
    pub focus_window: bool,
    pub activate_tab: bool,
    pub wait_for_complete: bool,
    pub timeout_ms: u64,
}

impl OpenUrlArgs {
    pub fn validate(raw: Value) -> Result<Self, BridgeError> {
        let raw: RawNavigationArgs = serde_json::from_value(raw)
            .map_err(|e| BridgeError::invalid_url(format!("invalid open_url arguments: {e}")))?;
        let url = raw.url.unwrap_or_else(default_open_url);
        validate_url(&url)?;
        Ok(Self {
            url,
            match_mode: raw.match_mode.as_deref().map(MatchMode::from_str_or_default).unwrap_or_default(),
            reuse_if_exists: raw.reuse_if_exists.unwrap_or(true),
            open_if_missing: raw.open_if_missing.unwrap_or(true),
            focus_window: raw.focus_window.unwrap_or(true),
            activate_tab: raw.activate_tab.unwrap_or(true),
            wait_for_complete: raw.wait_for_complete.unwrap_or(true),
            timeout_ms: clamp_u64(
                raw.timeout_ms.unwrap_or(OPEN_URL_TIMEOUT_DEFAULT_MS),
                OPEN_URL_TIMEOUT_MIN_MS,
                OPEN_URL_TIMEOUT_MAX_MS,
            ),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotArgs {
    pub url: String,
    pub match_mode: MatchMode,
    pub open_if_missing: bool,
    pub focus_window: bool,
    pub activate_tab: bool,
    pub wait_for_complete: bool,
    pub timeout_ms: u64,
    pub extra_wait_ms: u64,
    pub format: ImageFormat,
    pub jpeg_quality: u32,
    pub return_mode: ReturnMode,
    pub artifact_dir: Option<PathBuf>,
}

impl ScreenshotArgs {
    pub fn validate(raw: Value) -> Result<Self, BridgeError> {
        let raw: RawNavigationArgs = serde_json::from_value(raw)
            .map_err(|e| BridgeError::invalid_url(format!("invalid screenshot arguments: {e}")))?;
        let url = raw.url.unwrap_or_else(default_open_url);
        validate_url(&url)?;
        Ok(Self {
            url,
            match_mode: raw.match_mode.as_deref().map(MatchMode::from_str_or_default).unwrap_or_default(),
            open_if_missing: raw.open_if_missing.unwrap_or(true),
            focus_window: raw.focus_window.unwrap_or(true),
            activate_tab: raw.activate_tab.unwrap_or(true),
            wait_for_complete: raw.wait_for_complete.unwrap_or(true),
            timeout_ms: clamp_u64(
                raw.timeout_ms.unwrap_or(OPEN_URL_TIMEOUT_DEFAULT_MS),
                OPEN_URL_TIMEOUT_MIN_MS,
                OPEN_URL_TIMEOUT_MAX_MS,
            ),
            extra_wait_ms: clamp_u64(
                raw.extra_wait_ms.unwrap_or(SCREENSHOT_EXTRA_WAIT_DEFAULT_MS),
                SCREENSHOT_EXTRA_WAIT_MIN_MS,
                SCREENSHOT_EXTRA_WAIT_MAX_MS,
            ),
            format: raw.format.as_deref().map(ImageFormat::from_str_or_default).unwrap_or(ImageFormat::Png),
            jpeg_quality: clamp_u32(raw.jpeg_quality.unwrap_or(JPEG_QUALITY_DEFAULT), JPEG_QUALITY_MIN, JPEG_QUALITY_MAX),
            return_mode: raw.return_mode.as_deref().map(ReturnMode::from_str_or_default).unwrap_or(ReturnMode::Artifact),
            artifact_dir: raw.artifact_dir.map(PathBuf::from),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifactCleanupArgs {
    max_age_hours: Option<u64>,
    artifact_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactCleanupArgs {
    pub max_age_hours: u64,
    pub artifact_dir: Option<PathBuf>,
}

impl ArtifactCleanupArgs {
    pub fn validate(raw: Value) -> Result<Self, BridgeError> {
        let raw: RawArtifactCleanupArgs = serde_json::from_value(raw)
            .map_err(|e| BridgeError::invalid_url(format!("invalid artifact_cleanup arguments: {e}")))?;
        Ok(Self {
            max_age_hours: clamp_u64(
                raw.max_age_hours.unwrap_or(ARTIFACT_MAX_AGE_DEFAULT_HOURS),
                ARTIFACT_MAX_AGE_MIN_HOURS,
                ARTIFACT_MAX_AGE_MAX_HOURS,
            ),
            artifact_dir: raw.artifact_dir.map(PathBuf::from),
        })
    }
}

fn validate_url(raw: &str) -> Result<(), BridgeError> {
    url::Url::parse(raw).map_err(|e| BridgeError::invalid_url(format!("{raw}: {e}")))?;
    Ok(())
}

/// The four tool operations exposed to the MCP host.
#[async_trait]
pub trait ToolFacade: Send + Sync {
    async fn list_tabs(&self) -> Result<Value, BridgeError>;
    async fn open_url(&self, args: OpenUrlArgs) -> Result<Value, BridgeError>;
    async fn screenshot(&self, args: ScreenshotArgs) -> Result<Value, BridgeError>;
    async fn artifact_cleanup(&self, args: ArtifactCleanupArgs) -> Result<Value, BridgeError>;
}

/// Default facade: `list_tabs`/`open_url`/`screenshot` forward to the
/// dispatcher as wire commands; `artifact_cleanup` never
/// crosses the wire (it manages files written by the out-of-scope
/// artifact-writing collaborator) and is handled locally.
pub struct DispatcherFacade {
    dispatcher: std::sync::Arc<Dispatcher>,
}

impl DispatcherFacade {
    pub fn new(dispatcher: std::sync::Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ToolFacade for DispatcherFacade {
    async fn list_tabs(&self) -> Result<Value, BridgeError> {
        self.dispatcher.call("listTabs", Value::Object(Default::default()), OPEN_URL_TIMEOUT_DEFAULT_MS).await
    }

    async fn open_url(&self, args: OpenUrlArgs) -> Result<Value, BridgeError> {
        let timeout_ms = args.timeout_ms;
        let params = serde_json::to_value(&args).map_err(|e| BridgeError::invalid_url(e.to_string()))?;
        self.dispatcher.call("openUrl", params, timeout_ms).await
    }

    async fn screenshot(&self, args: ScreenshotArgs) -> Result<Value, BridgeError> {
        let timeout_ms = args.timeout_ms;
        let params = serde_json::to_value(&args).map_err(|e| BridgeError::invalid_url(e.to_string()))?;
        self.dispatcher.call("screenshot", params, timeout_ms).await
    }

    async fn artifact_cleanup(&self, args: ArtifactCleanupArgs) -> Result<Value, BridgeError> {
        run_artifact_cleanup(args)
    }
}

fn run_artifact_cleanup(args: ArtifactCleanupArgs) -> Result<Value, BridgeError> {
    let dir = match args.artifact_dir {
        Some(dir) => dir,
        None => std::env::temp_dir().join("bridge-artifacts"),
    };

    let cutoff = Duration::from_secs(args.max_age_hours * 3600);
    let now = SystemTime::now();
    let (mut removed_count, mut removed_bytes) = (0u64, 0u64);

    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if age >= cutoff {
                let len = metadata.len();
                if remove_file(&path).is_ok() {
                    removed_count += 1;
                    removed_bytes += len;
                }
            }
        }
    }

    Ok(serde_json::json!({
        "removedCount": removed_count,
        "removedBytes": removed_bytes,
        "artifactDir": dir.to_string_lossy(),
    }))
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_url_defaults_are_applied() {
        let args = OpenUrlArgs::validate(serde_json::json!({})).unwrap();
        assert_eq!(args.url, "http://localhost:5173/");
        assert_eq!(args.match_mode, MatchMode::Prefix);
        assert!(args.reuse_if_exists);
        assert_eq!(args.timeout_ms, 15_000);
    }

    #[test]
    fn open_url_rejects_malformed_url() {
        let err = OpenUrlArgs::validate(serde_json::json!({"url": "not a url"})).unwrap_err();
        assert!(!err.retryable());
    }

    #[test]
    fn open_url_timeout_clamp_is_idempotent_and_monotone() {
        let too_low = OpenUrlArgs::validate(serde_json::json!({"timeoutMs": 1})).unwrap();
        let too_high = OpenUrlArgs::validate(serde_json::json!({"timeoutMs": 999_999})).unwrap();
        assert_eq!(too_low.timeout_ms, 1_000);
        assert_eq!(too_high.timeout_ms, 120_000);

        // idempotent: clamping an already-clamped value changes nothing
        let reclamped = clamp_u64(too_low.timeout_ms, OPEN_URL_TIMEOUT_MIN_MS, OPEN_URL_TIMEOUT_MAX_MS);
        assert_eq!(reclamped, too_low.timeout_ms);
    }

    #[test]
    fn invalid_match_mode_falls_back_to_prefix() {
        let args = OpenUrlArgs::validate(serde_json::json!({"match": "bogus"})).unwrap();
        assert_eq!(args.match_mode, MatchMode::Prefix);
    }

    #[test]
    fn invalid_return_mode_falls_back_to_artifact() {
        let args = ScreenshotArgs::validate(serde_json::json!({"returnMode": "bogus"})).unwrap();
        assert_eq!(args.return_mode, ReturnMode::Artifact);
    }

    #[test]
    fn jpeg_quality_clamps_into_range() {
        let args = ScreenshotArgs::validate(serde_json::json!({"jpegQuality": 500})).unwrap();
        assert_eq!(args.jpeg_quality, 100);
    }

    #[test]
    fn artifact_cleanup_clamps_max_age_hours() {
        let args = ArtifactCleanupArgs::validate(serde_json::json!({"maxAgeHours": 0})).unwrap();
        assert_eq!(args.max_age_hours, 1);
        let args = ArtifactCleanupArgs::validate(serde_json::json!({"maxAgeHours": 999_999})).unwrap();
        assert_eq!(args.max_age_hours, 87_600);
    }

    #[test]
    fn artifact_cleanup_on_missing_dir_returns_zero_counts() {
        let args = ArtifactCleanupArgs { max_age_hours: 24, artifact_dir: Some(PathBuf::from("/nonexistent/bridge-artifacts-test-dir")) };
        let result = run_artifact_cleanup(args).unwrap();
        assert_eq!(result["removedCount"], 0);
    }
}
