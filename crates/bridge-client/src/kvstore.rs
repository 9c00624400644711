//! Durable key-value storage for the sticky endpoint and user-configured
//! URL.
//!
//! A single-writer, best-effort abstraction: a write failure is logged and
//! swallowed rather than propagated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const STICKY_ENDPOINT_KEY: &str = "stickyEndpoint";
pub const USER_CONFIGURED_URL_KEY: &str = "userConfiguredUrl";

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// A single-file JSON-backed store. Reads/writes the whole file each time;
/// the key space here is tiny (two keys) so this is simpler than a real
/// embedded database and sufficient for a single-writer process.
pub struct FileKv {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

#[derive(Default, Serialize, Deserialize)]
struct FileContents(HashMap<String, String>);

impl FileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = Self::load(&path).unwrap_or_default();
        Self { path, cache: Mutex::new(cache) }
    }

    /// Default path, mirroring this family's XDG-style config directory
    /// layout (`~/.config/bridge-client/state.json`).
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| d.config_dir().join("bridge-client").join("state.json"))
    }

    fn load(path: &Path) -> Option<HashMap<String, String>> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str::<FileContents>(&contents).ok().map(|c| c.0)
    }

    fn persist(&self, map: &HashMap<String, String>) {
        let Some(parent) = self.path.parent() else { return };
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!(%err, path = %self.path.display(), "failed to create kv store directory, dropping write");
            return;
        }
        match serde_json::to_string(&FileContents(map.clone())) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    warn!(%err, path = %self.path.display(), "failed to write kv store, dropping write");
                }
            }
            Err(err) => warn!(%err, "failed to serialize kv store, dropping write"),
        }
    }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(key.to_string(), value.to_string());
        self.persist(&cache);
    }
}

/// In-memory store for tests and for embedding when persistence isn't wanted.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
    }
}
