//! Logging initialization.
//!
//! Plain `tracing` + `tracing-subscriber` with an `EnvFilter`, no OTLP
//! exporter: this process has no distributed trace/metric consumer, so the
//! heavier collector pipeline the gateway uses elsewhere in this codebase
//! family would just be dead weight here.

use tracing_subscriber::EnvFilter;

pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
