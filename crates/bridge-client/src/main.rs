//! bridge-client - browser-extension-side supervisor for the bridge
//!
//! Subcommands:
//! - `bridge-client run` - resolve candidate endpoints and maintain
//!   connections until interrupted
//! - `bridge-client status` - print the current aggregate status once and
//!   exit (useful for smoke-testing against a short-lived `run`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bridge_client::kvstore::FileKv;
use bridge_client::{KvStore, StubBrowserOps, Supervisor, SupervisorConfig};

#[derive(Parser)]
#[command(name = "bridge-client")]
#[command(about = "Browser-extension-side supervisor for the bridge")]
#[command(version)]
struct Cli {
    /// Comma-separated user-configured endpoint URL(s), e.g. ws://localhost:8766
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the supervisor and hold connections open until Ctrl-C
    Run,
    /// Start the supervisor, wait briefly, print status once, and exit
    Status {
        #[arg(long, default_value_t = 2_000)]
        settle_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = std::env::var("BRIDGE_LOG").or_else(|_| std::env::var("RUST_LOG")).unwrap_or_else(|_| "info".to_string());
    bridge_client::logging::init(&log_level);

    let kv: Arc<dyn KvStore> = match FileKv::default_path() {
        Some(path) => Arc::new(FileKv::new(path)),
        None => Arc::new(bridge_client::kvstore::MemoryKv::default()),
    };

    let config = SupervisorConfig {
        user_configured_url: cli.url,
        browser: Arc::new(StubBrowserOps),
        kv,
        extension_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let supervisor = Supervisor::start(config).await;

    match cli.command {
        Commands::Run => {
            tokio::signal::ctrl_c().await.ok();
            supervisor.stop().await;
        }
        Commands::Status { settle_ms } => {
            tokio::time::sleep(Duration::from_millis(settle_ms)).await;
            let status = supervisor.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            supervisor.stop().await;
        }
    }

    Ok(())
}
