//! bridge-server - WebSocket dispatcher for the MCP-to-browser-extension bridge
//!
//! Subcommands:
//! - `bridge-server serve` - bind the WebSocket listener and ambient status HTTP server
//! - `bridge-server call` - invoke a single tool against the running dispatcher (debugging)
//! - `bridge-server show-config` - print the resolved configuration and exit
//!
//! Configuration is loaded from (in order, later wins):
//! 1. Compiled defaults
//! 2. /etc/bridge/config.toml
//! 3. ~/.config/bridge/config.toml
//! 4. ./bridge.toml (or --config path)
//! 5. Environment variables (WS_HOST, WS_PORT, WS_ENDPOINT_HOSTS)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bridge_server::facade::{ArtifactCleanupArgs, OpenUrlArgs, ScreenshotArgs};
use bridge_server::{Dispatcher, DispatcherConfig, DispatcherFacade, ToolFacade};

#[derive(Parser)]
#[command(name = "bridge-server")]
#[command(about = "WebSocket dispatcher for the MCP-to-browser-extension bridge")]
#[command(version)]
struct Cli {
    /// Path to config file (overrides ./bridge.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind the WebSocket listener and wait for connections
    Serve {
        /// Also serve /health and /status over HTTP on this port
        #[arg(long)]
        http_port: Option<u16>,
    },

    /// Call a tool against a dispatcher in this process (for local testing;
    /// the dispatcher is freshly started and has no time to accumulate
    /// clients, so this will usually return NoClient)
    Call {
        #[command(subcommand)]
        tool: ToolCall,
    },

    /// Print the resolved configuration and exit
    ShowConfig,
}

#[derive(Subcommand)]
enum ToolCall {
    ListTabs,
    OpenUrl {
        url: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    Screenshot {
        url: String,
    },
    ArtifactCleanup {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::ShowConfig) {
        let config = bridge_config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
        println!("{}", toml::to_string_pretty(&config).unwrap_or_default());
        return Ok(());
    }

    let config = bridge_config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    bridge_server::logging::init(&config.log_level);

    let dispatcher = Dispatcher::new(DispatcherConfig::from_bridge_config(&config));

    match cli.command {
        Commands::Serve { http_port } => {
            let addr = dispatcher.start().await.context("failed to start dispatcher")?;
            tracing::info!(%addr, url = %dispatcher.external_ws_url(), "bridge-server listening");

            if let Some(port) = http_port {
                let http_dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    if let Err(err) = bridge_server::http::serve(http_dispatcher, port).await {
                        tracing::warn!(%err, "status http server exited");
                    }
                });
            }

            tokio::signal::ctrl_c().await.ok();
            dispatcher.stop().await;
        }
        Commands::Call { tool } => {
            dispatcher.start().await.context("failed to start dispatcher")?;
            let facade = DispatcherFacade::new(Arc::clone(&dispatcher));
            let result = run_tool_call(&facade, tool).await;
            dispatcher.stop().await;
            match result {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::ShowConfig => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_tool_call(facade: &DispatcherFacade, tool: ToolCall) -> Result<serde_json::Value, bridge_proto::BridgeError> {
    match tool {
        ToolCall::ListTabs => facade.list_tabs().await,
        ToolCall::OpenUrl { url, timeout_ms } => {
            let mut raw = serde_json::json!({ "url": url });
            if let Some(timeout_ms) = timeout_ms {
                raw["timeoutMs"] = serde_json::json!(timeout_ms);
            }
            let args = OpenUrlArgs::validate(raw)?;
            facade.open_url(args).await
        }
        ToolCall::Screenshot { url } => {
            let args = ScreenshotArgs::validate(serde_json::json!({ "url": url }))?;
            facade.screenshot(args).await
        }
        ToolCall::ArtifactCleanup { max_age_hours } => {
            let mut raw = serde_json::json!({});
            if let Some(max_age_hours) = max_age_hours {
                raw["maxAgeHours"] = serde_json::json!(max_age_hours);
            }
            let args = ArtifactCleanupArgs::validate(raw)?;
            facade.artifact_cleanup(args).await
        }
    }
}
