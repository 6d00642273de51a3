//! signal-bridge - send, receive and wait for Signal messages from an agent.
//!
//! Talks to a running `signal-cli daemon --tcp` over JSON-RPC.
//!
//! CHANGELOG:
//! - 10/19/2026 - `call` subcommand for one-off tool calls
//! - 10/19/2026 - Initial scaffold with CLI skeleton

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use signal_bridge::daemon::server::ToolServer;
use signal_bridge::daemon::service::ToolService;
use signal_bridge::identity::{default_cache_path, IdentityCache, ParticipantRef};
use signal_bridge::output::{format_error, OutputControls};
use signal_bridge::{BridgeConfig, SignalBridge};

/// Agent-facing bridge to the signal-cli daemon.
#[derive(Parser, Debug)]
#[command(name = "signal-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Compact JSON output (no whitespace)
    #[arg(long, global = true)]
    compact: bool,

    /// Truncate text fields to this length
    #[arg(long, global = true)]
    max_text_chars: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve NDJSON tool calls on stdin, responses on stdout
    Serve {
        #[command(flatten)]
        config: BridgeConfig,
    },

    /// Run a single tool call and print its result
    Call {
        #[command(flatten)]
        config: BridgeConfig,

        /// Tool name (e.g. send_message_to_user, wait_for_message)
        tool: String,

        /// Tool parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
    },

    /// Inspect the identity cache
    Cache {
        /// Cache file (default: $SIGNAL_BRIDGE_CACHE_PATH or the platform data dir)
        #[arg(long)]
        cache_path: Option<String>,

        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List every known id/handle pairing
    List,
    /// Show how a participant reference resolves
    Resolve {
        /// Phone number, opaque id or username
        reference: String,
    },
    /// Print the resolved cache path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries tool output.
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let output_controls = OutputControls {
        compact: cli.compact,
        max_text_chars: cli.max_text_chars,
    };

    let result = match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::Call {
            config,
            tool,
            params,
        } => call(config, &tool, &params, &output_controls).await,
        Command::Cache { cache_path, action } => cache(cache_path, action, &output_controls),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", format_error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: BridgeConfig) -> Result<()> {
    let bridge = Arc::new(SignalBridge::start(config).await);
    let server = ToolServer::new(ToolService::new(Arc::clone(&bridge)));

    let served = tokio::select! {
        served = server.serve_stdio() => served,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    };

    bridge.shutdown().await;
    served
}

async fn call(
    config: BridgeConfig,
    tool: &str,
    params: &str,
    output: &OutputControls,
) -> Result<()> {
    if !ToolService::handles(tool) {
        anyhow::bail!("Unknown tool: {}", tool);
    }
    let params: HashMap<String, Value> =
        serde_json::from_str(params).context("params must be a JSON object")?;

    let bridge = Arc::new(SignalBridge::start(config).await);
    let service = ToolService::new(Arc::clone(&bridge));
    let result = service.dispatch(tool, params).await;
    bridge.shutdown().await;

    output.print(&result?);
    Ok(())
}

fn cache(cache_path: Option<String>, action: CacheAction, output: &OutputControls) -> Result<()> {
    let path: PathBuf = match cache_path {
        Some(path) => shellexpand::tilde(&path).to_string().into(),
        None => default_cache_path(),
    };

    match action {
        CacheAction::Path => output.print(&json!({ "path": path })),
        CacheAction::List => {
            let cache = IdentityCache::load(&path);
            let entries: Vec<Value> = cache
                .entries()
                .into_iter()
                .map(|(id, handle)| json!({ "id": id, "handle": handle }))
                .collect();
            output.print(&json!({ "count": entries.len(), "entries": entries }));
        }
        CacheAction::Resolve { reference } => {
            let cache = IdentityCache::load(&path);
            let parsed = ParticipantRef::parse(&reference);
            let kind = match parsed {
                ParticipantRef::OpaqueId(_) => "opaque_id",
                ParticipantRef::Phone(_) => "phone",
                ParticipantRef::Name(_) => "name",
            };
            let normalized = parsed.clone().normalize(&cache);
            let handle = match &normalized {
                ParticipantRef::OpaqueId(id) => cache.name_for(id),
                _ => None,
            };
            output.print(&json!({
                "reference": reference,
                "kind": kind,
                "resolved": normalized.as_str(),
                "handle": handle,
                "cached": normalized != parsed || handle.is_some(),
            }));
        }
    }
    Ok(())
}
