//! huginn: command-line probe for the execution layer.
//!
//! Runs JSON-RPC calls through a fully configured client and prints the
//! results with the client's health snapshot.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;

use huginn::{CallDescriptor, Config, HuginnBuilder};

/// Huginn resilient remote-call probe
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Resilient remote-call execution layer")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a JSON-RPC call through the layer
    Call {
        /// RPC method, e.g. eth_blockNumber
        method: String,
        /// Params as a JSON array (or omit to read from stdin)
        params: Option<String>,
        /// Logical target scoping the cache key
        #[arg(short, long, default_value = "rpc")]
        target: String,
        /// Issue the call this many times concurrently
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,
        /// Dispatch priority (higher first)
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
        /// Cache TTL in milliseconds (0 disables caching)
        #[arg(long)]
        ttl_ms: Option<u64>,
        /// Pin the first attempt by routing key
        #[arg(long)]
        routing_key: Option<String>,
    },

    /// Print the resolved configuration and an idle client's stats
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    info!(version = huginn::version_string(), service = %config.service, "huginn starting");

    match args.command {
        Command::Call {
            method,
            params,
            target,
            repeat,
            priority,
            ttl_ms,
            routing_key,
        } => {
            let params = parse_params(resolve_params(params)?)?;
            let client = HuginnBuilder::from_config(&config)?.build()?;

            let mut call = CallDescriptor::new(target, method)
                .args(params)
                .priority(priority);
            if let Some(ms) = ttl_ms {
                call = call.cache_ttl(Duration::from_millis(ms));
            }
            if let Some(key) = routing_key {
                call = call.routing_key(key);
            }

            let results = if repeat <= 1 {
                vec![client.execute(call).await?]
            } else {
                client.execute_batch(vec![call; repeat]).await?
            };

            let output = json!({
                "results": results,
                "stats": client.stats().await,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Stats => {
            let stats = match HuginnBuilder::from_config(&config) {
                Ok(builder) => Some(builder.build()?.stats().await),
                Err(_) => None,
            };
            let output = json!({
                "version": huginn::version_string(),
                "config": config,
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Params from the argument, else from piped stdin, else none.
fn resolve_params(arg: Option<String>) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if arg.is_some() {
        return Ok(arg);
    }
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    let trimmed = buf.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// A JSON array becomes the argument list; any other value a single argument.
fn parse_params(raw: Option<String>) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| format!("params are not valid JSON: {e}"))?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}
