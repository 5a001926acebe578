//! Command-line front end for the resilient remote client.
//!
//! Sends one request through the circuit breaker and retry loop and prints
//! the decoded response envelope.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use resilient_remote::config::{load_config, ClientConfig};
use resilient_remote::http::{CallContext, OutboundRequest, RemoteClient};
use resilient_remote::observability::logging;

#[derive(Parser)]
#[command(name = "resilient-remote")]
#[command(about = "Call a downstream service through a circuit breaker", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Per-attempt timeout in milliseconds (overrides the config file)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Forward proxy URL (overrides the config file)
    #[arg(long)]
    proxy: Option<String>,

    /// Continue an existing trace (W3C traceparent value)
    #[arg(long)]
    traceparent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request
    Get { url: String },
    /// Send a POST request with a JSON body
    Post {
        url: String,
        #[arg(short, long, default_value = "{}")]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(ms) = cli.timeout {
        config.timeouts.request_ms = ms;
    }
    if let Some(proxy) = cli.proxy {
        config.proxy.url = Some(proxy);
    }

    logging::init(&config.observability.log_level)?;

    tracing::info!(
        target_name = %config.breaker.name,
        request_timeout_ms = config.timeouts.request_ms,
        proxy = ?config.proxy.url,
        "Configuration loaded"
    );

    let client = RemoteClient::from_config(&config)?;

    let request = match cli.command {
        Commands::Get { url } => OutboundRequest::get(&url)?,
        Commands::Post { url, body } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            OutboundRequest::post(&url)?.json(&body)?
        }
    };

    let cancel = CancellationToken::new();
    let mut ctx = CallContext::new().with_cancellation(cancel.clone());
    if let Some(traceparent) = &cli.traceparent {
        ctx = ctx.with_traceparent(traceparent);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, cancelling call");
            cancel.cancel();
        }
    });

    let started = std::time::Instant::now();
    let envelope = client.call(&ctx, request).await?;

    tracing::info!(
        error_code = envelope.error_code,
        elapsed_ms = started.elapsed().as_millis() as u64,
        breaker_state = %client.breaker().state(),
        "Call complete"
    );
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if !envelope.is_success() {
        std::process::exit(2);
    }
    Ok(())
}
