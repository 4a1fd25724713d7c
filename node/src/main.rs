// Copyright (c) 2026 Gavel Systems. MIT License.
// See LICENSE for details.

//! # Gavel Settlement Node
//!
//! Entry point for the `gavel-node` binary. Parses CLI arguments,
//! initializes logging and metrics, builds the wallet ledger and auction
//! house, starts the deadline sweep loop, and serves the HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     - start the settlement node
//! - `status`  - query a running node's status endpoint
//! - `version` - print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod sweep;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;

use gavel_core::ledger::WalletLedger;
use gavel_market::escrow::ReofferPricing;
use gavel_market::house::{AuctionHouse, MarketConfig};

use api::BroadcastNotifier;
use cli::{Commands, GavelNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming. Large enough to
/// absorb a burst of sweep-driven transitions without dropping events for
/// connected WebSocket clients.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GavelNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full settlement node: engine, sweep loop, and API server.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "gavel_node=info,gavel_market=info,gavel_core=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        sweep_interval_secs = args.sweep_interval_secs,
        deposit_grace_secs = args.deposit_grace_secs,
        payment_grace_secs = ?args.payment_grace_secs,
        "starting gavel-node"
    );

    // --- Engine configuration ---
    let config = MarketConfig {
        deposit_grace: Duration::from_secs(args.deposit_grace_secs),
        payment_grace: args.payment_grace_secs.map(Duration::from_secs),
        reoffer_pricing: if args.rebase_reoffer_price {
            ReofferPricing::CandidateOwnBid
        } else {
            ReofferPricing::OriginalFinalPrice
        },
        ..Default::default()
    };

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Engine ---
    let ledger = Arc::new(WalletLedger::new());
    let notifier = Arc::new(BroadcastNotifier::new(
        event_tx.clone(),
        Arc::clone(&node_metrics),
    ));
    let house = Arc::new(AuctionHouse::new(Arc::clone(&ledger), notifier, config));

    // --- Deadline sweep ---
    let sweeper = sweep::spawn_sweeper(
        Arc::clone(&house),
        Arc::clone(&node_metrics),
        Duration::from_secs(args.sweep_interval_secs),
    );

    // --- Application state & API server ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: chrono::Utc::now(),
        house,
        ledger,
        event_tx,
        metrics: node_metrics,
    };
    let router = api::create_router(app_state);

    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    tokio::select! {
        res = axum::serve(listener, router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    sweeper.abort();
    tracing::info!("gavel-node stopped");
    Ok(())
}

/// Queries a running node's status endpoint and prints the JSON body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let (host, port, path) = parse_status_url(&args.url)?;
    let body = http_get(&host, port, &path).await?;
    println!("{}", body);
    Ok(())
}

/// Splits `http://host:port` into connect parameters for the raw GET
/// below. Only plain HTTP is supported; this is a localhost debug tool.
fn parse_status_url(url: &str) -> Result<(String, u16, String)> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| anyhow::anyhow!("status URL must start with http://"))?;
    let (authority, path) = match rest.split_once('/') {
        Some((a, p)) => (a, format!("/{}", p)),
        None => (rest, String::new()),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>()
                .with_context(|| format!("invalid port in URL: {}", p))?,
        ),
        None => (authority.to_string(), 80),
    };
    let path = format!("{}/status", path.trim_end_matches('/'));
    Ok((host, port, path))
}

/// Minimal HTTP/1.1 GET without pulling in a client crate. Good enough
/// for querying our own status endpoint.
async fn http_get(host: &str, port: u16, path: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host,
    );
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Return everything after the header block.
    match response.split_once("\r\n\r\n") {
        Some((_, body)) => Ok(body.trim().to_string()),
        None => anyhow::bail!("malformed HTTP response from {}", addr),
    }
}

/// Prints build version information.
fn print_version() {
    println!("gavel-node {}", env!("CARGO_PKG_VERSION"));
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
