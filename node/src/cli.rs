//! # CLI Interface
//!
//! Defines the command-line argument structure for `gavel-node` using
//! `clap` derive. Supports three subcommands: `run`, `status`, and
//! `version`.

use clap::{Parser, Subcommand};

/// Gavel marketplace settlement node.
///
/// Runs the auction settlement engine: the wallet ledger, the auction
/// lifecycle sweep, and the REST/WebSocket API that the marketplace
/// front-ends talk to.
#[derive(Parser, Debug)]
#[command(
    name = "gavel-node",
    about = "Gavel marketplace settlement node",
    version,
    propagate_version = true
)]
pub struct GavelNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the gavel node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the settlement node.
    Run(RunArgs),
    /// Query the status of a running node via its HTTP endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the REST and WebSocket API.
    #[arg(long, env = "GAVEL_API_PORT", default_value_t = 8642)]
    pub api_port: u16,

    /// Seconds between deadline sweep passes.
    #[arg(long, env = "GAVEL_SWEEP_INTERVAL_SECS", default_value_t = 5)]
    pub sweep_interval_secs: u64,

    /// Seconds a selected winner has to pay the escrow deposit.
    #[arg(long, env = "GAVEL_DEPOSIT_GRACE_SECS", default_value_t = 86_400)]
    pub deposit_grace_secs: u64,

    /// Optional settlement payment deadline in seconds, measured from the
    /// deposit payment. Unset means the sale waits indefinitely.
    #[arg(long, env = "GAVEL_PAYMENT_GRACE_SECS")]
    pub payment_grace_secs: Option<u64>,

    /// Re-base a re-offered auction to the fallback candidate's own bid
    /// instead of keeping the original final price.
    #[arg(long, env = "GAVEL_REBASE_REOFFER", default_value_t = false)]
    pub rebase_reoffer_price: bool,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "GAVEL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running node's API.
    #[arg(long, default_value = "http://127.0.0.1:8642")]
    pub url: String,
}
