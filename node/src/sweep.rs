//! # Deadline Sweep Loop
//!
//! Periodically re-evaluates every stored deadline in the auction house:
//! opens bidding windows, closes expired ones, runs deposit timeouts, and
//! enforces the optional payment deadline. The engine also performs these
//! transitions lazily on each write, so the sweep's job is the auctions
//! nobody is touching.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::debug;

use gavel_market::house::AuctionHouse;

use crate::metrics::SharedMetrics;

/// Spawns the sweep loop. The returned handle is aborted on shutdown.
pub fn spawn_sweeper(
    house: Arc<AuctionHouse>,
    metrics: SharedMetrics,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let started = std::time::Instant::now();
            let stats = house.sweep(Utc::now());

            metrics.sweep_runs_total.inc();
            metrics
                .sweep_duration_seconds
                .observe(started.elapsed().as_secs_f64());
            metrics.auctions_tracked.set(house.auction_count() as i64);
            metrics
                .wallet_accounts
                .set(house.ledger().account_count() as i64);
            metrics
                .ledger_entries
                .set(house.ledger().entry_count() as i64);

            if !stats.is_empty() {
                debug!(?stats, "sweep pass applied transitions");
            }
        }
    })
}
