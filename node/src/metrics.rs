//! # Prometheus Metrics
//!
//! Operational metrics for the settlement node, served as text exposition
//! format at `GET /metrics` on the API port.
//!
//! Counters for marketplace activity are driven by the engine's event
//! stream (every settled auction increments exactly once no matter which
//! path settled it); gauges are refreshed by the sweep loop.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the node's metrics.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Holds all Prometheus metric handles for the node.
pub struct NodeMetrics {
    /// Registry that owns every metric below.
    registry: Registry,
    /// Bids accepted by the engine.
    pub bids_accepted_total: IntCounter,
    /// Bids rejected (stale, window closed, inactive auction).
    pub bids_rejected_total: IntCounter,
    /// Auctions created.
    pub auctions_created_total: IntCounter,
    /// Auctions that reached `settled`.
    pub auctions_settled_total: IntCounter,
    /// Auctions that reached `cancelled`.
    pub auctions_cancelled_total: IntCounter,
    /// Deposit windows opened (initial winner and escrow fallback).
    pub deposits_opened_total: IntCounter,
    /// Deposits cancelled for missing their deadline.
    pub deposits_timed_out_total: IntCounter,
    /// Deadline sweep passes executed.
    pub sweep_runs_total: IntCounter,
    /// Auctions currently tracked by the house.
    pub auctions_tracked: IntGauge,
    /// Wallet accounts the ledger has touched.
    pub wallet_accounts: IntGauge,
    /// Ledger entries recorded (all statuses).
    pub ledger_entries: IntGauge,
    /// Duration of a sweep pass in seconds.
    pub sweep_duration_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("gavel".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry.register(Box::new(c.clone())).expect("register");
            c
        }
        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::new(name, help).expect("metric creation");
            registry.register(Box::new(g.clone())).expect("register");
            g
        }

        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("sweep_duration_seconds", "Duration of one deadline sweep pass")
                .buckets(vec![0.001, 0.005, 0.025, 0.1, 0.5, 2.5]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(sweep_duration_seconds.clone()))
            .expect("register");

        Self {
            bids_accepted_total: counter(&registry, "bids_accepted_total", "Bids accepted"),
            bids_rejected_total: counter(&registry, "bids_rejected_total", "Bids rejected"),
            auctions_created_total: counter(&registry, "auctions_created_total", "Auctions created"),
            auctions_settled_total: counter(
                &registry,
                "auctions_settled_total",
                "Auctions fully settled",
            ),
            auctions_cancelled_total: counter(
                &registry,
                "auctions_cancelled_total",
                "Auctions cancelled",
            ),
            deposits_opened_total: counter(
                &registry,
                "deposits_opened_total",
                "Escrow deposit windows opened",
            ),
            deposits_timed_out_total: counter(
                &registry,
                "deposits_timed_out_total",
                "Escrow deposits that missed their deadline",
            ),
            sweep_runs_total: counter(&registry, "sweep_runs_total", "Deadline sweep passes"),
            auctions_tracked: gauge(&registry, "auctions_tracked", "Auctions in the registry"),
            wallet_accounts: gauge(&registry, "wallet_accounts", "Wallet accounts created"),
            ledger_entries: gauge(&registry, "ledger_entries", "Ledger entries recorded"),
            sweep_duration_seconds,
            registry,
        }
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics` handler.
pub async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<crate::api::AppState>,
) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response()
        }
    }
}
