//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the settlement engine over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                     | Description                        |
//! |--------|--------------------------|------------------------------------|
//! | GET    | `/health`                | Liveness probe                     |
//! | GET    | `/status`                | Node status summary                |
//! | GET    | `/metrics`               | Prometheus text exposition         |
//! | POST   | `/auctions`              | Create a listing (pending)         |
//! | GET    | `/auctions`              | List all auctions                  |
//! | GET    | `/auctions/:id`          | One auction with bids and deposits |
//! | POST   | `/auctions/:id/approve`  | Moderation approval, fixes window  |
//! | POST   | `/auctions/:id/bids`     | Place a bid                        |
//! | POST   | `/auctions/:id/deposit`  | Pay the escrow deposit             |
//! | POST   | `/auctions/:id/payment`  | Pay the remaining balance due      |
//! | POST   | `/auctions/:id/cancel`   | Cancel the sale                    |
//! | POST   | `/wallets/:user/topup`   | Credit a wallet                    |
//! | POST   | `/wallets/:user/withdraw`| Debit a wallet                     |
//! | GET    | `/wallets/:user`         | Balance and ledger statement       |
//! | GET    | `/ws`                    | WebSocket for live market events   |
//!
//! Expected user errors map to client statuses instead of 500s: stale
//! bids and state conflicts are 409, an underfunded wallet is 402, a
//! missed deposit deadline is 410.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use gavel_core::ledger::{EntryKind, LedgerEntry, LedgerError, Related, WalletLedger};
use gavel_market::auction::{Auction, AuctionError};
use gavel_market::bid::Bid;
use gavel_market::deposit::Deposit;
use gavel_market::house::{AuctionHouse, AuctionSnapshot, MarketError};
use gavel_market::notify::{MarketEvent, Notifier};

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// When the node started, for the uptime field.
    pub started_at: DateTime<Utc>,
    /// The marketplace engine.
    pub house: Arc<AuctionHouse>,
    /// The wallet ledger (also reachable via the house; kept here for the
    /// wallet endpoints).
    pub ledger: Arc<WalletLedger>,
    /// Broadcast channel feeding WebSocket subscribers.
    pub event_tx: broadcast::Sender<MarketEvent>,
    /// Prometheus metrics handles.
    pub metrics: SharedMetrics,
}

/// Bridges engine events into the broadcast channel and the activity
/// counters. Handed to the [`AuctionHouse`] as its notifier; runs outside
/// every engine lock.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<MarketEvent>,
    metrics: SharedMetrics,
}

impl BroadcastNotifier {
    /// Creates the bridge over an existing channel.
    pub fn new(tx: broadcast::Sender<MarketEvent>, metrics: SharedMetrics) -> Self {
        Self { tx, metrics }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: MarketEvent) {
        match &event {
            MarketEvent::BidAccepted { .. } => self.metrics.bids_accepted_total.inc(),
            MarketEvent::DepositOpened { .. } => self.metrics.deposits_opened_total.inc(),
            MarketEvent::DepositTimedOut { .. } => self.metrics.deposits_timed_out_total.inc(),
            MarketEvent::AuctionSettled { .. } => self.metrics.auctions_settled_total.inc(),
            MarketEvent::AuctionCancelled { .. } => self.metrics.auctions_cancelled_total.inc(),
            _ => {}
        }
        // No subscribers is fine; events are best-effort.
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// JSON error envelope returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description of what went wrong.
    pub error: String,
}

/// A typed engine error together with its HTTP status.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        let status = match &e {
            MarketError::UnknownAuction(_) => StatusCode::NOT_FOUND,
            MarketError::Auction(a) => match a {
                AuctionError::StaleBid { .. }
                | AuctionError::NotActive(_)
                | AuctionError::WindowClosed { .. }
                | AuctionError::TooEarly { .. } => StatusCode::CONFLICT,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            },
            MarketError::Deposit(d) => match d {
                gavel_market::DepositError::DeadlinePassed { .. } => StatusCode::GONE,
                gavel_market::DepositError::InvalidState { .. } => StatusCode::CONFLICT,
            },
            MarketError::Ledger(l) => return ApiError::from_ledger(l, e.to_string()),
            MarketError::NoActiveDeposit(_) | MarketError::DepositAlreadyActive(_) => {
                StatusCode::CONFLICT
            }
            MarketError::NotDepositHolder { .. } | MarketError::NotWinner { .. } => {
                StatusCode::FORBIDDEN
            }
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        ApiError::from_ledger(&e, message)
    }
}

impl ApiError {
    fn from_ledger(e: &LedgerError, message: String) -> Self {
        let status = match e {
            LedgerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            LedgerError::Overflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::ZeroAmount
            | LedgerError::WrongDirection { .. }
            | LedgerError::IdempotencyKeyRequired(_) => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, message)
    }
}

// ---------------------------------------------------------------------------
// Request / response DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateAuctionRequest {
    pub seller_id: String,
    pub item: String,
    pub starting_price: u64,
    pub deposit_percentage: u8,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub bidder_id: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub payer_id: String,
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct WalletOpRequest {
    pub amount: u64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletView {
    pub user_id: String,
    pub balance: u64,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: i64,
    pub auctions: usize,
    pub wallet_accounts: usize,
    pub ledger_entries: usize,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the full API router over the given state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_handler))
        .route("/auctions", post(create_auction).get(list_auctions))
        .route("/auctions/:id", get(get_auction))
        .route("/auctions/:id/approve", post(approve_auction))
        .route("/auctions/:id/bids", post(place_bid))
        .route("/auctions/:id/deposit", post(pay_deposit))
        .route("/auctions/:id/payment", post(pay_settlement))
        .route("/auctions/:id/cancel", post(cancel_auction))
        .route("/wallets/:user/topup", post(wallet_topup))
        .route("/wallets/:user/withdraw", post(wallet_withdraw))
        .route("/wallets/:user", get(wallet_view))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Basic handlers
// ---------------------------------------------------------------------------

/// `GET /health` - liveness probe.
async fn health() -> &'static str {
    "ok"
}

/// `GET /status` - node status summary.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        auctions: state.house.auction_count(),
        wallet_accounts: state.ledger.account_count(),
        ledger_entries: state.ledger.entry_count(),
    })
}

// ---------------------------------------------------------------------------
// Auction handlers
// ---------------------------------------------------------------------------

/// `POST /auctions` - create a listing in `pending`.
async fn create_auction(
    State(state): State<AppState>,
    Json(req): Json<CreateAuctionRequest>,
) -> Result<(StatusCode, Json<Auction>), ApiError> {
    let auction = state.house.create_auction(
        &req.seller_id,
        &req.item,
        req.starting_price,
        req.deposit_percentage,
    )?;
    state.metrics.auctions_created_total.inc();
    Ok((StatusCode::CREATED, Json(auction)))
}

/// `GET /auctions` - all auctions, oldest first.
async fn list_auctions(State(state): State<AppState>) -> Json<Vec<AuctionSnapshot>> {
    Json(state.house.snapshots())
}

/// `GET /auctions/:id` - one auction with its bids and deposit history.
async fn get_auction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuctionSnapshot>, ApiError> {
    state
        .house
        .snapshot(id)
        .map(Json)
        .ok_or_else(|| MarketError::UnknownAuction(id).into())
}

/// `POST /auctions/:id/approve` - moderation approval.
async fn approve_auction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<Auction>, ApiError> {
    let auction = state.house.approve(id, req.start_at, req.end_at)?;
    Ok(Json(auction))
}

/// `POST /auctions/:id/bids` - place a bid.
///
/// A `StaleBid` response tells the client to refresh the current price
/// and re-bid.
async fn place_bid(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PlaceBidRequest>,
) -> Result<(StatusCode, Json<Bid>), ApiError> {
    match state.house.place_bid(id, &req.bidder_id, req.amount) {
        Ok(bid) => Ok((StatusCode::CREATED, Json(bid))),
        Err(e) => {
            if matches!(e, MarketError::Auction(_)) {
                state.metrics.bids_rejected_total.inc();
            }
            Err(e.into())
        }
    }
}

/// `POST /auctions/:id/deposit` - pay the escrow deposit.
async fn pay_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PayRequest>,
) -> Result<Json<Deposit>, ApiError> {
    let deposit = state
        .house
        .pay_deposit(id, &req.payer_id, &req.idempotency_key)?;
    Ok(Json(deposit))
}

/// `POST /auctions/:id/payment` - pay the remaining balance due.
async fn pay_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PayRequest>,
) -> Result<Json<Auction>, ApiError> {
    let auction = state.house.pay(id, &req.payer_id, &req.idempotency_key)?;
    Ok(Json(auction))
}

/// `POST /auctions/:id/cancel` - cancel the sale, refunding any paid
/// deposit.
async fn cancel_auction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Auction>, ApiError> {
    let auction = state.house.cancel(id, &req.reason)?;
    Ok(Json(auction))
}

// ---------------------------------------------------------------------------
// Wallet handlers
// ---------------------------------------------------------------------------

/// `POST /wallets/:user/topup` - credit the wallet.
async fn wallet_topup(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<WalletOpRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry = state.ledger.credit(
        &user,
        req.amount,
        EntryKind::Topup,
        req.idempotency_key,
        Related::none(),
    )?;
    Ok(Json(entry))
}

/// `POST /wallets/:user/withdraw` - debit the wallet.
async fn wallet_withdraw(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<WalletOpRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry = state.ledger.debit(
        &user,
        req.amount,
        EntryKind::Withdraw,
        req.idempotency_key,
        Related::none(),
    )?;
    Ok(Json(entry))
}

/// `GET /wallets/:user` - balance and chronological statement.
async fn wallet_view(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Json<WalletView> {
    Json(WalletView {
        balance: state.ledger.balance(&user),
        entries: state.ledger.entries_for(&user),
        user_id: user,
    })
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws` - WebSocket upgrade for live market events.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards broadcast events to one subscriber as JSON text frames until
/// either side goes away.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to serialize ws event: {}", e);
                }
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("ws subscriber lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
