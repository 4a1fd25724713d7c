//! # Auction House
//!
//! The concurrent front door of the marketplace engine. One
//! [`AuctionRecord`] per auction (state machine + bid book + deposit
//! history) sits behind its own `parking_lot::Mutex` inside a `DashMap`,
//! giving the per-auction serialization the engine's invariants depend on:
//! `place_bid`, `close`, and deposit handling on the same auction are
//! mutually exclusive, while different auctions proceed fully in parallel.
//!
//! Deadlines are evaluated two ways, both driven by the same
//! [`AuctionHouse::sweep`] logic: a periodic sweep from the node, plus a
//! lazy re-check at the top of every write so no operation ever runs
//! against an auction or deposit whose deadline already passed.
//!
//! Notification dispatch happens strictly after the per-auction lock is
//! released; a slow notifier cannot stall the engine.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use gavel_core::config::{APPROVAL_PAST_TOLERANCE, DEFAULT_DEPOSIT_GRACE};
use gavel_core::ledger::{AuctionId, LedgerError, UserId, WalletLedger};

use crate::auction::{Auction, AuctionError, AuctionStatus, CloseOutcome};
use crate::bid::{Bid, BidBook};
use crate::deposit::{Deposit, DepositError, DepositStatus};
use crate::escrow::{EscrowCoordinator, ReofferPricing};
use crate::notify::{MarketEvent, Notifier};
use crate::settlement::SettlementCoordinator;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by auction house operations.
#[derive(Debug, Error)]
pub enum MarketError {
    /// No auction with this id exists.
    #[error("unknown auction {0}")]
    UnknownAuction(AuctionId),

    /// A lifecycle or bid precondition failed.
    #[error(transparent)]
    Auction(#[from] AuctionError),

    /// A deposit state precondition failed.
    #[error(transparent)]
    Deposit(#[from] DepositError),

    /// The wallet ledger refused the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The auction has no pending or paid deposit to operate on.
    #[error("no active deposit for auction {0}")]
    NoActiveDeposit(AuctionId),

    /// A pending or paid deposit already exists; at most one may be
    /// active per auction.
    #[error("a deposit is already active for auction {0}")]
    DepositAlreadyActive(AuctionId),

    /// The caller is not the bidder the active deposit was opened for.
    #[error("{caller} is not the deposit holder ({holder})")]
    NotDepositHolder {
        /// Who called.
        caller: UserId,
        /// Who the deposit belongs to.
        holder: UserId,
    },

    /// The caller is not the auction's (possibly reassigned) winner.
    #[error("{caller} is not the auction winner")]
    NotWinner {
        /// Who called.
        caller: UserId,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the marketplace engine.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// How long a selected winner has to pay the deposit.
    pub deposit_grace: std::time::Duration,

    /// Optional deadline for the settlement payment, measured from the
    /// instant the deposit was paid. `None` (the default) never
    /// auto-cancels; the winner may settle whenever they top up.
    pub payment_grace: Option<std::time::Duration>,

    /// Clock-skew allowance for `start_at` at approval time.
    pub approval_past_tolerance: std::time::Duration,

    /// What a re-offered auction charges the fallback candidate.
    pub reoffer_pricing: ReofferPricing,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            deposit_grace: DEFAULT_DEPOSIT_GRACE,
            payment_grace: None,
            approval_past_tolerance: APPROVAL_PAST_TOLERANCE,
            reoffer_pricing: ReofferPricing::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuctionRecord & snapshots
// ---------------------------------------------------------------------------

/// Everything the engine tracks for one auction, guarded by one mutex.
#[derive(Debug)]
pub struct AuctionRecord {
    /// The lifecycle state machine.
    pub auction: Auction,
    /// Accepted bid history; the escrow fallback candidate list.
    pub bids: BidBook,
    /// Deposit history, oldest first. At most the last one is active.
    pub deposits: Vec<Deposit>,
    /// Bidders displaced for missing a deposit deadline. Excluded from
    /// fallback candidate selection.
    pub displaced: HashSet<UserId>,
}

impl AuctionRecord {
    /// Wraps a freshly created auction.
    pub fn new(auction: Auction) -> Self {
        Self {
            auction,
            bids: BidBook::new(),
            deposits: Vec::new(),
            displaced: HashSet::new(),
        }
    }

    /// The deposit currently occupying the single active slot, if any.
    pub fn active_deposit(&self) -> Option<&Deposit> {
        self.deposits.iter().find(|d| d.status.is_active())
    }

    /// Mutable access to the active deposit.
    pub fn active_deposit_mut(&mut self) -> Option<&mut Deposit> {
        self.deposits.iter_mut().find(|d| d.status.is_active())
    }
}

/// Read-only copy of an auction record for API responses and tests.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuctionSnapshot {
    /// The auction itself.
    pub auction: Auction,
    /// Accepted bids in acceptance order.
    pub bids: Vec<Bid>,
    /// Deposit history, oldest first.
    pub deposits: Vec<Deposit>,
}

/// What one sweep pass did, for logs and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Auctions whose bidding window opened.
    pub activated: usize,
    /// Deposit windows opened (auction close and escrow fallback).
    pub deposits_opened: usize,
    /// Deposits cancelled for missing their deadline.
    pub deposits_timed_out: usize,
    /// Auctions that reached `Settled`.
    pub settled: usize,
    /// Auctions that reached `Cancelled`.
    pub cancelled: usize,
}

impl SweepStats {
    /// Returns `true` if the sweep changed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn tally(&mut self, events: &[MarketEvent]) {
        for event in events {
            match event {
                MarketEvent::AuctionActivated { .. } => self.activated += 1,
                MarketEvent::DepositOpened { .. } => self.deposits_opened += 1,
                MarketEvent::DepositTimedOut { .. } => self.deposits_timed_out += 1,
                MarketEvent::AuctionSettled { .. } => self.settled += 1,
                MarketEvent::AuctionCancelled { .. } => self.cancelled += 1,
                _ => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuctionHouse
// ---------------------------------------------------------------------------

/// The thread-safe marketplace engine facade.
pub struct AuctionHouse {
    auctions: DashMap<AuctionId, Arc<Mutex<AuctionRecord>>>,
    ledger: Arc<WalletLedger>,
    escrow: EscrowCoordinator,
    settlement: SettlementCoordinator,
    notifier: Arc<dyn Notifier>,
    approval_tolerance: chrono::Duration,
    payment_grace: Option<chrono::Duration>,
}

impl std::fmt::Debug for AuctionHouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuctionHouse")
            .field("auctions", &self.auctions.len())
            .finish()
    }
}

impl AuctionHouse {
    /// Creates an auction house over a shared ledger and notifier.
    pub fn new(
        ledger: Arc<WalletLedger>,
        notifier: Arc<dyn Notifier>,
        config: MarketConfig,
    ) -> Self {
        let escrow = EscrowCoordinator::new(
            Arc::clone(&ledger),
            config.deposit_grace,
            config.reoffer_pricing,
        );
        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));
        Self {
            auctions: DashMap::new(),
            ledger,
            escrow,
            settlement,
            notifier,
            approval_tolerance: chrono::Duration::from_std(config.approval_past_tolerance)
                .expect("approval tolerance fits chrono duration range"),
            payment_grace: config.payment_grace.map(|grace| {
                chrono::Duration::from_std(grace)
                    .expect("payment grace fits chrono duration range")
            }),
        }
    }

    /// The ledger this house settles against.
    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    /// Number of auctions the house tracks.
    pub fn auction_count(&self) -> usize {
        self.auctions.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Creates a new auction in `Pending` status and returns it.
    pub fn create_auction(
        &self,
        seller: &str,
        item: &str,
        starting_price: u64,
        deposit_percentage: u8,
    ) -> Result<Auction, MarketError> {
        let auction = Auction::new(seller, item, starting_price, deposit_percentage, Utc::now())?;
        let snapshot = auction.clone();
        info!(auction_id = %auction.id, seller, starting_price, "auction created");
        self.auctions
            .insert(auction.id, Arc::new(Mutex::new(AuctionRecord::new(auction))));
        Ok(snapshot)
    }

    /// Moderation approval: fixes the bidding window and schedules the
    /// activate/close transitions (picked up by the sweep or lazily).
    pub fn approve(
        &self,
        auction_id: AuctionId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Auction, MarketError> {
        let record = self.record(auction_id)?;
        let mut record = record.lock();
        record
            .auction
            .approve(start_at, end_at, Utc::now(), self.approval_tolerance)?;
        info!(auction_id = %auction_id, %start_at, %end_at, "auction approved");
        Ok(record.auction.clone())
    }

    /// Places a bid. The whole read-compare-update runs under the
    /// per-auction lock, so of two racing bids at the same amount exactly
    /// one wins and the other gets `StaleBid`.
    pub fn place_bid(
        &self,
        auction_id: AuctionId,
        bidder: &str,
        amount: u64,
    ) -> Result<Bid, MarketError> {
        let record = self.record(auction_id)?;
        let now = Utc::now();
        let mut events = Vec::new();

        let result = {
            let mut record = record.lock();
            self.refresh(&mut record, now, &mut events);
            match record.auction.accept_bid(bidder, amount, now) {
                Ok(()) => {
                    let bid = Bid {
                        auction_id,
                        bidder_id: bidder.to_string(),
                        amount,
                        placed_at: now,
                    };
                    record.bids.record(bid.clone());
                    events.push(MarketEvent::BidAccepted {
                        auction_id,
                        bidder_id: bid.bidder_id.clone(),
                        amount,
                    });
                    Ok(bid)
                }
                Err(e) => Err(e.into()),
            }
        };

        self.emit(events);
        result
    }

    /// Pays the active deposit on behalf of the selected winner.
    ///
    /// If the deposit's deadline passed before this call, the timeout path
    /// runs first (displacement, re-offer) and the caller gets
    /// [`DepositError::DeadlinePassed`] rather than a confusing
    /// wrong-holder error.
    pub fn pay_deposit(
        &self,
        auction_id: AuctionId,
        payer: &str,
        idempotency_key: &str,
    ) -> Result<Deposit, MarketError> {
        let record = self.record(auction_id)?;
        let now = Utc::now();
        let mut events = Vec::new();

        let result = {
            let mut record = record.lock();
            self.refresh(&mut record, now, &mut events);

            match self.escrow.pay_deposit(&mut record, payer, idempotency_key, now) {
                Ok((deposit, ev)) => {
                    events.extend(ev);
                    Ok(deposit)
                }
                Err(e) => {
                    // A displaced holder missed their window; the caller
                    // should see the deadline, not a wrong-holder error
                    // against whoever the auction was re-offered to.
                    if record.displaced.contains(payer) {
                        let missed = record
                            .deposits
                            .iter()
                            .rev()
                            .find(|d| {
                                d.holder_id == payer && d.status == DepositStatus::Cancelled
                            })
                            .map(|d| d.deadline);
                        if let Some(deadline) = missed {
                            Err(DepositError::DeadlinePassed { deadline }.into())
                        } else {
                            Err(e)
                        }
                    } else {
                        Err(e)
                    }
                }
            }
        };

        self.emit(events);
        result
    }

    /// Collects the remaining balance due and settles the auction.
    pub fn pay(
        &self,
        auction_id: AuctionId,
        payer: &str,
        idempotency_key: &str,
    ) -> Result<Auction, MarketError> {
        let record = self.record(auction_id)?;
        let now = Utc::now();
        let mut events = Vec::new();

        let result = {
            let mut record = record.lock();
            self.refresh(&mut record, now, &mut events);
            match self
                .settlement
                .pay(&mut record, payer, idempotency_key, now)
            {
                Ok(ev) => {
                    events.extend(ev);
                    Ok(record.auction.clone())
                }
                Err(e) => Err(e),
            }
        };

        self.emit(events);
        result
    }

    /// Cancels an auction (seller or moderator initiated), refunding a
    /// paid deposit if one exists.
    pub fn cancel(&self, auction_id: AuctionId, reason: &str) -> Result<Auction, MarketError> {
        let record = self.record(auction_id)?;
        let now = Utc::now();
        let mut events = Vec::new();

        let result = {
            let mut record = record.lock();
            self.refresh(&mut record, now, &mut events);
            match self.escrow.cancel_auction(&mut record, reason, now) {
                Ok(ev) => {
                    events.extend(ev);
                    Ok(record.auction.clone())
                }
                Err(e) => Err(e),
            }
        };

        self.emit(events);
        result
    }

    // -----------------------------------------------------------------------
    // Deadline sweep
    // -----------------------------------------------------------------------

    /// Re-evaluates every stored deadline against `now`: opens bidding
    /// windows, closes expired ones (handing winners to escrow), runs
    /// deposit timeouts, and enforces the optional payment deadline.
    ///
    /// Called periodically by the node; the same logic runs lazily at the
    /// top of every write operation.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let ids: Vec<AuctionId> = self.auctions.iter().map(|entry| *entry.key()).collect();
        let mut stats = SweepStats::default();

        for id in ids {
            let Some(record) = self.auctions.get(&id).map(|e| Arc::clone(e.value())) else {
                continue;
            };
            let mut events = Vec::new();
            {
                let mut record = record.lock();
                self.refresh(&mut record, now, &mut events);
            }
            stats.tally(&events);
            self.emit(events);
        }

        if !stats.is_empty() {
            info!(?stats, "sweep applied transitions");
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Read-only copy of one auction record.
    pub fn snapshot(&self, auction_id: AuctionId) -> Option<AuctionSnapshot> {
        let record = self.auctions.get(&auction_id)?;
        let record = record.lock();
        Some(AuctionSnapshot {
            auction: record.auction.clone(),
            bids: record.bids.all().to_vec(),
            deposits: record.deposits.clone(),
        })
    }

    /// Read-only copies of every auction, oldest first.
    pub fn snapshots(&self) -> Vec<AuctionSnapshot> {
        let mut all: Vec<AuctionSnapshot> = self
            .auctions
            .iter()
            .map(|entry| {
                let record = entry.value().lock();
                AuctionSnapshot {
                    auction: record.auction.clone(),
                    bids: record.bids.all().to_vec(),
                    deposits: record.deposits.clone(),
                }
            })
            .collect();
        all.sort_by_key(|s| s.auction.created_at);
        all
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn record(&self, auction_id: AuctionId) -> Result<Arc<Mutex<AuctionRecord>>, MarketError> {
        self.auctions
            .get(&auction_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(MarketError::UnknownAuction(auction_id))
    }

    /// Applies every transition whose stored deadline has passed. Errors
    /// here mean an invariant is off for one auction; they are logged and
    /// contained so one bad record cannot wedge the sweep.
    fn refresh(
        &self,
        record: &mut AuctionRecord,
        now: DateTime<Utc>,
        events: &mut Vec<MarketEvent>,
    ) {
        // Approved -> Active.
        if record.auction.status == AuctionStatus::Approved {
            if let Some(start_at) = record.auction.start_at {
                if now >= start_at {
                    if let Ok(true) = record.auction.activate(now) {
                        events.push(MarketEvent::AuctionActivated {
                            auction_id: record.auction.id,
                            end_at: record.auction.end_at.expect("approved auction has end"),
                        });
                    }
                }
            }
        }

        // Active -> Ended (winner) or Settled (no bids).
        if record.auction.status == AuctionStatus::Active {
            if let Some(end_at) = record.auction.end_at {
                if now >= end_at {
                    match record.auction.close(now) {
                        Ok(CloseOutcome::NoBids) => {
                            events.push(MarketEvent::AuctionSettled {
                                auction_id: record.auction.id,
                                winner_id: None,
                                final_price: None,
                            });
                        }
                        Ok(CloseOutcome::Winner { .. }) => {
                            match self.escrow.open_deposit(record, now) {
                                Ok(ev) => events.extend(ev),
                                Err(e) => {
                                    error!(auction_id = %record.auction.id, error = %e,
                                        "failed to open deposit after close");
                                }
                            }
                        }
                        Err(e) => {
                            error!(auction_id = %record.auction.id, error = %e,
                                "failed to close auction past its end instant");
                        }
                    }
                }
            }
        }

        // Ended: deposit deadline, then the optional payment deadline.
        if record.auction.status == AuctionStatus::Ended {
            match self.escrow.handle_timeout(record, now) {
                Ok(ev) => events.extend(ev),
                Err(e) => {
                    error!(auction_id = %record.auction.id, error = %e,
                        "deposit timeout handling failed");
                }
            }
        }
        if record.auction.status == AuctionStatus::Ended {
            if let Some(grace) = self.payment_grace {
                let overdue = record
                    .active_deposit()
                    .filter(|d| d.status == DepositStatus::Paid)
                    .and_then(|d| d.paid_at)
                    .map_or(false, |paid_at| now >= paid_at + grace);
                if overdue {
                    match self
                        .escrow
                        .cancel_auction(record, "settlement payment overdue", now)
                    {
                        Ok(ev) => events.extend(ev),
                        Err(e) => {
                            error!(auction_id = %record.auction.id, error = %e,
                                "payment deadline enforcement failed");
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, events: Vec<MarketEvent>) {
        for event in events {
            self.notifier.notify(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
