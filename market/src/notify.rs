//! # Market Events & Notifications
//!
//! Fire-and-forget notifications for the collaborators outside this
//! engine (email dispatch, push, WebSocket fan-out). The auction house
//! collects events while it holds a per-auction lock and dispatches them
//! only after the lock is released, so a slow notifier can never stall
//! bidding or settlement.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use gavel_core::ledger::{AuctionId, DepositId, UserId};

// ---------------------------------------------------------------------------
// MarketEvent
// ---------------------------------------------------------------------------

/// Events pushed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// The bidding window opened.
    AuctionActivated {
        auction_id: AuctionId,
        end_at: DateTime<Utc>,
    },
    /// A bid was accepted and the current price moved.
    BidAccepted {
        auction_id: AuctionId,
        bidder_id: UserId,
        amount: u64,
    },
    /// A deposit window opened for a candidate winner.
    DepositOpened {
        auction_id: AuctionId,
        deposit_id: DepositId,
        holder_id: UserId,
        amount: u64,
        deadline: DateTime<Utc>,
    },
    /// The candidate paid the deposit; settlement may proceed.
    DepositPaid {
        auction_id: AuctionId,
        deposit_id: DepositId,
        holder_id: UserId,
        amount: u64,
    },
    /// The deposit deadline passed unpaid; the holder was displaced.
    DepositTimedOut {
        auction_id: AuctionId,
        deposit_id: DepositId,
        holder_id: UserId,
    },
    /// Terminal: the sale completed, or the auction closed with no bids.
    AuctionSettled {
        auction_id: AuctionId,
        winner_id: Option<UserId>,
        final_price: Option<u64>,
    },
    /// Terminal: the sale was called off.
    AuctionCancelled {
        auction_id: AuctionId,
        reason: String,
    },
}

impl MarketEvent {
    /// The auction the event concerns. Every event is auction-scoped.
    pub fn auction_id(&self) -> AuctionId {
        match self {
            MarketEvent::AuctionActivated { auction_id, .. }
            | MarketEvent::BidAccepted { auction_id, .. }
            | MarketEvent::DepositOpened { auction_id, .. }
            | MarketEvent::DepositPaid { auction_id, .. }
            | MarketEvent::DepositTimedOut { auction_id, .. }
            | MarketEvent::AuctionSettled { auction_id, .. }
            | MarketEvent::AuctionCancelled { auction_id, .. } => *auction_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Receives market events after the originating lock has been released.
///
/// Implementations must not block for long; they are invoked on the
/// request path (albeit outside any lock). Anything slow belongs behind a
/// channel, which is exactly what the node binary does.
pub trait Notifier: Send + Sync {
    /// Delivers one event. Failures are the implementation's problem;
    /// the engine never retries.
    fn notify(&self, event: MarketEvent);
}

/// Discards every event. The default for library users that have no
/// notification collaborator wired up.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: MarketEvent) {}
}

/// Buffers events in memory. Used by tests to assert on what was emitted
/// and by small deployments as a poor man's outbox.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<MarketEvent>>,
}

impl MemoryNotifier {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far, in delivery order.
    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().clone()
    }

    /// Drops all buffered events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: MarketEvent) {
        self.events.lock().push(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
