//! # Bid History
//!
//! Accepted bids are immutable and never deleted: the history is both the
//! audit trail and the ordered candidate list the escrow coordinator walks
//! when a winner defaults on the deposit.
//!
//! A [`BidBook`] holds one auction's accepted bids in acceptance order.
//! Because acceptance is serialized under the per-auction lock and each
//! accepted amount strictly exceeds the previous price, the book is
//! strictly increasing in amount by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use gavel_core::ledger::{AuctionId, UserId};

// ---------------------------------------------------------------------------
// Bid
// ---------------------------------------------------------------------------

/// One accepted bid. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// The auction this bid was accepted on.
    pub auction_id: AuctionId,
    /// Who placed it.
    pub bidder_id: UserId,
    /// The accepted amount in minor units.
    pub amount: u64,
    /// Acceptance instant. Total order within an auction.
    pub placed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BidBook
// ---------------------------------------------------------------------------

/// Ordered bid history for a single auction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidBook {
    bids: Vec<Bid>,
}

impl BidBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted bid. The caller (the auction house, under the
    /// per-auction lock) has already run the acceptance rule; the book
    /// only stores.
    pub fn record(&mut self, bid: Bid) {
        debug_assert!(
            self.bids.last().map_or(true, |prev| bid.amount > prev.amount),
            "bid book must be strictly increasing in amount"
        );
        self.bids.push(bid);
    }

    /// The highest accepted bid, if any. Acceptance order makes this the
    /// last entry.
    pub fn highest(&self) -> Option<&Bid> {
        self.bids.last()
    }

    /// The next escrow candidate: the highest bid whose bidder is not in
    /// `excluded` (previously displaced winners). A bidder who bid several
    /// times is considered once, at their highest amount.
    pub fn next_candidate(&self, excluded: &HashSet<UserId>) -> Option<&Bid> {
        self.bids
            .iter()
            .rev()
            .find(|bid| !excluded.contains(&bid.bidder_id))
    }

    /// Number of accepted bids.
    pub fn len(&self) -> usize {
        self.bids.len()
    }

    /// Returns `true` if no bid has been accepted.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    /// All bids in acceptance order.
    pub fn all(&self) -> &[Bid] {
        &self.bids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
