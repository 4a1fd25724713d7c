//! # Auction Lifecycle State Machine
//!
//! An [`Auction`] moves through
//! `Pending -> Approved -> Active -> Ended -> {Settled | Cancelled}`.
//! Transitions are monotonic: the only way "backwards" is an explicit
//! cancellation, and `Settled`/`Cancelled` are terminal. The struct is a
//! pure state machine; callers (the auction house) provide the clock and
//! hold the per-auction lock that makes compare-and-update atomic.
//!
//! The bid acceptance rule lives here too, because `current_price` is this
//! struct's single most important invariant: it never decreases, and every
//! accepted bid strictly exceeds it at the instant of acceptance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gavel_core::config::MAX_DEPOSIT_PERCENTAGE;
use gavel_core::ledger::{AuctionId, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by auction lifecycle and bid operations.
#[derive(Debug, Error)]
pub enum AuctionError {
    /// The operation is not legal from the auction's current status.
    /// Programmer or client error; not retryable.
    #[error("invalid transition: auction is {current}, cannot {operation}")]
    InvalidTransition {
        /// Status at the time of the call.
        current: AuctionStatus,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// The scheduled instant for this transition has not arrived yet.
    #[error("too early: scheduled for {scheduled_for}")]
    TooEarly {
        /// When the transition becomes legal.
        scheduled_for: DateTime<Utc>,
    },

    /// Bid rejected because the auction is not accepting bids.
    #[error("auction is not active (status {0})")]
    NotActive(AuctionStatus),

    /// Bid rejected because the bidding window has closed (or not opened).
    #[error("bidding window closed at {end_at}")]
    WindowClosed {
        /// End of the bidding window.
        end_at: DateTime<Utc>,
    },

    /// Bid rejected because the offered amount no longer exceeds the
    /// current price. Retryable by the client with a fresh read.
    #[error("stale bid: current price {current_price}, offered {offered}")]
    StaleBid {
        /// The price the bid had to beat.
        current_price: u64,
        /// The amount that was offered.
        offered: u64,
    },

    /// `end_at` must be strictly after `start_at`.
    #[error("invalid schedule: end {end_at} is not after start {start_at}")]
    InvalidSchedule {
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },

    /// `start_at` lies further in the past than the approval tolerance.
    #[error("start instant {start_at} is too far in the past")]
    StartInPast { start_at: DateTime<Utc> },

    /// Auctions must open with a positive starting price.
    #[error("starting price must be positive")]
    ZeroStartingPrice,

    /// The deposit percentage must be within 0..=100.
    #[error("deposit percentage {0} out of range (max 100)")]
    DepositPercentageOutOfRange(u8),
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    /// Created by the seller, awaiting moderation.
    Pending,
    /// Approved by moderation; `start_at`/`end_at` are fixed.
    Approved,
    /// Bidding window is open.
    Active,
    /// Bidding closed with a winner; escrow and settlement in progress.
    Ended,
    /// Terminal: sale completed (or closed with nothing to collect).
    Settled,
    /// Terminal: sale called off.
    Cancelled,
}

impl AuctionStatus {
    /// Returns `true` for the two terminal statuses.
    pub fn is_terminal(self) -> bool {
        matches!(self, AuctionStatus::Settled | AuctionStatus::Cancelled)
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuctionStatus::Pending => write!(f, "pending"),
            AuctionStatus::Approved => write!(f, "approved"),
            AuctionStatus::Active => write!(f, "active"),
            AuctionStatus::Ended => write!(f, "ended"),
            AuctionStatus::Settled => write!(f, "settled"),
            AuctionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The terminal outcome passed to [`Auction::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleOutcome {
    /// Fully paid, or closed with no winner and nothing to collect.
    Settled,
    /// Sale called off (default chain exhausted, cancellation).
    Cancelled,
}

/// What [`Auction::close`] decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No bids were placed; the auction settled directly with no winner.
    NoBids,
    /// A winner was snapshotted; escrow takes over.
    Winner {
        /// The highest bidder at close.
        winner: UserId,
        /// The price frozen at close.
        final_price: u64,
    },
}

// ---------------------------------------------------------------------------
// Auction
// ---------------------------------------------------------------------------

/// A single timed auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    /// Unique auction id.
    pub id: AuctionId,
    /// The listing seller.
    pub seller: UserId,
    /// Opaque reference to the listed item. Listing content is managed
    /// outside this engine.
    pub item: String,
    /// Current lifecycle status.
    pub status: AuctionStatus,
    /// Opening price in minor units. Positive.
    pub starting_price: u64,
    /// Highest accepted bid so far; equals `starting_price` until the
    /// first bid. Never decreases.
    pub current_price: u64,
    /// Share of the final price collected as an escrow deposit, 0..=100.
    pub deposit_percentage: u8,
    /// Bidding window start. Fixed at approval.
    pub start_at: Option<DateTime<Utc>>,
    /// Bidding window end. Fixed at approval.
    pub end_at: Option<DateTime<Utc>>,
    /// Provisional high bidder while active; the selected winner (possibly
    /// reassigned by escrow fallback) from `Ended` onwards.
    pub winner_id: Option<UserId>,
    /// Price snapshot taken at close. Only set from `Ended` onwards.
    pub final_price: Option<u64>,
    /// When the seller created the auction.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent state change.
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    /// Creates a new auction in `Pending` status.
    ///
    /// # Errors
    ///
    /// [`AuctionError::ZeroStartingPrice`] and
    /// [`AuctionError::DepositPercentageOutOfRange`] on bad listing terms.
    pub fn new(
        seller: &str,
        item: &str,
        starting_price: u64,
        deposit_percentage: u8,
        now: DateTime<Utc>,
    ) -> Result<Self, AuctionError> {
        if starting_price == 0 {
            return Err(AuctionError::ZeroStartingPrice);
        }
        if deposit_percentage > MAX_DEPOSIT_PERCENTAGE {
            return Err(AuctionError::DepositPercentageOutOfRange(deposit_percentage));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            seller: seller.to_string(),
            item: item.to_string(),
            status: AuctionStatus::Pending,
            starting_price,
            current_price: starting_price,
            deposit_percentage,
            start_at: None,
            end_at: None,
            winner_id: None,
            final_price: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Moderation approval: fixes the bidding window.
    ///
    /// Requires `Pending` status, `end_at > start_at`, and `start_at` no
    /// further in the past than `past_tolerance` (clock-skew allowance).
    pub fn approve(
        &mut self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        now: DateTime<Utc>,
        past_tolerance: Duration,
    ) -> Result<(), AuctionError> {
        if self.status != AuctionStatus::Pending {
            return Err(AuctionError::InvalidTransition {
                current: self.status,
                operation: "approve",
            });
        }
        if end_at <= start_at {
            return Err(AuctionError::InvalidSchedule { start_at, end_at });
        }
        if start_at < now - past_tolerance {
            return Err(AuctionError::StartInPast { start_at });
        }
        self.status = AuctionStatus::Approved;
        self.start_at = Some(start_at);
        self.end_at = Some(end_at);
        self.updated_at = now;
        Ok(())
    }

    /// Opens the bidding window once the clock reaches `start_at`.
    ///
    /// Idempotent: returns `Ok(false)` if already `Active`. Returns
    /// `Ok(true)` when this call performed the transition.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<bool, AuctionError> {
        if self.status == AuctionStatus::Active {
            return Ok(false);
        }
        if self.status != AuctionStatus::Approved {
            return Err(AuctionError::InvalidTransition {
                current: self.status,
                operation: "activate",
            });
        }
        let start_at = self.start_at.expect("approved auction has a start instant");
        if now < start_at {
            return Err(AuctionError::TooEarly {
                scheduled_for: start_at,
            });
        }
        self.status = AuctionStatus::Active;
        self.updated_at = now;
        Ok(true)
    }

    /// Accepts a bid, bumping `current_price` and the provisional winner.
    ///
    /// The caller must hold the per-auction lock: the check-compare-update
    /// below is only atomic because of it.
    ///
    /// # Errors
    ///
    /// [`AuctionError::NotActive`], [`AuctionError::WindowClosed`], and
    /// [`AuctionError::StaleBid`]. All retryable by the client with fresh
    /// data; none mutate the auction.
    pub fn accept_bid(
        &mut self,
        bidder: &str,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<(), AuctionError> {
        if self.status != AuctionStatus::Active {
            return Err(AuctionError::NotActive(self.status));
        }
        let start_at = self.start_at.expect("active auction has a start instant");
        let end_at = self.end_at.expect("active auction has an end instant");
        if now < start_at || now >= end_at {
            return Err(AuctionError::WindowClosed { end_at });
        }
        if amount <= self.current_price {
            return Err(AuctionError::StaleBid {
                current_price: self.current_price,
                offered: amount,
            });
        }
        self.current_price = amount;
        self.winner_id = Some(bidder.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Closes the bidding window once the clock reaches `end_at`, taking
    /// the final price / winner snapshot atomically with the transition.
    ///
    /// With no bids there is nothing to collect: the auction settles
    /// directly. With a winner the auction parks in `Ended` until the
    /// escrow and settlement coordinators finalize it.
    pub fn close(&mut self, now: DateTime<Utc>) -> Result<CloseOutcome, AuctionError> {
        if self.status != AuctionStatus::Active {
            return Err(AuctionError::InvalidTransition {
                current: self.status,
                operation: "close",
            });
        }
        let end_at = self.end_at.expect("active auction has an end instant");
        if now < end_at {
            return Err(AuctionError::TooEarly {
                scheduled_for: end_at,
            });
        }
        self.updated_at = now;
        match self.winner_id.clone() {
            None => {
                self.status = AuctionStatus::Settled;
                Ok(CloseOutcome::NoBids)
            }
            Some(winner) => {
                self.status = AuctionStatus::Ended;
                self.final_price = Some(self.current_price);
                Ok(CloseOutcome::Winner {
                    winner,
                    final_price: self.current_price,
                })
            }
        }
    }

    /// The single terminal write: `Ended -> Settled | Cancelled`.
    pub fn finalize(
        &mut self,
        outcome: SaleOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), AuctionError> {
        if self.status != AuctionStatus::Ended {
            return Err(AuctionError::InvalidTransition {
                current: self.status,
                operation: "finalize",
            });
        }
        self.status = match outcome {
            SaleOutcome::Settled => AuctionStatus::Settled,
            SaleOutcome::Cancelled => AuctionStatus::Cancelled,
        };
        self.updated_at = now;
        Ok(())
    }

    /// Pre-close cancellation: `Pending | Approved | Active -> Cancelled`.
    ///
    /// Callers that have accepted bids must route through the escrow
    /// coordinator's cancel path instead of calling this directly, so that
    /// held deposits are refunded; the state machine itself only polices
    /// the status.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), AuctionError> {
        match self.status {
            AuctionStatus::Pending | AuctionStatus::Approved | AuctionStatus::Active => {
                self.status = AuctionStatus::Cancelled;
                self.updated_at = now;
                Ok(())
            }
            current => Err(AuctionError::InvalidTransition {
                current,
                operation: "cancel",
            }),
        }
    }

    /// Escrow fallback: hands the win to the next candidate after the
    /// previous one defaulted on the deposit. Optionally re-bases the
    /// final price to the candidate's own bid (policy-dependent).
    pub fn reassign_winner(
        &mut self,
        winner: &str,
        rebased_price: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<(), AuctionError> {
        if self.status != AuctionStatus::Ended {
            return Err(AuctionError::InvalidTransition {
                current: self.status,
                operation: "reassign winner",
            });
        }
        self.winner_id = Some(winner.to_string());
        if let Some(price) = rebased_price {
            self.final_price = Some(price);
        }
        self.updated_at = now;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tolerance() -> Duration {
        Duration::seconds(60)
    }

    /// An auction approved for a window that is already open.
    fn active_auction(now: DateTime<Utc>) -> Auction {
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        a.approve(now, now + Duration::hours(1), now, tolerance())
            .unwrap();
        a.activate(now).unwrap();
        a
    }

    #[test]
    fn new_auction_starts_pending() {
        let now = Utc::now();
        let a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        assert_eq!(a.status, AuctionStatus::Pending);
        assert_eq!(a.current_price, 1_000);
        assert!(a.winner_id.is_none());
        assert!(a.final_price.is_none());
    }

    #[test]
    fn zero_starting_price_rejected() {
        let result = Auction::new("user:seller", "item-1", 0, 20, Utc::now());
        assert!(matches!(result, Err(AuctionError::ZeroStartingPrice)));
    }

    #[test]
    fn deposit_percentage_above_hundred_rejected() {
        let result = Auction::new("user:seller", "item-1", 1_000, 101, Utc::now());
        assert!(matches!(
            result,
            Err(AuctionError::DepositPercentageOutOfRange(101))
        ));
    }

    #[test]
    fn approve_fixes_window() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        a.approve(
            now + Duration::minutes(5),
            now + Duration::hours(1),
            now,
            tolerance(),
        )
        .unwrap();
        assert_eq!(a.status, AuctionStatus::Approved);
        assert!(a.start_at.is_some());
        assert!(a.end_at.is_some());
    }

    #[test]
    fn approve_twice_rejected() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        a.approve(now, now + Duration::hours(1), now, tolerance())
            .unwrap();
        let result = a.approve(now, now + Duration::hours(2), now, tolerance());
        assert!(matches!(
            result,
            Err(AuctionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn approve_end_before_start_rejected() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        let result = a.approve(now + Duration::hours(2), now + Duration::hours(1), now, tolerance());
        assert!(matches!(result, Err(AuctionError::InvalidSchedule { .. })));
    }

    #[test]
    fn approve_start_too_far_in_past_rejected() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        let result = a.approve(now - Duration::hours(1), now + Duration::hours(1), now, tolerance());
        assert!(matches!(result, Err(AuctionError::StartInPast { .. })));
    }

    #[test]
    fn approve_start_within_tolerance_accepted() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        a.approve(
            now - Duration::seconds(30),
            now + Duration::hours(1),
            now,
            tolerance(),
        )
        .unwrap();
        assert_eq!(a.status, AuctionStatus::Approved);
    }

    #[test]
    fn activate_before_start_rejected() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        a.approve(
            now + Duration::minutes(5),
            now + Duration::hours(1),
            now,
            tolerance(),
        )
        .unwrap();
        let result = a.activate(now);
        assert!(matches!(result, Err(AuctionError::TooEarly { .. })));
    }

    #[test]
    fn activate_is_idempotent() {
        let now = Utc::now();
        let mut a = active_auction(now);
        assert_eq!(a.status, AuctionStatus::Active);
        // Second call is a no-op, not an error.
        assert_eq!(a.activate(now).unwrap(), false);
    }

    #[test]
    fn activate_from_pending_rejected() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        let result = a.activate(now);
        assert!(matches!(
            result,
            Err(AuctionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn sequential_bids_bump_price_and_winner() {
        let now = Utc::now();
        let mut a = active_auction(now);

        a.accept_bid("user:bidder1", 1_200, now).unwrap();
        assert_eq!(a.current_price, 1_200);
        assert_eq!(a.winner_id.as_deref(), Some("user:bidder1"));

        a.accept_bid("user:bidder2", 1_500, now).unwrap();
        assert_eq!(a.current_price, 1_500);
        assert_eq!(a.winner_id.as_deref(), Some("user:bidder2"));
    }

    #[test]
    fn equal_amount_bid_rejected_as_stale() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 2_000, now).unwrap();

        let result = a.accept_bid("user:bidder2", 2_000, now);
        assert!(matches!(
            result,
            Err(AuctionError::StaleBid {
                current_price: 2_000,
                offered: 2_000,
            })
        ));
        // First bidder keeps the tie.
        assert_eq!(a.winner_id.as_deref(), Some("user:bidder1"));
    }

    #[test]
    fn bid_below_starting_price_rejected() {
        let now = Utc::now();
        let mut a = active_auction(now);
        let result = a.accept_bid("user:bidder1", 900, now);
        assert!(matches!(result, Err(AuctionError::StaleBid { .. })));
    }

    #[test]
    fn bid_on_pending_auction_rejected() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        let result = a.accept_bid("user:bidder1", 1_500, now);
        assert!(matches!(
            result,
            Err(AuctionError::NotActive(AuctionStatus::Pending))
        ));
    }

    #[test]
    fn bid_after_window_rejected() {
        let now = Utc::now();
        let mut a = active_auction(now);
        let late = now + Duration::hours(2);
        let result = a.accept_bid("user:bidder1", 1_500, late);
        assert!(matches!(result, Err(AuctionError::WindowClosed { .. })));
    }

    #[test]
    fn close_without_bids_settles_directly() {
        let now = Utc::now();
        let mut a = active_auction(now);
        let outcome = a.close(now + Duration::hours(2)).unwrap();
        assert_eq!(outcome, CloseOutcome::NoBids);
        assert_eq!(a.status, AuctionStatus::Settled);
        assert!(a.winner_id.is_none());
        assert!(a.final_price.is_none());
    }

    #[test]
    fn close_snapshots_winner_and_price() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 1_200, now).unwrap();
        a.accept_bid("user:bidder2", 1_500, now).unwrap();

        let outcome = a.close(now + Duration::hours(2)).unwrap();
        assert_eq!(
            outcome,
            CloseOutcome::Winner {
                winner: "user:bidder2".into(),
                final_price: 1_500,
            }
        );
        assert_eq!(a.status, AuctionStatus::Ended);
        assert_eq!(a.final_price, Some(1_500));
    }

    #[test]
    fn close_before_end_rejected() {
        let now = Utc::now();
        let mut a = active_auction(now);
        let result = a.close(now + Duration::minutes(1));
        assert!(matches!(result, Err(AuctionError::TooEarly { .. })));
        assert_eq!(a.status, AuctionStatus::Active);
    }

    #[test]
    fn finalize_settles_ended_auction() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 1_500, now).unwrap();
        a.close(now + Duration::hours(2)).unwrap();

        a.finalize(SaleOutcome::Settled, now + Duration::hours(3))
            .unwrap();
        assert_eq!(a.status, AuctionStatus::Settled);
    }

    #[test]
    fn finalize_is_the_only_write_after_ended() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 1_500, now).unwrap();
        a.close(now + Duration::hours(2)).unwrap();
        a.finalize(SaleOutcome::Settled, now).unwrap();

        // Terminal status rejects everything.
        assert!(a.finalize(SaleOutcome::Cancelled, now).is_err());
        assert!(a.cancel(now).is_err());
        assert!(a.accept_bid("user:late", 9_999, now).is_err());
        assert_eq!(a.status, AuctionStatus::Settled);
    }

    #[test]
    fn cancel_before_close() {
        let now = Utc::now();
        let mut a = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        a.cancel(now).unwrap();
        assert_eq!(a.status, AuctionStatus::Cancelled);
    }

    #[test]
    fn cancel_from_ended_must_use_finalize() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 1_500, now).unwrap();
        a.close(now + Duration::hours(2)).unwrap();

        assert!(matches!(
            a.cancel(now),
            Err(AuctionError::InvalidTransition { .. })
        ));
        a.finalize(SaleOutcome::Cancelled, now).unwrap();
        assert_eq!(a.status, AuctionStatus::Cancelled);
    }

    #[test]
    fn reassign_winner_rebases_price_when_asked() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 1_200, now).unwrap();
        a.accept_bid("user:bidder2", 1_500, now).unwrap();
        a.close(now + Duration::hours(2)).unwrap();

        a.reassign_winner("user:bidder1", None, now).unwrap();
        assert_eq!(a.winner_id.as_deref(), Some("user:bidder1"));
        assert_eq!(a.final_price, Some(1_500));

        a.reassign_winner("user:bidder1", Some(1_200), now).unwrap();
        assert_eq!(a.final_price, Some(1_200));
    }

    #[test]
    fn auction_serialization_roundtrip() {
        let now = Utc::now();
        let mut a = active_auction(now);
        a.accept_bid("user:bidder1", 1_500, now).unwrap();

        let json = serde_json::to_string(&a).expect("serialize");
        let back: Auction = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, a.id);
        assert_eq!(back.status, AuctionStatus::Active);
        assert_eq!(back.current_price, 1_500);
    }
}
