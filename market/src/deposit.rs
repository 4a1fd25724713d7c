//! # Escrow Deposits
//!
//! A [`Deposit`] is the partial hold taken from a selected winner before
//! final settlement. It protects the seller: a winner who never pays the
//! deposit is displaced and the auction is re-offered down the bid history.
//!
//! State machine: `Pending -> Paid -> {Deducted | Refunded}`, or
//! `Pending -> Cancelled` when the deadline passes unpaid. At most one
//! deposit per auction is `Pending` or `Paid` at any time; the auction
//! record enforces that by only ever appending a new deposit after the
//! previous one reached a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gavel_core::ledger::{AuctionId, DepositId, EntryId, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by deposit state transitions.
#[derive(Debug, Error)]
pub enum DepositError {
    /// The deposit is not in a status that allows this operation.
    #[error("invalid deposit state: is {current}, expected {expected}")]
    InvalidState {
        /// Status at the time of the call.
        current: DepositStatus,
        /// The status the operation requires.
        expected: &'static str,
    },

    /// The payment window for this deposit has closed. The timeout path
    /// (displacement, re-offer) takes over; the payer cannot pay anymore.
    #[error("deposit deadline {deadline} has passed")]
    DeadlinePassed {
        /// The deadline that was missed.
        deadline: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an escrow deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Opened, waiting for the holder to pay before the deadline.
    Pending,
    /// Debited from the holder's wallet. Counts toward the final price.
    Paid,
    /// Returned to the holder (displaced after paying, or sale cancelled).
    Refunded,
    /// Applied against the final price at settlement.
    Deducted,
    /// Deadline passed unpaid; the holder was displaced.
    Cancelled,
}

impl DepositStatus {
    /// Returns `true` while the deposit still occupies the auction's
    /// single active-deposit slot.
    pub fn is_active(self) -> bool {
        matches!(self, DepositStatus::Pending | DepositStatus::Paid)
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositStatus::Pending => write!(f, "pending"),
            DepositStatus::Paid => write!(f, "paid"),
            DepositStatus::Refunded => write!(f, "refunded"),
            DepositStatus::Deducted => write!(f, "deducted"),
            DepositStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Deposit
// ---------------------------------------------------------------------------

/// One escrow deposit request against one candidate winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    /// Unique deposit id.
    pub id: DepositId,
    /// The auction this deposit secures.
    pub auction_id: AuctionId,
    /// The bidder asked to pay.
    pub holder_id: UserId,
    /// Amount to hold, in minor units. Derived from the final price and
    /// the auction's deposit percentage at opening time.
    pub amount: u64,
    /// The percentage the amount was derived from.
    pub percentage: u8,
    /// Current lifecycle status.
    pub status: DepositStatus,
    /// Instant after which an unpaid deposit is cancelled.
    pub deadline: DateTime<Utc>,
    /// When the wallet debit completed.
    pub paid_at: Option<DateTime<Utc>>,
    /// Ledger entry that debited the hold. Set when `Paid`.
    pub paid_entry_id: Option<EntryId>,
    /// Ledger entry that returned the hold. Set when `Refunded`.
    pub refund_entry_id: Option<EntryId>,
    /// When the deposit was opened.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent state change.
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    /// Opens a deposit in `Pending` status.
    pub fn open(
        auction_id: AuctionId,
        holder_id: &str,
        amount: u64,
        percentage: u8,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            auction_id,
            holder_id: holder_id.to_string(),
            amount,
            percentage,
            status: DepositStatus::Pending,
            deadline,
            paid_at: None,
            paid_entry_id: None,
            refund_entry_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks that the deposit can be paid right now: status `Pending`
    /// and the deadline has not passed. Called before touching the wallet
    /// so no debit is ever attempted against an expired deposit.
    pub fn ensure_payable(&self, now: DateTime<Utc>) -> Result<(), DepositError> {
        if self.status != DepositStatus::Pending {
            return Err(DepositError::InvalidState {
                current: self.status,
                expected: "pending",
            });
        }
        if now >= self.deadline {
            return Err(DepositError::DeadlinePassed {
                deadline: self.deadline,
            });
        }
        Ok(())
    }

    /// Marks the deposit paid, recording the ledger entry that debited it.
    /// `entry_id` is `None` only for zero-amount deposits, which never
    /// touch the wallet.
    pub fn mark_paid(
        &mut self,
        entry_id: Option<EntryId>,
        now: DateTime<Utc>,
    ) -> Result<(), DepositError> {
        if self.status != DepositStatus::Pending {
            return Err(DepositError::InvalidState {
                current: self.status,
                expected: "pending",
            });
        }
        self.status = DepositStatus::Paid;
        self.paid_at = Some(now);
        self.paid_entry_id = entry_id;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels an unpaid deposit (deadline timeout, or sale called off
    /// before payment).
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DepositError> {
        if self.status != DepositStatus::Pending {
            return Err(DepositError::InvalidState {
                current: self.status,
                expected: "pending",
            });
        }
        self.status = DepositStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Applies the paid hold against the final price at settlement.
    pub fn deduct(&mut self, now: DateTime<Utc>) -> Result<(), DepositError> {
        if self.status != DepositStatus::Paid {
            return Err(DepositError::InvalidState {
                current: self.status,
                expected: "paid",
            });
        }
        self.status = DepositStatus::Deducted;
        self.updated_at = now;
        Ok(())
    }

    /// Returns a paid hold to the holder (displaced after paying, or the
    /// sale was cancelled), recording the refunding ledger entry.
    pub fn refund(&mut self, entry_id: EntryId, now: DateTime<Utc>) -> Result<(), DepositError> {
        if self.status != DepositStatus::Paid {
            return Err(DepositError::InvalidState {
                current: self.status,
                expected: "paid",
            });
        }
        self.status = DepositStatus::Refunded;
        self.refund_entry_id = Some(entry_id);
        self.updated_at = now;
        Ok(())
    }

    /// Returns `true` if the deposit is unpaid and its deadline has
    /// passed, i.e. the timeout path should run.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == DepositStatus::Pending && now >= self.deadline
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
