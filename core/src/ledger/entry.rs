//! # Ledger Entries
//!
//! A [`LedgerEntry`] is the unit of audit: one immutable record per
//! attempted balance change. Entries are created `Pending`, reach exactly
//! one terminal status inside the same critical section that applies (or
//! refuses) the balance delta, and are never mutated afterwards.
//!
//! The entry log is append-only. Failed debits are recorded too; an audit
//! must be able to see what was attempted, not only what succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A marketplace user, identified by an opaque account address.
pub type UserId = String;

/// Unique identifier of a ledger entry.
pub type EntryId = Uuid;

/// Unique identifier of an auction.
pub type AuctionId = Uuid;

/// Unique identifier of an escrow deposit.
pub type DepositId = Uuid;

// ---------------------------------------------------------------------------
// EntryKind
// ---------------------------------------------------------------------------

/// The five balance-changing operations the ledger knows about.
///
/// `Topup` and `Refund` credit the account; `Withdraw`, `Deposit`, and
/// `Payment` debit it. The kind also determines whether the operation is
/// required to carry an idempotency key: money movements initiated by the
/// marketplace itself (deposit holds, settlement payments, refunds) must be
/// replay-safe, while user-initiated top-ups and withdrawals may opt in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Funds entering the wallet from an external on-ramp.
    Topup,
    /// Funds leaving the wallet to an external off-ramp.
    Withdraw,
    /// An escrow deposit hold taken from a winning bidder.
    Deposit,
    /// Funds returned to a bidder (displaced candidate, cancelled sale).
    Refund,
    /// The final settlement debit for a won auction.
    Payment,
}

impl EntryKind {
    /// Returns `true` if this kind credits the account.
    pub fn is_credit(self) -> bool {
        matches!(self, EntryKind::Topup | EntryKind::Refund)
    }

    /// Returns `true` if this kind must carry an idempotency key.
    pub fn requires_idempotency_key(self) -> bool {
        matches!(
            self,
            EntryKind::Deposit | EntryKind::Refund | EntryKind::Payment
        )
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Topup => write!(f, "topup"),
            EntryKind::Withdraw => write!(f, "withdraw"),
            EntryKind::Deposit => write!(f, "deposit"),
            EntryKind::Refund => write!(f, "refund"),
            EntryKind::Payment => write!(f, "payment"),
        }
    }
}

// ---------------------------------------------------------------------------
// EntryStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Created, balance delta not yet applied. Only observable by a
    /// concurrent replay of the same idempotency key.
    Pending,
    /// Balance delta applied. The entry counts toward the account balance.
    Completed,
    /// Preconditions failed (insufficient balance, overflow). The balance
    /// was not touched and the idempotency key was released.
    Failed,
    /// Reserved for operator-initiated reversals of pending entries.
    /// No engine flow produces this today; persisted data may carry it.
    Cancelled,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Completed => write!(f, "completed"),
            EntryStatus::Failed => write!(f, "failed"),
            EntryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Related
// ---------------------------------------------------------------------------

/// Links from a ledger entry back to the marketplace objects that caused
/// it. Plain top-ups and withdrawals carry no links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Related {
    /// The auction this entry settles, refunds, or deposits against.
    pub auction_id: Option<AuctionId>,
    /// The escrow deposit this entry pays or refunds.
    pub deposit_id: Option<DepositId>,
}

impl Related {
    /// No related objects. Used for top-ups and withdrawals.
    pub fn none() -> Self {
        Self::default()
    }

    /// Entry caused by an auction-level operation (settlement payment).
    pub fn auction(auction_id: AuctionId) -> Self {
        Self {
            auction_id: Some(auction_id),
            deposit_id: None,
        }
    }

    /// Entry caused by a deposit-level operation (hold or refund).
    pub fn deposit(auction_id: AuctionId, deposit_id: DepositId) -> Self {
        Self {
            auction_id: Some(auction_id),
            deposit_id: Some(deposit_id),
        }
    }
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// One immutable record of an attempted balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry id.
    pub id: EntryId,
    /// The account this entry applies to.
    pub user_id: UserId,
    /// Operation kind. Determines the sign of the delta.
    pub kind: EntryKind,
    /// Absolute amount in minor currency units. Always positive.
    pub amount: u64,
    /// Current lifecycle status.
    pub status: EntryStatus,
    /// Caller-supplied replay token, if any.
    pub idempotency_key: Option<String>,
    /// Marketplace objects that caused this entry.
    pub related: Related,
    /// When the entry was created (`Pending`).
    pub created_at: DateTime<Utc>,
    /// When the entry reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Creates a new entry in `Pending` status.
    pub fn pending(
        user_id: &str,
        kind: EntryKind,
        amount: u64,
        idempotency_key: Option<String>,
        related: Related,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            amount,
            status: EntryStatus::Pending,
            idempotency_key,
            related,
            created_at: now,
            completed_at: None,
        }
    }

    /// Marks the entry completed. Caller must have applied the delta.
    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, EntryStatus::Pending);
        self.status = EntryStatus::Completed;
        self.completed_at = Some(now);
    }

    /// Marks the entry failed. Caller must NOT have applied the delta.
    pub(crate) fn fail(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, EntryStatus::Pending);
        self.status = EntryStatus::Failed;
        self.completed_at = Some(now);
    }

    /// Returns `true` once the entry has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status != EntryStatus::Pending
    }

    /// The signed effect of this entry on the balance, in minor units.
    /// Zero unless the entry is `Completed`.
    pub fn signed_delta(&self) -> i128 {
        if self.status != EntryStatus::Completed {
            return 0;
        }
        if self.kind.is_credit() {
            self.amount as i128
        } else {
            -(self.amount as i128)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
