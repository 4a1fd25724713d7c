//! # Wallet Ledger
//!
//! The single source of truth for user balances. Every balance mutation in
//! the marketplace, from a buyer topping up to a settlement debit, flows
//! through this module as an immutable [`LedgerEntry`].
//!
//! ## Architecture
//!
//! ```text
//! entry.rs   - Ledger entry records: kinds, statuses, related-object links
//! account.rs - Per-user balance arithmetic with overflow/underflow guards
//! wallet.rs  - WalletLedger: the thread-safe service with idempotency keys
//! ```
//!
//! ## Invariants
//!
//! 1. A balance is never negative. Debits that would cross zero fail
//!    without touching the balance.
//! 2. For every user, the sum of completed entry deltas equals the stored
//!    balance at every observable point in time.
//! 3. An idempotency key maps to at most one live (pending or completed)
//!    entry, ever. Replaying a keyed operation returns the original entry.

pub mod account;
pub mod entry;
pub mod wallet;

pub use account::{AccountError, WalletAccount};
pub use entry::{
    AuctionId, DepositId, EntryId, EntryKind, EntryStatus, LedgerEntry, Related, UserId,
};
pub use wallet::{LedgerError, WalletLedger};
