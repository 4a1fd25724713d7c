//! # WalletLedger Service
//!
//! Thread-safe front door to every wallet balance. All mutations go through
//! [`WalletLedger::credit`] / [`WalletLedger::debit`], which create a
//! [`LedgerEntry`], check preconditions, apply the delta, and write the
//! entry's terminal status as one indivisible unit per account.
//!
//! ## Design
//!
//! - `DashMap` registries hold accounts, the append-only entry log, and the
//!   idempotency index. Reads (balance queries, statements) never contend
//!   with writers on other accounts.
//! - Each account sits behind its own `parking_lot::Mutex`. The
//!   read-balance / compare / write sequence runs entirely inside that
//!   lock, so two debits racing on one account serialize and two debits on
//!   different accounts proceed in parallel.
//! - The idempotency index is reserved through the `DashMap` entry API
//!   before the delta is applied. The reserving writer records the pending
//!   entry before releasing the index shard, so a concurrent replay always
//!   finds the entry it is told about.
//! - A `Failed` entry releases its key: a retry of the same logical
//!   operation (after a top-up, say) is a fresh attempt, not a replay.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use super::account::{AccountError, WalletAccount};
use super::entry::{EntryId, EntryKind, LedgerEntry, Related, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by ledger operations.
///
/// All of these are recoverable by the caller; none leave partial state
/// behind. A duplicate idempotency key is deliberately NOT an error: the
/// original entry is returned instead.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Zero-amount operations are no-ops and almost certainly a caller bug.
    #[error("zero-amount ledger operations are not permitted")]
    ZeroAmount,

    /// The entry kind does not match the called operation (e.g. `credit`
    /// with a debit kind such as `payment`).
    #[error("entry kind {kind} cannot be applied as a {direction}")]
    WrongDirection {
        /// The offending kind.
        kind: EntryKind,
        /// "credit" or "debit".
        direction: &'static str,
    },

    /// Marketplace-initiated kinds (deposit, payment, refund) must be
    /// replay-safe and therefore require an idempotency key.
    #[error("entry kind {0} requires an idempotency key")]
    IdempotencyKeyRequired(EntryKind),

    /// The account balance does not cover the requested debit. The failed
    /// attempt is recorded as a `failed` entry; the balance is untouched.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance at the time of the attempt.
        available: u64,
        /// Amount that was requested.
        requested: u64,
    },

    /// The credit would overflow the account balance.
    #[error("balance overflow: current {current}, credit {credit}")]
    Overflow {
        /// Balance at the time of the attempt.
        current: u64,
        /// Amount that caused the overflow.
        credit: u64,
    },
}

impl From<AccountError> for LedgerError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::InsufficientBalance {
                available,
                requested,
            } => LedgerError::InsufficientBalance {
                available,
                requested,
            },
            AccountError::Overflow { current, credit } => {
                LedgerError::Overflow { current, credit }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WalletLedger
// ---------------------------------------------------------------------------

/// The thread-safe wallet ledger service.
pub struct WalletLedger {
    /// Accounts by user, each behind its own mutex for per-account
    /// serialization of the compare-and-write sequence.
    accounts: DashMap<UserId, Arc<Mutex<WalletAccount>>>,

    /// Append-only entry log, indexed by entry id.
    entries: DashMap<EntryId, LedgerEntry>,

    /// Idempotency key to entry id, for pending and completed entries only.
    idempotency: DashMap<String, EntryId>,
}

impl std::fmt::Debug for WalletLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLedger")
            .field("accounts", &self.accounts.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl WalletLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            entries: DashMap::new(),
            idempotency: DashMap::new(),
        }
    }

    /// Credits `amount` to `user`.
    ///
    /// `kind` must be a credit kind (`topup` or `refund`). The account is
    /// created on first touch. Supplying an `idempotency_key` makes the
    /// operation replay-safe: a second call with the same key returns the
    /// original entry without re-applying the delta.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAmount`], [`LedgerError::WrongDirection`],
    /// [`LedgerError::IdempotencyKeyRequired`], [`LedgerError::Overflow`].
    pub fn credit(
        &self,
        user: &str,
        amount: u64,
        kind: EntryKind,
        idempotency_key: Option<String>,
        related: Related,
    ) -> Result<LedgerEntry, LedgerError> {
        if !kind.is_credit() {
            return Err(LedgerError::WrongDirection {
                kind,
                direction: "credit",
            });
        }
        self.apply(user, amount, kind, idempotency_key, related)
    }

    /// Debits `amount` from `user`.
    ///
    /// `kind` must be a debit kind (`withdraw`, `deposit`, or `payment`).
    /// A debit that would cross zero fails with
    /// [`LedgerError::InsufficientBalance`]; the attempt is recorded as a
    /// `failed` entry and the balance is untouched.
    pub fn debit(
        &self,
        user: &str,
        amount: u64,
        kind: EntryKind,
        idempotency_key: Option<String>,
        related: Related,
    ) -> Result<LedgerEntry, LedgerError> {
        if kind.is_credit() {
            return Err(LedgerError::WrongDirection {
                kind,
                direction: "debit",
            });
        }
        self.apply(user, amount, kind, idempotency_key, related)
    }

    /// Returns the current balance for `user`, or 0 for an account the
    /// ledger has never touched.
    pub fn balance(&self, user: &str) -> u64 {
        self.accounts
            .get(user)
            .map(|acct| acct.lock().balance())
            .unwrap_or(0)
    }

    /// Returns the entry with the given id, if recorded.
    pub fn entry(&self, id: &EntryId) -> Option<LedgerEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Returns `user`'s entries in chronological order (ties broken by
    /// entry id for a stable statement).
    pub fn entries_for(&self, user: &str) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| e.value().user_id == user)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    /// Recomputes `user`'s balance from the sum of completed entry deltas.
    ///
    /// Used by audits and tests to check the core invariant
    /// `balance(user) == sum(completed deltas)`. A negative sum means the
    /// ledger itself is corrupt; that is a fatal invariant violation, not
    /// a recoverable error.
    pub fn audited_balance(&self, user: &str) -> u64 {
        let sum: i128 = self
            .entries
            .iter()
            .filter(|e| e.value().user_id == user)
            .map(|e| e.value().signed_delta())
            .sum();
        u64::try_from(sum).expect("ledger invariant violated: completed debits exceed credits")
    }

    /// Number of accounts the ledger has touched.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of recorded entries, terminal and pending.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Creates the entry, checks preconditions, applies the delta, and
    /// writes the terminal status, all inside the account's mutex.
    fn apply(
        &self,
        user: &str,
        amount: u64,
        kind: EntryKind,
        idempotency_key: Option<String>,
        related: Related,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if kind.requires_idempotency_key() && idempotency_key.is_none() {
            return Err(LedgerError::IdempotencyKeyRequired(kind));
        }

        let account = Arc::clone(
            self.accounts
                .entry(user.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(WalletAccount::new(user, Utc::now()))))
                .value(),
        );
        let mut acct = account.lock();

        let now = Utc::now();
        let mut entry = LedgerEntry::pending(user, kind, amount, idempotency_key.clone(), related, now);

        // Reserve the idempotency key. The pending entry is recorded before
        // the index shard is released, so a concurrent replay that finds the
        // key occupied always finds the entry behind it.
        if let Some(key) = &idempotency_key {
            match self.idempotency.entry(key.clone()) {
                Entry::Occupied(existing) => {
                    let existing_id = *existing.get();
                    drop(existing);
                    return Ok(self
                        .entries
                        .get(&existing_id)
                        .map(|e| e.clone())
                        .expect("idempotency index points at a recorded entry"));
                }
                Entry::Vacant(slot) => {
                    self.entries.insert(entry.id, entry.clone());
                    slot.insert(entry.id);
                }
            }
        } else {
            self.entries.insert(entry.id, entry.clone());
        }

        let applied = if kind.is_credit() {
            acct.credit(amount, now)
        } else {
            acct.debit(amount, now)
        };

        match applied {
            Ok(_) => {
                entry.complete(now);
                self.entries.insert(entry.id, entry.clone());
                Ok(entry)
            }
            Err(e) => {
                entry.fail(now);
                self.entries.insert(entry.id, entry.clone());
                // A failed attempt does not consume the key; the caller is
                // expected to retry the same logical operation after fixing
                // the precondition (e.g. topping up).
                if let Some(key) = &idempotency_key {
                    self.idempotency.remove(key);
                }
                Err(e.into())
            }
        }
    }
}

impl Default for WalletLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
