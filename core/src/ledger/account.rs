//! # Wallet Accounts
//!
//! A [`WalletAccount`] is one user's balance in minor currency units,
//! together with the arithmetic that keeps it non-negative and
//! overflow-free. The struct itself is not thread-safe; serialization of
//! concurrent mutations is handled by [`super::wallet::WalletLedger`],
//! which holds each account behind a `parking_lot::Mutex`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entry::UserId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur when applying a balance delta.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Attempted to debit more than the available balance.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// The balance before the failed debit.
        available: u64,
        /// The amount that was requested.
        requested: u64,
    },

    /// Arithmetic overflow during a credit operation. If you are hitting
    /// this, someone is crediting more than 18.4 quintillion minor units.
    /// That is either a bug or an attack.
    #[error("balance overflow: current {current}, credit {credit}")]
    Overflow {
        /// The balance before the failed credit.
        current: u64,
        /// The amount that caused the overflow.
        credit: u64,
    },
}

// ---------------------------------------------------------------------------
// WalletAccount
// ---------------------------------------------------------------------------

/// One user's wallet balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    /// The account owner.
    pub user_id: UserId,

    /// Balance in minor currency units. Never negative by construction:
    /// `u64` plus the debit guard below.
    balance: u64,

    /// When the account was first created (first ledger touch).
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last applied balance change.
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    /// Creates a zero-balance account for `user_id`.
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The current balance in minor units.
    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Adds `amount` to the balance, returning the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Overflow`] if the credit would exceed
    /// `u64::MAX`. The balance is unchanged on error.
    pub fn credit(&mut self, amount: u64, now: DateTime<Utc>) -> Result<u64, AccountError> {
        let new_balance = self
            .balance
            .checked_add(amount)
            .ok_or(AccountError::Overflow {
                current: self.balance,
                credit: amount,
            })?;
        self.balance = new_balance;
        self.updated_at = now;
        Ok(new_balance)
    }

    /// Subtracts `amount` from the balance, returning the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::InsufficientBalance`] if `amount` exceeds
    /// the current balance. The balance is unchanged on error.
    pub fn debit(&mut self, amount: u64, now: DateTime<Utc>) -> Result<u64, AccountError> {
        if self.balance < amount {
            return Err(AccountError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.updated_at = now;
        Ok(self.balance)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
