//! # Escrow / Deposit Coordinator
//!
//! Runs the deposit workflow that protects sellers from non-paying
//! winners. When an auction closes with a winner, the coordinator opens a
//! deposit window; if the winner pays in time the settlement coordinator
//! takes over, and if the deadline passes unpaid the coordinator displaces
//! the winner and re-offers to the next-highest distinct bidder, walking
//! the bid history until someone pays or the candidate list runs dry.
//!
//! All methods operate on an [`AuctionRecord`] the caller has locked; the
//! coordinator itself holds no per-auction state. Wallet access goes
//! through the shared [`WalletLedger`] with deterministic idempotency keys
//! for engine-initiated refunds.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use gavel_core::ledger::{EntryKind, Related, WalletLedger};

use crate::auction::{AuctionStatus, SaleOutcome};
use crate::deposit::Deposit;
use crate::house::{AuctionRecord, MarketError};
use crate::notify::MarketEvent;

// ---------------------------------------------------------------------------
// Re-offer pricing policy
// ---------------------------------------------------------------------------

/// What a re-offered auction charges the fallback candidate.
///
/// The observed marketplace behavior is ambiguous here, so the policy is a
/// configuration point. The default keeps the original top price: the
/// defaulting winner set the market, the next candidate is asked to honor
/// it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReofferPricing {
    /// Keep the final price snapshotted at close (default).
    #[default]
    OriginalFinalPrice,
    /// Re-base the final price to the fallback candidate's own highest
    /// bid. Deposit and amount due are derived from the new price.
    CandidateOwnBid,
}

/// Rounded deposit amount for a final price, half-up.
///
/// `percentage` is capped at 100 upstream, so the result never exceeds
/// `final_price` and the settlement due never goes negative.
pub(crate) fn deposit_amount(final_price: u64, percentage: u8) -> u64 {
    ((final_price as u128 * percentage as u128 + 50) / 100) as u64
}

// ---------------------------------------------------------------------------
// EscrowCoordinator
// ---------------------------------------------------------------------------

/// Coordinates deposits between the auction state machine and the wallet
/// ledger.
pub struct EscrowCoordinator {
    ledger: Arc<WalletLedger>,
    deposit_grace: Duration,
    pricing: ReofferPricing,
}

impl EscrowCoordinator {
    /// Creates a coordinator with the given deposit window and re-offer
    /// policy.
    pub fn new(
        ledger: Arc<WalletLedger>,
        deposit_grace: std::time::Duration,
        pricing: ReofferPricing,
    ) -> Self {
        Self {
            ledger,
            deposit_grace: Duration::from_std(deposit_grace)
                .expect("deposit grace fits chrono duration range"),
            pricing,
        }
    }

    /// Opens a deposit window for the auction's current winner.
    ///
    /// A zero-percent deposit (amount 0) has nothing to hold: the deposit
    /// is recorded and marked paid immediately so settlement can proceed.
    ///
    /// # Errors
    ///
    /// [`MarketError::Auction`] if the auction is not `Ended`;
    /// [`MarketError::DepositAlreadyActive`] if a pending or paid deposit
    /// exists (the at-most-one invariant).
    pub fn open_deposit(
        &self,
        record: &mut AuctionRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if record.auction.status != AuctionStatus::Ended {
            return Err(crate::auction::AuctionError::InvalidTransition {
                current: record.auction.status,
                operation: "open deposit",
            }
            .into());
        }
        if record.active_deposit().is_some() {
            return Err(MarketError::DepositAlreadyActive(record.auction.id));
        }

        let winner = record
            .auction
            .winner_id
            .clone()
            .expect("ended auction has a winner");
        let final_price = record
            .auction
            .final_price
            .expect("ended auction has a final price");

        let amount = deposit_amount(final_price, record.auction.deposit_percentage);
        let deadline = now + self.deposit_grace;
        let mut deposit = Deposit::open(
            record.auction.id,
            &winner,
            amount,
            record.auction.deposit_percentage,
            deadline,
            now,
        );

        let mut events = vec![MarketEvent::DepositOpened {
            auction_id: record.auction.id,
            deposit_id: deposit.id,
            holder_id: winner.clone(),
            amount,
            deadline,
        }];

        if amount == 0 {
            // Nothing to hold; skip the wallet entirely.
            deposit
                .mark_paid(None, now)
                .expect("freshly opened deposit is pending");
            events.push(MarketEvent::DepositPaid {
                auction_id: record.auction.id,
                deposit_id: deposit.id,
                holder_id: winner,
                amount,
            });
        }

        debug!(
            auction_id = %record.auction.id,
            deposit_id = %deposit.id,
            amount,
            %deadline,
            "deposit opened"
        );
        record.deposits.push(deposit);
        Ok(events)
    }

    /// Pays the active deposit from the holder's wallet.
    ///
    /// On `InsufficientBalance` the deposit stays `Pending`: the holder is
    /// expected to top up and retry with the same idempotency key before
    /// the deadline.
    ///
    /// # Errors
    ///
    /// [`MarketError::NoActiveDeposit`], [`MarketError::NotDepositHolder`],
    /// [`MarketError::Deposit`] (wrong state or deadline passed), and
    /// [`MarketError::Ledger`] for wallet failures.
    pub fn pay_deposit(
        &self,
        record: &mut AuctionRecord,
        payer: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(Deposit, Vec<MarketEvent>), MarketError> {
        let auction_id = record.auction.id;
        let deposit = record
            .active_deposit_mut()
            .ok_or(MarketError::NoActiveDeposit(auction_id))?;

        if deposit.holder_id != payer {
            return Err(MarketError::NotDepositHolder {
                caller: payer.to_string(),
                holder: deposit.holder_id.clone(),
            });
        }
        deposit.ensure_payable(now)?;

        let entry = self.ledger.debit(
            payer,
            deposit.amount,
            EntryKind::Deposit,
            Some(idempotency_key.to_string()),
            Related::deposit(auction_id, deposit.id),
        )?;
        deposit
            .mark_paid(Some(entry.id), now)
            .expect("payable deposit is pending");

        debug!(
            auction_id = %auction_id,
            deposit_id = %deposit.id,
            entry_id = %entry.id,
            "deposit paid"
        );
        let events = vec![MarketEvent::DepositPaid {
            auction_id,
            deposit_id: deposit.id,
            holder_id: deposit.holder_id.clone(),
            amount: deposit.amount,
        }];
        Ok((deposit.clone(), events))
    }

    /// Runs the timeout path for an expired pending deposit: cancel it,
    /// displace the holder, and either open a deposit for the next
    /// distinct candidate or finalize the auction cancelled.
    ///
    /// A no-op (empty event list) when the active deposit is not expired.
    pub fn handle_timeout(
        &self,
        record: &mut AuctionRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let auction_id = record.auction.id;
        let expired = match record.active_deposit_mut() {
            Some(d) if d.is_expired(now) => d,
            _ => return Ok(Vec::new()),
        };

        expired.cancel(now).expect("expired deposit is pending");
        let displaced_holder = expired.holder_id.clone();
        let expired_id = expired.id;
        record.displaced.insert(displaced_holder.clone());

        let mut events = vec![MarketEvent::DepositTimedOut {
            auction_id,
            deposit_id: expired_id,
            holder_id: displaced_holder.clone(),
        }];
        debug!(
            auction_id = %auction_id,
            deposit_id = %expired_id,
            holder = %displaced_holder,
            "deposit timed out, holder displaced"
        );

        match record.bids.next_candidate(&record.displaced) {
            Some(candidate) => {
                let bidder = candidate.bidder_id.clone();
                let rebased = match self.pricing {
                    ReofferPricing::OriginalFinalPrice => None,
                    ReofferPricing::CandidateOwnBid => Some(candidate.amount),
                };
                record.auction.reassign_winner(&bidder, rebased, now)?;
                events.extend(self.open_deposit(record, now)?);
            }
            None => {
                record.auction.finalize(SaleOutcome::Cancelled, now)?;
                events.push(MarketEvent::AuctionCancelled {
                    auction_id,
                    reason: "deposit candidates exhausted".to_string(),
                });
            }
        }
        Ok(events)
    }

    /// Cancels an auction on behalf of the seller or a moderator, or as
    /// the payment-deadline policy. Refunds a paid deposit and cancels a
    /// pending one before writing the terminal status.
    pub fn cancel_auction(
        &self,
        record: &mut AuctionRecord,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let auction_id = record.auction.id;
        match record.auction.status {
            AuctionStatus::Pending | AuctionStatus::Approved | AuctionStatus::Active => {
                // No deposit can exist before close.
                record.auction.cancel(now)?;
            }
            AuctionStatus::Ended => {
                if let Some(deposit) = record.active_deposit_mut() {
                    if deposit.status == crate::deposit::DepositStatus::Paid {
                        self.refund_deposit(deposit, now)?;
                    } else {
                        deposit.cancel(now).expect("active deposit is pending");
                    }
                }
                record.auction.finalize(SaleOutcome::Cancelled, now)?;
            }
            current => {
                return Err(crate::auction::AuctionError::InvalidTransition {
                    current,
                    operation: "cancel",
                }
                .into());
            }
        }
        Ok(vec![MarketEvent::AuctionCancelled {
            auction_id,
            reason: reason.to_string(),
        }])
    }

    /// Returns a paid hold to its holder. The idempotency key is derived
    /// from the deposit id so a crashed-and-retried cancellation can never
    /// refund twice.
    pub(crate) fn refund_deposit(
        &self,
        deposit: &mut Deposit,
        now: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        let entry = self.ledger.credit(
            &deposit.holder_id,
            deposit.amount,
            EntryKind::Refund,
            Some(format!("refund:{}", deposit.id)),
            Related::deposit(deposit.auction_id, deposit.id),
        )?;
        deposit.refund(entry.id, now)?;
        debug!(
            deposit_id = %deposit.id,
            holder = %deposit.holder_id,
            amount = deposit.amount,
            "deposit refunded"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
