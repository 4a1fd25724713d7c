//! # Settlement Coordinator
//!
//! The last leg of a sale: once a deposit is `Paid`, the winner owes
//! `final_price - deposit.amount`. The coordinator collects that remainder
//! through the wallet ledger, applies the deposit against the price, and
//! writes the auction's terminal `Settled` status.
//!
//! Settlement failures split in two: `InsufficientBalance` is retryable
//! (the auction stays `Ended`, the deposit stays `Paid`, the caller tops
//! up and retries with the same idempotency key), while calling `pay` on
//! an already-settled auction is a hard `InvalidTransition`. That split is
//! what makes double settlement impossible: the terminal status check runs
//! before any wallet access.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use gavel_core::ledger::{EntryKind, Related, WalletLedger};

use crate::auction::{AuctionError, AuctionStatus, SaleOutcome};
use crate::deposit::DepositStatus;
use crate::house::{AuctionRecord, MarketError};
use crate::notify::MarketEvent;

/// The remaining amount due after the deposit is applied.
///
/// `deposit_amount` is derived from `final_price` with a percentage capped
/// at 100, so it can never exceed the price; a violation means corrupted
/// state and aborts rather than settling incorrectly.
pub fn compute_due(final_price: u64, deposit_amount: u64) -> u64 {
    final_price
        .checked_sub(deposit_amount)
        .expect("deposit never exceeds the final price")
}

/// Coordinates final payment between the auction record and the ledger.
pub struct SettlementCoordinator {
    ledger: Arc<WalletLedger>,
}

impl SettlementCoordinator {
    /// Creates a coordinator over the shared ledger.
    pub fn new(ledger: Arc<WalletLedger>) -> Self {
        Self { ledger }
    }

    /// Collects the remaining balance due and settles the auction.
    ///
    /// Requires the auction `Ended`, `payer` to be the (possibly
    /// reassigned) winner, and the active deposit `Paid`. When the deposit
    /// already covers the full price (`due == 0`, i.e. 100% deposit), no
    /// wallet debit is made.
    ///
    /// # Errors
    ///
    /// [`MarketError::Auction`] with `InvalidTransition` from any other
    /// status, including `Settled` (no double settlement);
    /// [`MarketError::NotWinner`]; [`MarketError::NoActiveDeposit`] /
    /// [`MarketError::Deposit`] when the deposit is missing or unpaid;
    /// [`MarketError::Ledger`] with `InsufficientBalance` when the wallet
    /// cannot cover the remainder (retryable after a top-up).
    pub fn pay(
        &self,
        record: &mut AuctionRecord,
        payer: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let auction_id = record.auction.id;
        if record.auction.status != AuctionStatus::Ended {
            return Err(AuctionError::InvalidTransition {
                current: record.auction.status,
                operation: "pay",
            }
            .into());
        }
        if record.auction.winner_id.as_deref() != Some(payer) {
            return Err(MarketError::NotWinner {
                caller: payer.to_string(),
            });
        }

        let final_price = record
            .auction
            .final_price
            .expect("ended auction has a final price");
        let deposit = record
            .active_deposit_mut()
            .ok_or(MarketError::NoActiveDeposit(auction_id))?;
        if deposit.status != DepositStatus::Paid {
            return Err(crate::deposit::DepositError::InvalidState {
                current: deposit.status,
                expected: "paid",
            }
            .into());
        }

        let due = compute_due(final_price, deposit.amount);
        if due > 0 {
            self.ledger.debit(
                payer,
                due,
                EntryKind::Payment,
                Some(idempotency_key.to_string()),
                Related::auction(auction_id),
            )?;
        }

        deposit.deduct(now).expect("paid deposit deducts");
        record
            .auction
            .finalize(SaleOutcome::Settled, now)
            .expect("ended auction finalizes");

        debug!(
            auction_id = %auction_id,
            winner = payer,
            final_price,
            due,
            "auction settled"
        );
        Ok(vec![MarketEvent::AuctionSettled {
            auction_id,
            winner_id: Some(payer.to_string()),
            final_price: Some(final_price),
        }])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::Auction;
    use crate::bid::Bid;
    use crate::escrow::{EscrowCoordinator, ReofferPricing};
    use chrono::Duration;
    use gavel_core::ledger::{EntryKind, LedgerError, Related};

    const GRACE: std::time::Duration = std::time::Duration::from_secs(3600);

    /// Record ended at 10_000 with a 20% deposit already paid by user:w.
    fn paid_record() -> (AuctionRecord, Arc<WalletLedger>, DateTime<Utc>) {
        let now = Utc::now();
        let mut auction = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        auction
            .approve(now, now + Duration::hours(1), now, Duration::seconds(60))
            .unwrap();
        auction.activate(now).unwrap();
        let mut record = AuctionRecord::new(auction);
        record.auction.accept_bid("user:w", 10_000, now).unwrap();
        record.bids.record(Bid {
            auction_id: record.auction.id,
            bidder_id: "user:w".into(),
            amount: 10_000,
            placed_at: now,
        });
        record.auction.close(now + Duration::hours(2)).unwrap();

        let ledger = Arc::new(WalletLedger::new());
        let escrow = EscrowCoordinator::new(
            Arc::clone(&ledger),
            GRACE,
            ReofferPricing::OriginalFinalPrice,
        );
        escrow.open_deposit(&mut record, now).unwrap();
        ledger
            .credit("user:w", 20_000, EntryKind::Topup, None, Related::none())
            .unwrap();
        escrow
            .pay_deposit(&mut record, "user:w", "dep-1", now)
            .unwrap();
        (record, ledger, now)
    }

    #[test]
    fn due_is_price_minus_deposit() {
        assert_eq!(compute_due(10_000, 2_000), 8_000);
        assert_eq!(compute_due(10_000, 10_000), 0);
    }

    #[test]
    fn pay_settles_and_deducts() {
        let (mut record, ledger, now) = paid_record();
        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));

        let events = settlement.pay(&mut record, "user:w", "pay-1", now).unwrap();

        assert_eq!(record.auction.status, AuctionStatus::Settled);
        assert_eq!(record.deposits[0].status, DepositStatus::Deducted);
        // 20_000 - 2_000 deposit - 8_000 remainder.
        assert_eq!(ledger.balance("user:w"), 10_000);
        assert!(matches!(
            events[0],
            MarketEvent::AuctionSettled {
                final_price: Some(10_000),
                ..
            }
        ));
    }

    #[test]
    fn pay_twice_never_debits_twice() {
        let (mut record, ledger, now) = paid_record();
        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));

        settlement.pay(&mut record, "user:w", "pay-1", now).unwrap();
        let result = settlement.pay(&mut record, "user:w", "pay-1", now);

        assert!(matches!(
            result,
            Err(MarketError::Auction(AuctionError::InvalidTransition { .. }))
        ));
        assert_eq!(ledger.balance("user:w"), 10_000);
    }

    #[test]
    fn pay_by_non_winner_rejected() {
        let (mut record, ledger, now) = paid_record();
        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));

        let result = settlement.pay(&mut record, "user:other", "pay-1", now);
        assert!(matches!(result, Err(MarketError::NotWinner { .. })));
        assert_eq!(record.auction.status, AuctionStatus::Ended);
    }

    #[test]
    fn pay_with_unpaid_deposit_rejected() {
        let now = Utc::now();
        let mut auction = Auction::new("user:seller", "item-1", 1_000, 20, now).unwrap();
        auction
            .approve(now, now + Duration::hours(1), now, Duration::seconds(60))
            .unwrap();
        auction.activate(now).unwrap();
        let mut record = AuctionRecord::new(auction);
        record.auction.accept_bid("user:w", 10_000, now).unwrap();
        record.auction.close(now + Duration::hours(2)).unwrap();

        let ledger = Arc::new(WalletLedger::new());
        let escrow = EscrowCoordinator::new(
            Arc::clone(&ledger),
            GRACE,
            ReofferPricing::OriginalFinalPrice,
        );
        escrow.open_deposit(&mut record, now).unwrap();

        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));
        let result = settlement.pay(&mut record, "user:w", "pay-1", now);
        assert!(matches!(result, Err(MarketError::Deposit(_))));
    }

    #[test]
    fn insufficient_balance_leaves_everything_retryable() {
        let (mut record, ledger, now) = paid_record();
        // Burn the remaining balance below the 8_000 due.
        ledger
            .debit("user:w", 17_000, EntryKind::Withdraw, None, Related::none())
            .unwrap();
        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));

        let result = settlement.pay(&mut record, "user:w", "pay-1", now);
        assert!(matches!(
            result,
            Err(MarketError::Ledger(LedgerError::InsufficientBalance { .. }))
        ));
        assert_eq!(record.auction.status, AuctionStatus::Ended);
        assert_eq!(record.deposits[0].status, DepositStatus::Paid);

        // Top up and retry with the same key.
        ledger
            .credit("user:w", 10_000, EntryKind::Topup, None, Related::none())
            .unwrap();
        settlement.pay(&mut record, "user:w", "pay-1", now).unwrap();
        assert_eq!(record.auction.status, AuctionStatus::Settled);
        assert_eq!(ledger.balance("user:w"), 3_000);
    }

    #[test]
    fn hundred_percent_deposit_settles_without_payment() {
        let now = Utc::now();
        let mut auction = Auction::new("user:seller", "item-1", 1_000, 100, now).unwrap();
        auction
            .approve(now, now + Duration::hours(1), now, Duration::seconds(60))
            .unwrap();
        auction.activate(now).unwrap();
        let mut record = AuctionRecord::new(auction);
        record.auction.accept_bid("user:w", 5_000, now).unwrap();
        record.auction.close(now + Duration::hours(2)).unwrap();

        let ledger = Arc::new(WalletLedger::new());
        let escrow = EscrowCoordinator::new(
            Arc::clone(&ledger),
            GRACE,
            ReofferPricing::OriginalFinalPrice,
        );
        escrow.open_deposit(&mut record, now).unwrap();
        ledger
            .credit("user:w", 5_000, EntryKind::Topup, None, Related::none())
            .unwrap();
        escrow
            .pay_deposit(&mut record, "user:w", "dep-1", now)
            .unwrap();

        let settlement = SettlementCoordinator::new(Arc::clone(&ledger));
        settlement.pay(&mut record, "user:w", "pay-1", now).unwrap();

        assert_eq!(record.auction.status, AuctionStatus::Settled);
        assert_eq!(ledger.balance("user:w"), 0);
        // Deposit entry only; no payment entry for a zero due.
        let entries = ledger.entries_for("user:w");
        assert!(!entries.iter().any(|e| e.kind == EntryKind::Payment));
    }
}
