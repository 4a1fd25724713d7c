//! End-to-end tests for the settlement engine.
//!
//! These tests exercise the full path from listing through bidding, close,
//! escrow deposit, and final settlement across crate boundaries, the way
//! the node drives it: house operations plus time-travelled sweeps. Each
//! test builds its own house and ledger; no shared state, no ordering
//! dependencies.

use std::sync::Arc;

use chrono::{Duration, Utc};

use gavel_core::ledger::{AuctionId, EntryKind, LedgerError, Related, WalletLedger};
use gavel_market::house::{AuctionHouse, MarketConfig};
use gavel_market::notify::{MarketEvent, MemoryNotifier, Notifier};
use gavel_market::{AuctionError, AuctionStatus, DepositStatus, MarketError, ReofferPricing};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Spins up a house over a fresh ledger and an in-memory notifier.
fn market(config: MarketConfig) -> (Arc<AuctionHouse>, Arc<WalletLedger>, Arc<MemoryNotifier>) {
    let ledger = Arc::new(WalletLedger::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let house = Arc::new(AuctionHouse::new(
        Arc::clone(&ledger),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        config,
    ));
    (house, ledger, notifier)
}

/// Creates, approves (window: now .. now+1h), and activates an auction.
fn open_auction(house: &AuctionHouse, starting_price: u64, deposit_percentage: u8) -> AuctionId {
    let now = Utc::now();
    let auction = house
        .create_auction("user:seller", "item-under-test", starting_price, deposit_percentage)
        .unwrap();
    house
        .approve(auction.id, now, now + Duration::hours(1))
        .unwrap();
    house.sweep(now);
    auction.id
}

/// Credits a user's wallet through the top-up path.
fn top_up(ledger: &WalletLedger, user: &str, amount: u64) {
    ledger
        .credit(user, amount, EntryKind::Topup, None, Related::none())
        .unwrap();
}

// ---------------------------------------------------------------------------
// Bidding
// ---------------------------------------------------------------------------

#[test]
fn sequential_bids_raise_price_and_winner() {
    let (house, _, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);

    house.place_bid(id, "user:first", 1_200).unwrap();
    house.place_bid(id, "user:second", 1_500).unwrap();

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.auction.current_price, 1_500);
    assert_eq!(snapshot.auction.winner_id.as_deref(), Some("user:second"));
    assert_eq!(snapshot.bids.len(), 2);
}

#[test]
fn current_price_is_non_decreasing_across_history() {
    let (house, _, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);

    for (bidder, amount) in [("user:a", 1_100), ("user:b", 1_300), ("user:a", 2_500)] {
        house.place_bid(id, bidder, amount).unwrap();
    }
    // Lowball and equal bids bounce without moving the price.
    assert!(house.place_bid(id, "user:c", 2_000).is_err());
    assert!(house.place_bid(id, "user:c", 2_500).is_err());

    let snapshot = house.snapshot(id).unwrap();
    let amounts: Vec<u64> = snapshot.bids.iter().map(|b| b.amount).collect();
    assert!(amounts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(snapshot.auction.current_price, 2_500);
}

#[test]
fn concurrent_equal_bids_exactly_one_succeeds() {
    use std::thread;

    let (house, _, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);

    let mut handles = vec![];
    for i in 0..2 {
        let house = Arc::clone(&house);
        handles.push(thread::spawn(move || {
            house.place_bid(id, &format!("user:racer{i}"), 2_000)
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(MarketError::Auction(AuctionError::StaleBid { .. }))
    )));
    assert_eq!(house.snapshot(id).unwrap().auction.current_price, 2_000);
}

// ---------------------------------------------------------------------------
// Happy-path settlement (spec scenario: 10_000 at 20%)
// ---------------------------------------------------------------------------

#[test]
fn full_settlement_happy_path() {
    let (house, ledger, notifier) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:runner_up", 5_000).unwrap();
    house.place_bid(id, "user:winner", 10_000).unwrap();

    // Close the window; escrow opens a 20% deposit.
    house.sweep(now + Duration::hours(2));
    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.auction.status, AuctionStatus::Ended);
    assert_eq!(snapshot.auction.final_price, Some(10_000));
    let deposit = &snapshot.deposits[0];
    assert_eq!(deposit.amount, 2_000);
    assert_eq!(deposit.holder_id, "user:winner");

    // Pay the deposit, then the remainder.
    top_up(&ledger, "user:winner", 12_000);
    house.pay_deposit(id, "user:winner", "dep-key").unwrap();
    assert_eq!(ledger.balance("user:winner"), 10_000);

    let settled = house.pay(id, "user:winner", "pay-key").unwrap();
    assert_eq!(settled.status, AuctionStatus::Settled);

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.deposits[0].status, DepositStatus::Deducted);
    // due was 8_000: 12_000 - 2_000 - 8_000.
    assert_eq!(ledger.balance("user:winner"), 2_000);
    assert_eq!(ledger.audited_balance("user:winner"), 2_000);

    // Notification surface saw the whole story, outside the locks.
    let events = notifier.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, MarketEvent::DepositOpened { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, MarketEvent::DepositPaid { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        MarketEvent::AuctionSettled {
            winner_id: Some(_),
            ..
        }
    )));
}

#[test]
fn settlement_is_never_applied_twice() {
    let (house, ledger, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:winner", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));
    top_up(&ledger, "user:winner", 10_000);
    house.pay_deposit(id, "user:winner", "dep-key").unwrap();
    house.pay(id, "user:winner", "pay-key").unwrap();
    let balance_after_settle = ledger.balance("user:winner");

    // Replay of the client request: hard error, no second debit.
    let result = house.pay(id, "user:winner", "pay-key");
    assert!(matches!(
        result,
        Err(MarketError::Auction(AuctionError::InvalidTransition { .. }))
    ));
    assert_eq!(ledger.balance("user:winner"), balance_after_settle);
    assert_eq!(ledger.audited_balance("user:winner"), balance_after_settle);
}

#[test]
fn ledger_balances_reconcile_across_all_participants() {
    let (house, ledger, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 25);
    let now = Utc::now();

    for user in ["user:a", "user:b", "user:c"] {
        top_up(&ledger, user, 50_000);
    }
    house.place_bid(id, "user:a", 2_000).unwrap();
    house.place_bid(id, "user:b", 3_000).unwrap();
    house.place_bid(id, "user:c", 4_000).unwrap();

    house.sweep(now + Duration::hours(2));
    house.pay_deposit(id, "user:c", "dep-key").unwrap();
    house.pay(id, "user:c", "pay-key").unwrap();

    // The winner paid exactly the final price; bystanders are untouched.
    assert_eq!(ledger.balance("user:c"), 46_000);
    assert_eq!(ledger.balance("user:a"), 50_000);
    assert_eq!(ledger.balance("user:b"), 50_000);
    for user in ["user:a", "user:b", "user:c"] {
        assert_eq!(ledger.balance(user), ledger.audited_balance(user));
    }
}

// ---------------------------------------------------------------------------
// Insufficient balance and retry (spec scenario: 500 vs 2_000)
// ---------------------------------------------------------------------------

#[test]
fn deposit_retry_after_top_up_with_same_key() {
    let (house, ledger, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:winner", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));

    top_up(&ledger, "user:winner", 500);
    let result = house.pay_deposit(id, "user:winner", "dep-key");
    assert!(matches!(
        result,
        Err(MarketError::Ledger(LedgerError::InsufficientBalance {
            available: 500,
            requested: 2_000,
        }))
    ));
    // Not a terminal failure: the deposit is still waiting.
    assert_eq!(
        house.snapshot(id).unwrap().deposits[0].status,
        DepositStatus::Pending
    );

    top_up(&ledger, "user:winner", 1_500);
    let deposit = house.pay_deposit(id, "user:winner", "dep-key").unwrap();
    assert_eq!(deposit.status, DepositStatus::Paid);
    assert_eq!(ledger.balance("user:winner"), 0);
}

#[test]
fn duplicate_deposit_payment_debits_once() {
    use std::thread;

    let (house, ledger, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:winner", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));
    top_up(&ledger, "user:winner", 10_000);

    // A double-click: two concurrent payments with the same key.
    let mut handles = vec![];
    for _ in 0..2 {
        let house = Arc::clone(&house);
        handles.push(thread::spawn(move || {
            house.pay_deposit(id, "user:winner", "dep-key")
        }));
    }
    for h in handles {
        // One call pays; the other either replays the ledger entry or
        // finds the deposit already paid. Neither debits twice.
        let _ = h.join().unwrap();
    }

    assert_eq!(ledger.balance("user:winner"), 8_000);
    assert_eq!(ledger.audited_balance("user:winner"), 8_000);
    assert_eq!(
        house.snapshot(id).unwrap().deposits[0].status,
        DepositStatus::Paid
    );
}

// ---------------------------------------------------------------------------
// Deposit timeout fallback (spec scenario 5)
// ---------------------------------------------------------------------------

#[test]
fn deposit_timeout_reoffers_next_bidder_same_amount() {
    let (house, _, notifier) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:second", 8_000).unwrap();
    house.place_bid(id, "user:first", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));

    let first_deposit = house.snapshot(id).unwrap().deposits[0].clone();
    assert_eq!(first_deposit.holder_id, "user:first");

    // user:first never pays.
    house.sweep(first_deposit.deadline + Duration::seconds(1));

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.deposits[0].status, DepositStatus::Cancelled);
    let second_deposit = &snapshot.deposits[1];
    assert_eq!(second_deposit.holder_id, "user:second");
    // Original-price policy: same computed amount.
    assert_eq!(second_deposit.amount, first_deposit.amount);
    assert_eq!(snapshot.auction.winner_id.as_deref(), Some("user:second"));
    assert_eq!(snapshot.auction.final_price, Some(10_000));

    assert!(notifier.events().iter().any(|e| matches!(
        e,
        MarketEvent::DepositTimedOut { holder_id, .. } if holder_id == "user:first"
    )));
}

#[test]
fn displaced_winner_cannot_pay_after_deadline() {
    let (house, ledger, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:second", 8_000).unwrap();
    house.place_bid(id, "user:first", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));

    let deadline = house.snapshot(id).unwrap().deposits[0].deadline;
    house.sweep(deadline + Duration::seconds(1));

    // Too late: the deadline error, not a wrong-holder error.
    top_up(&ledger, "user:first", 10_000);
    let result = house.pay_deposit(id, "user:first", "dep-key");
    assert!(matches!(
        result,
        Err(MarketError::Deposit(
            gavel_market::DepositError::DeadlinePassed { .. }
        ))
    ));
    assert_eq!(ledger.balance("user:first"), 10_000);

    // The fallback candidate settles normally.
    top_up(&ledger, "user:second", 10_000);
    house.pay_deposit(id, "user:second", "dep-key-2").unwrap();
    house.pay(id, "user:second", "pay-key-2").unwrap();
    assert_eq!(
        house.snapshot(id).unwrap().auction.status,
        AuctionStatus::Settled
    );
    assert_eq!(ledger.balance("user:second"), 0);
}

#[test]
fn default_chain_exhaustion_cancels_the_sale() {
    let (house, _, notifier) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:a", 2_000).unwrap();
    house.place_bid(id, "user:b", 3_000).unwrap();
    house.sweep(now + Duration::hours(2));

    // Nobody ever pays. Two timeout rounds burn both candidates.
    let d1 = house.snapshot(id).unwrap().deposits[0].deadline;
    house.sweep(d1 + Duration::seconds(1));
    let d2 = house.snapshot(id).unwrap().deposits[1].deadline;
    house.sweep(d2 + Duration::seconds(1));

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.auction.status, AuctionStatus::Cancelled);
    assert_eq!(snapshot.deposits.len(), 2);
    assert!(snapshot
        .deposits
        .iter()
        .all(|d| d.status == DepositStatus::Cancelled));
    assert!(notifier.events().iter().any(|e| matches!(
        e,
        MarketEvent::AuctionCancelled { reason, .. } if reason.contains("exhausted")
    )));
}

#[test]
fn reoffer_can_rebase_to_candidates_own_bid() {
    let config = MarketConfig {
        reoffer_pricing: ReofferPricing::CandidateOwnBid,
        ..Default::default()
    };
    let (house, ledger, _) = market(config);
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:second", 4_000).unwrap();
    house.place_bid(id, "user:first", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));

    let deadline = house.snapshot(id).unwrap().deposits[0].deadline;
    house.sweep(deadline + Duration::seconds(1));

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.auction.final_price, Some(4_000));
    assert_eq!(snapshot.deposits[1].amount, 800);

    // Settlement collects against the re-based price.
    top_up(&ledger, "user:second", 4_000);
    house.pay_deposit(id, "user:second", "dep-2").unwrap();
    house.pay(id, "user:second", "pay-2").unwrap();
    assert_eq!(ledger.balance("user:second"), 0);
}

// ---------------------------------------------------------------------------
// Cancellation & refunds
// ---------------------------------------------------------------------------

#[test]
fn cancelling_after_paid_deposit_refunds_the_holder() {
    let (house, ledger, notifier) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:winner", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));
    top_up(&ledger, "user:winner", 2_000);
    house.pay_deposit(id, "user:winner", "dep-key").unwrap();
    assert_eq!(ledger.balance("user:winner"), 0);

    house.cancel(id, "item damaged in storage").unwrap();

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.auction.status, AuctionStatus::Cancelled);
    assert_eq!(snapshot.deposits[0].status, DepositStatus::Refunded);
    assert_eq!(ledger.balance("user:winner"), 2_000);
    assert_eq!(ledger.audited_balance("user:winner"), 2_000);

    // The refund entry is linked back to the deposit.
    let refund = ledger
        .entries_for("user:winner")
        .into_iter()
        .find(|e| e.kind == EntryKind::Refund)
        .unwrap();
    assert_eq!(refund.related.deposit_id, Some(snapshot.deposits[0].id));

    assert!(notifier
        .events()
        .iter()
        .any(|e| matches!(e, MarketEvent::AuctionCancelled { .. })));
}

#[test]
fn cancel_with_unpaid_deposit_needs_no_refund() {
    let (house, ledger, _) = market(MarketConfig::default());
    let id = open_auction(&house, 1_000, 20);
    let now = Utc::now();

    house.place_bid(id, "user:winner", 10_000).unwrap();
    house.sweep(now + Duration::hours(2));

    house.cancel(id, "moderation takedown").unwrap();

    let snapshot = house.snapshot(id).unwrap();
    assert_eq!(snapshot.auction.status, AuctionStatus::Cancelled);
    assert_eq!(snapshot.deposits[0].status, DepositStatus::Cancelled);
    assert_eq!(ledger.entry_count(), 0);
}

// ---------------------------------------------------------------------------
// Whole-market stress: invariants hold under concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_market_activity_preserves_ledger_invariants() {
    use std::thread;

    let (house, ledger, _) = market(MarketConfig::default());
    let now = Utc::now();

    let auctions: Vec<AuctionId> = (0..4).map(|_| open_auction(&house, 1_000, 20)).collect();
    for i in 0..8 {
        top_up(&ledger, &format!("user:{i}"), 100_000);
    }

    let mut handles = vec![];
    for i in 0..8 {
        let house = Arc::clone(&house);
        let auctions = auctions.clone();
        handles.push(thread::spawn(move || {
            let user = format!("user:{i}");
            for (n, id) in auctions.iter().enumerate() {
                // Deliberately contended amounts; most of these lose.
                let _ = house.place_bid(*id, &user, 2_000 + (i as u64 % 3) * 500 + n as u64);
            }
        }));
    }
    for h in handles {
        h.join().expect("thread panicked");
    }

    // Close everything, pay every deposit and settlement that is owed.
    house.sweep(now + Duration::hours(2));
    for id in &auctions {
        let snapshot = house.snapshot(*id).unwrap();
        if let Some(winner) = snapshot.auction.winner_id.clone() {
            house
                .pay_deposit(*id, &winner, &format!("dep:{id}"))
                .unwrap();
            house.pay(*id, &winner, &format!("pay:{id}")).unwrap();
        }
    }

    // Every auction reached a terminal state and every wallet reconciles.
    for id in &auctions {
        let status = house.snapshot(*id).unwrap().auction.status;
        assert!(status.is_terminal(), "auction {id} ended as {status}");
    }
    for i in 0..8 {
        let user = format!("user:{i}");
        assert_eq!(ledger.balance(&user), ledger.audited_balance(&user));
    }
}
