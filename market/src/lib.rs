//! # Gavel Marketplace Engine
//!
//! The auction settlement core: everything between "bidding closed" and
//! "fully paid". This crate reconciles three sources of truth, the auction
//! outcome, the escrow deposit, and the wallet balance, under concurrent
//! requests and deadlines, with no double-spend, no double-charge, and no
//! lost refund.
//!
//! - **auction** - Lifecycle state machine and the bid acceptance rule.
//! - **bid** - Immutable bid history; the escrow fallback candidate list.
//! - **deposit** - Escrow deposit state machine with deadlines.
//! - **escrow** - Deposit coordinator: open, pay, timeout fallback, cancel.
//! - **settlement** - Final payment coordinator and terminal finalize.
//! - **house** - The concurrent facade: per-auction locks, deadline sweep.
//! - **notify** - Fire-and-forget event surface for collaborators.
//!
//! ## Design Principles
//!
//! 1. State transitions are explicit enum variants, never boolean flags.
//! 2. Every money movement goes through the `gavel-core` wallet ledger
//!    under an idempotency key, so any step can be retried safely.
//! 3. Per-auction and per-account mutexes are held only for the
//!    compare-and-write; notification dispatch always happens outside.

pub mod auction;
pub mod bid;
pub mod deposit;
pub mod escrow;
pub mod house;
pub mod notify;
pub mod settlement;

pub use auction::{Auction, AuctionError, AuctionStatus, CloseOutcome, SaleOutcome};
pub use bid::{Bid, BidBook};
pub use deposit::{Deposit, DepositError, DepositStatus};
pub use escrow::{EscrowCoordinator, ReofferPricing};
pub use house::{AuctionHouse, AuctionSnapshot, MarketConfig, MarketError, SweepStats};
pub use notify::{MarketEvent, MemoryNotifier, Notifier, NullNotifier};
pub use settlement::SettlementCoordinator;
