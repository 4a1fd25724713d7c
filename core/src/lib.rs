// Copyright (c) 2026 Gavel Systems. MIT License.
// See LICENSE for details.

//! # Gavel Core Library
//!
//! The money layer of the Gavel auction marketplace. Everything in this
//! crate exists to answer one question correctly under concurrency and
//! partial failure: "where is every minor currency unit, and which single
//! ledger entry put it there?"
//!
//! ## Architecture
//!
//! - **ledger** - The wallet ledger: accounts, append-only entries, and the
//!   thread-safe service that mutates balances with exactly-once semantics.
//! - **config** - Protocol constants and default deadlines.
//!
//! ## Design Philosophy
//!
//! 1. All amounts are `u64` in minor currency units. No floating point,
//!    ever. The ledger never divides.
//! 2. A balance changes only through a ledger entry, and a ledger entry
//!    terminal state is written exactly once.
//! 3. `checked_add`/`checked_sub` on every monetary path. Wrapping
//!    arithmetic and money do not mix.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod ledger;
