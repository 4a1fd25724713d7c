//! # Protocol Constants
//!
//! Every deadline, tolerance, and bound shared by the marketplace engine
//! lives here. If you are hardcoding one of these somewhere else, you are
//! doing it wrong and you owe the team coffee.
//!
//! Runtime-tunable knobs (grace periods a deployment may override) take
//! these as defaults; hard protocol bounds (percentage limits) are used
//! directly.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Deadlines & Sweep
// ---------------------------------------------------------------------------

/// Default window a selected winner has to pay the escrow deposit before
/// the auction is re-offered to the next bidder.
pub const DEFAULT_DEPOSIT_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the node's sweep loop re-evaluates stored deadlines
/// (activation instants, close instants, deposit deadlines).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// How far in the past an auction's `start_at` may lie at approval time.
/// Covers clock skew between the moderation service and this node without
/// letting anyone approve an auction that should already have ended.
pub const APPROVAL_PAST_TOLERANCE: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Monetary Bounds
// ---------------------------------------------------------------------------

/// Upper bound for an auction's deposit percentage. At 100 the deposit
/// equals the final price and settlement collects nothing further.
pub const MAX_DEPOSIT_PERCENTAGE: u8 = 100;

/// Divisor for deposit percentage arithmetic.
pub const PERCENT_DIVISOR: u64 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_grace_is_one_day() {
        assert_eq!(DEFAULT_DEPOSIT_GRACE.as_secs(), 86_400);
    }

    #[test]
    fn percentage_bound_keeps_due_non_negative() {
        // due = final_price - round(final_price * pct / 100) stays >= 0
        // exactly because pct is capped at the divisor.
        assert_eq!(MAX_DEPOSIT_PERCENTAGE as u64, PERCENT_DIVISOR);
    }
}
