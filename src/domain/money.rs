//! Monetary helpers.
//!
//! Amounts are [`Decimal`]s. Payouts and commissions are rounded to two
//! decimal places, half away from zero.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept on payout and commission amounts.
pub const PAYOUT_SCALE: u32 = 2;

/// Returns `percent`% of `amount`, rounded to [`PAYOUT_SCALE`] places.
#[must_use]
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    (amount * percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(PAYOUT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
