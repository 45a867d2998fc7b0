//! Plan catalog entries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Milliseconds in one day. Plan durations are configured in days.
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Reference data describing an investment plan.
///
/// Read-only from the engine's point of view: plans are copied onto each
/// [`super::ActiveDeposit`] at creation so later catalog edits never change
/// a running deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan name (catalog key).
    pub name: String,
    /// Payout per cycle as a percentage of principal.
    pub percentage: Decimal,
    /// Interval between payouts, in milliseconds.
    pub cycle_length_ms: i64,
    /// Total plan duration, in days.
    pub duration_days: i64,
    /// One-time referral commission as a percentage of principal.
    pub referral_commission_percent: Decimal,
}

impl Plan {
    /// Total plan duration in milliseconds.
    #[must_use]
    pub fn total_duration_ms(&self) -> i64 {
        self.duration_days.saturating_mul(MS_PER_DAY)
    }

    /// Returns `true` if the plan can drive a timer: positive cycle and
    /// duration, non-negative rates.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.cycle_length_ms > 0
            && self.duration_days > 0
            && !self.percentage.is_sign_negative()
            && !self.referral_commission_percent.is_sign_negative()
    }
}
