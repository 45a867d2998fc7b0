//! Domain events reflecting accrual state changes.
//!
//! Every registry mutation publishes an [`AccrualEvent`] through the
//! [`super::EventBus`]. Events are optionally appended to the PostgreSQL
//! event log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::ids::{DepositId, UserId};

/// Domain event emitted after every accrual state mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AccrualEvent {
    /// A deposit entered the registry.
    DepositOpened {
        /// Deposit identifier.
        deposit_id: DepositId,
        /// Owning user.
        user_id: UserId,
        /// Plan name.
        plan_name: String,
        /// Principal.
        principal: Decimal,
        /// Creation timestamp.
        timestamp: DateTime<Utc>,
    },

    /// One tick was posted.
    EarningCredited {
        /// Deposit identifier.
        deposit_id: DepositId,
        /// Amount credited this tick.
        amount: Decimal,
        /// Earning accumulated so far.
        accumulated_earning: Decimal,
        /// Remaining plan time after the tick, in milliseconds.
        remaining_duration_ms: i64,
        /// Tick timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A tick could not be posted after all retries.
    TickFailed {
        /// Deposit identifier.
        deposit_id: DepositId,
        /// Timestamp the tick was attempted for.
        tick_at: DateTime<Utc>,
        /// Error description.
        reason: String,
        /// Timestamp of the failure.
        timestamp: DateTime<Utc>,
    },

    /// A matured deposit was removed and its principal returned.
    DepositSettled {
        /// Deposit identifier.
        deposit_id: DepositId,
        /// Principal returned.
        principal: Decimal,
        /// Lifetime earning paid.
        total_earning: Decimal,
        /// Settlement timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A one-time referral commission was paid on approval.
    ReferralCommissionPaid {
        /// Deposit whose approval paid the commission.
        deposit_id: DepositId,
        /// User who received the commission.
        referrer_id: UserId,
        /// Commission amount.
        amount: Decimal,
        /// Payment timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A deposit was administratively suspended.
    DepositSuspended {
        /// Deposit identifier.
        deposit_id: DepositId,
        /// Suspension timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A deposit's timer was rebuilt after a restart or manual resume.
    DepositResumed {
        /// Deposit identifier.
        deposit_id: DepositId,
        /// Catch-up ticks to apply when the timer first fires.
        catch_up_ticks: u32,
        /// Delay before the timer first fires, in milliseconds.
        first_delay_ms: u64,
        /// Resume timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl AccrualEvent {
    /// Returns the deposit ID associated with this event.
    #[must_use]
    pub fn deposit_id(&self) -> DepositId {
        match self {
            Self::DepositOpened { deposit_id, .. }
            | Self::EarningCredited { deposit_id, .. }
            | Self::TickFailed { deposit_id, .. }
            | Self::DepositSettled { deposit_id, .. }
            | Self::ReferralCommissionPaid { deposit_id, .. }
            | Self::DepositSuspended { deposit_id, .. }
            | Self::DepositResumed { deposit_id, .. } => *deposit_id,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::DepositOpened { .. } => "deposit_opened",
            Self::EarningCredited { .. } => "earning_credited",
            Self::TickFailed { .. } => "tick_failed",
            Self::DepositSettled { .. } => "deposit_settled",
            Self::ReferralCommissionPaid { .. } => "referral_commission_paid",
            Self::DepositSuspended { .. } => "deposit_suspended",
            Self::DepositResumed { .. } => "deposit_resumed",
        }
    }
}
