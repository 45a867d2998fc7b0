//! The active deposit aggregate: one running investment plan.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{CurrencyId, DepositId, UserId, WalletId};
use super::money::percent_of;
use super::plan::Plan;

/// Whether a deposit is accruing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Timer is (or should be) running.
    Active,
    /// Administratively paused; skipped by boot-time resumption.
    Suspended,
}

impl DepositStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Everything needed to open a deposit besides the plan terms.
#[derive(Debug, Clone)]
pub struct NewDeposit {
    /// Owning user.
    pub user_id: UserId,
    /// Owning user's username.
    pub username: String,
    /// Wallet the principal was taken from and payouts go to.
    pub wallet_id: WalletId,
    /// Currency of the wallet.
    pub currency_id: CurrencyId,
    /// Currency symbol, copied onto earning rows.
    pub symbol: String,
    /// Principal amount.
    pub principal: Decimal,
    /// Username of the referrer, if any.
    pub referral_username: Option<String>,
}

/// A running investment plan.
///
/// The store owns `remaining_duration_ms` and `last_server_timestamp`; the
/// scheduler only ever mutates them through atomic tick postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveDeposit {
    /// Unique deposit identifier.
    pub id: DepositId,
    /// Owning user.
    pub user_id: UserId,
    /// Owning user's username.
    pub username: String,
    /// Wallet credited on every tick and at settlement.
    pub wallet_id: WalletId,
    /// Currency of the wallet.
    pub currency_id: CurrencyId,
    /// Currency symbol.
    pub symbol: String,
    /// Plan the deposit was opened under.
    pub plan_name: String,
    /// Principal, returned at settlement.
    pub principal: Decimal,
    /// Payout percentage per cycle.
    pub percentage: Decimal,
    /// Payout per cycle, fixed at creation.
    pub earning_per_cycle: Decimal,
    /// Interval between payouts, in milliseconds.
    pub cycle_length_ms: i64,
    /// Total plan duration, in milliseconds.
    pub total_duration_ms: i64,
    /// Countdown of remaining plan time, in milliseconds.
    pub remaining_duration_ms: i64,
    /// Sum of all payouts so far.
    pub accumulated_earning: Decimal,
    /// Wall-clock snapshot taken at creation and on every tick.
    pub last_server_timestamp: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Username of the referrer, if any.
    pub referral_username: Option<String>,
    /// Accrual status.
    pub status: DepositStatus,
}

impl ActiveDeposit {
    /// Opens a fresh deposit under `plan`.
    ///
    /// `remaining_duration_ms` starts at the full plan duration and the
    /// payout per cycle is computed once here.
    #[must_use]
    pub fn open(new: NewDeposit, plan: &Plan, now: DateTime<Utc>) -> Self {
        let total_duration_ms = plan.total_duration_ms();
        Self {
            id: DepositId::new(),
            user_id: new.user_id,
            username: new.username,
            wallet_id: new.wallet_id,
            currency_id: new.currency_id,
            symbol: new.symbol,
            plan_name: plan.name.clone(),
            earning_per_cycle: percent_of(new.principal, plan.percentage),
            principal: new.principal,
            percentage: plan.percentage,
            cycle_length_ms: plan.cycle_length_ms,
            total_duration_ms,
            remaining_duration_ms: total_duration_ms,
            accumulated_earning: Decimal::ZERO,
            last_server_timestamp: now,
            created_at: now,
            referral_username: new.referral_username,
            status: DepositStatus::Active,
        }
    }

    /// Applies one tick in place and returns the payout.
    ///
    /// `last_server_timestamp` never moves backwards.
    pub fn apply_tick(&mut self, at: DateTime<Utc>) -> Decimal {
        self.remaining_duration_ms = self
            .remaining_duration_ms
            .saturating_sub(self.cycle_length_ms);
        self.accumulated_earning += self.earning_per_cycle;
        self.last_server_timestamp = self.last_server_timestamp.max(at);
        self.earning_per_cycle
    }

    /// `true` once the remaining duration is exhausted. Uneven cycles can
    /// leave it negative, which also counts.
    #[must_use]
    pub const fn is_matured(&self) -> bool {
        self.remaining_duration_ms <= 0
    }

    /// Ticks still needed to mature, rounding a partial cycle up.
    #[must_use]
    pub fn ticks_remaining(&self) -> i64 {
        if self.is_matured() || self.cycle_length_ms <= 0 {
            return 0;
        }
        self.remaining_duration_ms
            .saturating_add(self.cycle_length_ms - 1)
            / self.cycle_length_ms
    }

    /// Total the deposit pays out over its lifetime, excluding principal.
    #[must_use]
    pub fn projected_earning(&self) -> Decimal {
        let total_ticks = if self.cycle_length_ms > 0 {
            self.total_duration_ms
                .saturating_add(self.cycle_length_ms - 1)
                / self.cycle_length_ms
        } else {
            0
        };
        self.earning_per_cycle * Decimal::from(total_ticks)
    }
}
