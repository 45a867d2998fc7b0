//! Append-only audit rows: per-tick earnings and one-time referral commissions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::active_deposit::ActiveDeposit;
use super::ids::{DepositId, EntryId, UserId, WalletId};

/// One payout of one deposit. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningRecord {
    /// Row identifier; doubles as the idempotency key of the tick.
    pub id: EntryId,
    /// Deposit that paid out.
    pub deposit_id: DepositId,
    /// Owning user.
    pub user_id: UserId,
    /// Owning user's username.
    pub username: String,
    /// Amount paid this tick.
    pub amount: Decimal,
    /// Wallet credited.
    pub wallet_id: WalletId,
    /// Currency symbol.
    pub symbol: String,
    /// Tick timestamp.
    pub earned_at: DateTime<Utc>,
    /// Referrer of the depositor, carried for attribution only.
    pub referral_username: Option<String>,
}

impl EarningRecord {
    /// Builds the row for a tick of `deposit` at `earned_at`.
    #[must_use]
    pub fn for_tick(id: EntryId, deposit: &ActiveDeposit, earned_at: DateTime<Utc>) -> Self {
        Self {
            id,
            deposit_id: deposit.id,
            user_id: deposit.user_id,
            username: deposit.username.clone(),
            amount: deposit.earning_per_cycle,
            wallet_id: deposit.wallet_id,
            symbol: deposit.symbol.clone(),
            earned_at,
            referral_username: deposit.referral_username.clone(),
        }
    }
}

/// A referral commission paid when a referred user's deposit was approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEarning {
    /// Row identifier.
    pub id: EntryId,
    /// Deposit whose approval triggered the commission.
    pub deposit_id: DepositId,
    /// User receiving the commission.
    pub referrer_id: UserId,
    /// Username receiving the commission.
    pub referrer_username: String,
    /// Username of the depositor.
    pub referred_username: String,
    /// Principal of the deposit.
    pub principal: Decimal,
    /// Commission paid.
    pub commission: Decimal,
    /// Currency symbol.
    pub symbol: String,
    /// Payment timestamp.
    pub paid_at: DateTime<Utc>,
}
