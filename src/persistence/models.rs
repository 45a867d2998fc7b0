//! Inputs and outputs of the store's compound operations, plus the event
//! log row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    ActiveDeposit, CurrencyId, DepositId, EarningRecord, EntryId, FundingSource, HistoryEntry,
    ReferralEarning, TransactionId, WalletId,
};

/// Everything written when a deposit is opened directly from a wallet.
#[derive(Debug, Clone)]
pub struct DepositOpening {
    /// Deposit to register; its principal is the amount debited.
    pub deposit: ActiveDeposit,
    /// Wallet bucket the principal comes from.
    pub source: FundingSource,
    /// History row to append.
    pub history: HistoryEntry,
}

/// One-time referral commission attached to an approval.
#[derive(Debug, Clone)]
pub struct ReferralPayout {
    /// Referrer's wallet in the deposit's currency.
    pub referrer_wallet_id: WalletId,
    /// Audit row; its `commission` is the amount credited.
    pub earning: ReferralEarning,
}

/// Everything written when a pending deposit is approved.
#[derive(Debug, Clone)]
pub struct DepositApproval {
    /// Pending transaction to consume.
    pub transaction_id: TransactionId,
    /// Deposit to register; its principal leaves the pending bucket.
    pub deposit: ActiveDeposit,
    /// History row to append.
    pub history: HistoryEntry,
    /// Referral commission, if the depositor was referred.
    pub referral: Option<ReferralPayout>,
}

/// Everything written when a pending withdrawal is approved.
#[derive(Debug, Clone)]
pub struct WithdrawalApproval {
    /// Pending withdrawal to consume.
    pub transaction_id: TransactionId,
    /// Currency whose `total_withdrawal` grows.
    pub currency_id: CurrencyId,
    /// History row to append.
    pub history: HistoryEntry,
}

/// A single tick to post.
#[derive(Debug, Clone, Copy)]
pub struct TickPosting {
    /// Deposit to tick.
    pub deposit_id: DepositId,
    /// Id of the earning row; reused across retries of the same tick.
    pub earning_id: EntryId,
    /// Tick timestamp.
    pub tick_at: DateTime<Utc>,
}

impl TickPosting {
    /// New posting with a fresh earning id.
    #[must_use]
    pub fn new(deposit_id: DepositId, tick_at: DateTime<Utc>) -> Self {
        Self {
            deposit_id,
            earning_id: EntryId::new(),
            tick_at,
        }
    }
}

/// What a posted tick did to the ledger.
#[derive(Debug, Clone)]
pub enum TickPosted {
    /// Credited by this call.
    Credited(EarningRecord),
    /// Already applied by an earlier call with the same earning id.
    Replayed(EarningRecord),
    /// The deposit had matured before the tick; nothing was credited.
    AlreadyMatured,
}

/// Result of a posted tick.
#[derive(Debug, Clone)]
pub struct TickReceipt {
    /// Deposit state after the tick.
    pub deposit: ActiveDeposit,
    /// Ledger effect of the tick.
    pub posted: TickPosted,
}

/// A stored row from the `accrual_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Auto-increment row ID.
    pub id: i64,
    /// Deposit that generated the event.
    pub deposit_id: Uuid,
    /// Event type discriminator (e.g. `"earning_credited"`).
    pub event_type: String,
    /// JSONB payload with event-specific data.
    pub payload: serde_json::Value,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}
