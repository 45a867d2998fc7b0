//! Pending transactions, funding sources and the history log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::WalletDelta;
use super::active_deposit::ActiveDeposit;
use super::ids::{DepositId, EntryId, TransactionId, UserId, WalletId};

/// Direction of a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Funds entering a wallet; approval opens a deposit.
    Deposit,
    /// Funds leaving a wallet; the amount is reserved until approval.
    Withdrawal,
}

impl TransactionType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

/// A deposit or withdrawal awaiting administrative approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Transaction identifier.
    pub id: TransactionId,
    /// Requesting user.
    pub user_id: UserId,
    /// Wallet whose `pending_deposit` or `pending_withdrawal` carries the
    /// amount meanwhile.
    pub wallet_id: WalletId,
    /// Plan to open on approval. `None` for withdrawals.
    pub plan_name: Option<String>,
    /// Requested amount.
    pub amount: Decimal,
    /// Transaction direction.
    pub transaction_type: TransactionType,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Wallet change made when the transaction is submitted. Cancelling it
    /// applies the negation.
    #[must_use]
    pub fn reservation(&self) -> WalletDelta {
        match self.transaction_type {
            TransactionType::Deposit => WalletDelta {
                pending_deposit: self.amount,
                ..WalletDelta::default()
            },
            TransactionType::Withdrawal => WalletDelta::withdrawal(self.amount),
        }
    }
}

/// Which wallet bucket funds a directly created deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// Auto-transact: debit the spendable balance.
    Balance,
    /// Reinvestment: debit the balance and release the matching
    /// pending-deposit amount.
    PendingDeposit,
}

/// How a deposit came to be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Opened from the wallet balance.
    AutoTransact,
    /// Reinvested from the pending-deposit bucket.
    Reinvest,
    /// Opened by approving a pending transaction.
    Approval,
    /// An approved withdrawal.
    Withdrawal,
}

impl HistoryKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AutoTransact => "auto_transact",
            Self::Reinvest => "reinvest",
            Self::Approval => "approval",
            Self::Withdrawal => "withdrawal",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_transact" => Some(Self::AutoTransact),
            "reinvest" => Some(Self::Reinvest),
            "approval" => Some(Self::Approval),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

impl From<FundingSource> for HistoryKind {
    fn from(source: FundingSource) -> Self {
        match source {
            FundingSource::Balance => Self::AutoTransact,
            FundingSource::PendingDeposit => Self::Reinvest,
        }
    }
}

/// Audit row written whenever a deposit is opened or a withdrawal approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row identifier.
    pub id: EntryId,
    /// Deposit that was opened. `None` for withdrawals.
    pub deposit_id: Option<DepositId>,
    /// Account holder.
    pub user_id: UserId,
    /// Wallet debited.
    pub wallet_id: WalletId,
    /// Plan name. `None` for withdrawals.
    pub plan_name: Option<String>,
    /// Principal or withdrawn amount.
    pub amount: Decimal,
    /// What happened.
    pub kind: HistoryKind,
    /// Timestamp.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// History row for the opening of `deposit`.
    #[must_use]
    pub fn opened(deposit: &ActiveDeposit, kind: HistoryKind) -> Self {
        Self {
            id: EntryId::new(),
            deposit_id: Some(deposit.id),
            user_id: deposit.user_id,
            wallet_id: deposit.wallet_id,
            plan_name: Some(deposit.plan_name.clone()),
            amount: deposit.principal,
            kind,
            recorded_at: deposit.created_at,
        }
    }

    /// History row for the approval of withdrawal `txn` at `at`.
    #[must_use]
    pub fn withdrawn(txn: &PendingTransaction, at: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            deposit_id: None,
            user_id: txn.user_id,
            wallet_id: txn.wallet_id,
            plan_name: None,
            amount: txn.amount,
            kind: HistoryKind::Withdrawal,
            recorded_at: at,
        }
    }
}
