//! Pending transaction and history DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common_dto::PaginationMeta;
use crate::domain::{HistoryEntry, PendingTransaction};

/// Request body for `POST /transactions`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitTransactionBody {
    /// Depositing user.
    pub user_id: Uuid,
    /// Target wallet.
    pub wallet_id: Uuid,
    /// Plan to enter on approval.
    pub plan_name: String,
    /// Amount, as a decimal string.
    #[schema(value_type = String, example = "500.00")]
    pub amount: Decimal,
}

/// Request body for `POST /withdrawals`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitWithdrawalBody {
    /// Withdrawing user.
    pub user_id: Uuid,
    /// Wallet debited.
    pub wallet_id: Uuid,
    /// Amount, as a decimal string.
    #[schema(value_type = String, example = "150.00")]
    pub amount: Decimal,
}

/// A pending transaction.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionDto {
    /// Transaction identifier.
    pub transaction_id: Uuid,
    /// Submitting user.
    pub user_id: Uuid,
    /// Target wallet.
    pub wallet_id: Uuid,
    /// Plan name; absent for withdrawals.
    pub plan_name: Option<String>,
    /// Amount.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// `deposit` or `withdrawal`.
    pub transaction_type: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl From<PendingTransaction> for TransactionDto {
    fn from(t: PendingTransaction) -> Self {
        Self {
            transaction_id: t.id.into(),
            user_id: t.user_id.into(),
            wallet_id: t.wallet_id.into(),
            plan_name: t.plan_name,
            amount: t.amount,
            transaction_type: t.transaction_type.as_str().to_string(),
            created_at: t.created_at,
        }
    }
}

/// Query parameters for `GET /history`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryListQuery {
    /// Only rows of this user.
    pub user_id: Option<Uuid>,
}

/// One history row.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryDto {
    /// Row identifier.
    pub entry_id: Uuid,
    /// Deposit opened; absent for withdrawals.
    pub deposit_id: Option<Uuid>,
    /// Account holder.
    pub user_id: Uuid,
    /// Wallet debited.
    pub wallet_id: Uuid,
    /// Plan name; absent for withdrawals.
    pub plan_name: Option<String>,
    /// Amount.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// `auto_transact`, `reinvest`, `approval` or `withdrawal`.
    pub kind: String,
    /// When it happened.
    pub recorded_at: DateTime<Utc>,
}

impl From<HistoryEntry> for HistoryDto {
    fn from(h: HistoryEntry) -> Self {
        Self {
            entry_id: h.id.into(),
            deposit_id: h.deposit_id.map(Uuid::from),
            user_id: h.user_id.into(),
            wallet_id: h.wallet_id.into(),
            plan_name: h.plan_name,
            amount: h.amount,
            kind: h.kind.as_str().to_string(),
            recorded_at: h.recorded_at,
        }
    }
}

/// Paginated response for `GET /history`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryListResponse {
    /// Rows on this page, newest first.
    pub data: Vec<HistoryDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}
