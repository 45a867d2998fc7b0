//! Deposit DTOs for create, get, list and earnings operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common_dto::PaginationMeta;
use crate::domain::{ActiveDeposit, EarningRecord, FundingSource};

/// Request body for `POST /deposits`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDepositBody {
    /// Depositing user.
    pub user_id: Uuid,
    /// Funding wallet.
    pub wallet_id: Uuid,
    /// Plan name.
    pub plan_name: String,
    /// Principal, as a decimal string.
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
    /// `balance` (default) or `pending_deposit`.
    #[serde(default = "default_source")]
    #[schema(value_type = String, example = "balance")]
    pub source: FundingSource,
}

fn default_source() -> FundingSource {
    FundingSource::Balance
}

/// Query parameters for `GET /deposits`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DepositListQuery {
    /// Only deposits of this user.
    pub user_id: Option<Uuid>,
    /// `active` or `suspended`.
    pub status: Option<String>,
    /// Only deposits under this plan.
    pub plan: Option<String>,
    /// `newest_first` (default), `oldest_first`, `largest_principal` or
    /// `maturing_soonest`.
    pub sort: Option<String>,
}

/// One active deposit.
#[derive(Debug, Serialize, ToSchema)]
pub struct DepositDto {
    /// Deposit identifier.
    pub deposit_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Owner's username.
    pub username: String,
    /// Credited wallet.
    pub wallet_id: Uuid,
    /// Currency symbol.
    pub symbol: String,
    /// Plan name.
    pub plan_name: String,
    /// Principal.
    #[schema(value_type = String)]
    pub principal: Decimal,
    /// Percent of principal paid per cycle.
    #[schema(value_type = String)]
    pub percentage: Decimal,
    /// Amount credited per tick.
    #[schema(value_type = String)]
    pub earning_per_cycle: Decimal,
    /// Cycle length in milliseconds.
    pub cycle_length_ms: i64,
    /// Plan length in milliseconds.
    pub total_duration_ms: i64,
    /// Plan time left in milliseconds.
    pub remaining_duration_ms: i64,
    /// Earning credited so far.
    #[schema(value_type = String)]
    pub accumulated_earning: Decimal,
    /// Earning still to be credited.
    #[schema(value_type = String)]
    pub projected_earning: Decimal,
    /// Time of the last tick, or of opening.
    pub last_server_timestamp: DateTime<Utc>,
    /// Opening time.
    pub created_at: DateTime<Utc>,
    /// Referrer of the owner, if any.
    pub referral_username: Option<String>,
    /// `active` or `suspended`.
    pub status: String,
}

impl From<ActiveDeposit> for DepositDto {
    fn from(d: ActiveDeposit) -> Self {
        Self {
            projected_earning: d.projected_earning(),
            deposit_id: d.id.into(),
            user_id: d.user_id.into(),
            username: d.username,
            wallet_id: d.wallet_id.into(),
            symbol: d.symbol,
            plan_name: d.plan_name,
            principal: d.principal,
            percentage: d.percentage,
            earning_per_cycle: d.earning_per_cycle,
            cycle_length_ms: d.cycle_length_ms,
            total_duration_ms: d.total_duration_ms,
            remaining_duration_ms: d.remaining_duration_ms,
            accumulated_earning: d.accumulated_earning,
            last_server_timestamp: d.last_server_timestamp,
            created_at: d.created_at,
            referral_username: d.referral_username,
            status: d.status.as_str().to_string(),
        }
    }
}

/// Response body for `GET /deposits`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DepositListResponse {
    /// Deposits on this page.
    pub data: Vec<DepositDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// One credited tick.
#[derive(Debug, Serialize, ToSchema)]
pub struct EarningDto {
    /// Earning row identifier.
    pub earning_id: Uuid,
    /// Deposit that produced it.
    pub deposit_id: Uuid,
    /// Amount credited.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Currency symbol.
    pub symbol: String,
    /// Tick time.
    pub earned_at: DateTime<Utc>,
}

impl From<EarningRecord> for EarningDto {
    fn from(e: EarningRecord) -> Self {
        Self {
            earning_id: e.id.into(),
            deposit_id: e.deposit_id.into(),
            amount: e.amount,
            symbol: e.symbol,
            earned_at: e.earned_at,
        }
    }
}

/// Response body for `GET /deposits/{id}/earnings`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EarningListResponse {
    /// Earning rows in tick order.
    pub data: Vec<EarningDto>,
    /// Sum of all rows.
    #[schema(value_type = String)]
    pub total: Decimal,
}
