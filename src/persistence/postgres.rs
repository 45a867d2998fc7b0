//! PostgreSQL implementation of the persistence layer.
//!
//! Each compound operation runs in one database transaction. Debits are
//! conditional `UPDATE`s (`WHERE balance >= $n`), so a short bucket is
//! detected by `rows_affected() == 0` and the transaction is rolled back
//! without any write having landed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::models::{
    DepositApproval, DepositOpening, TickPosted, TickPosting, TickReceipt, WithdrawalApproval,
};
use super::{AccrualStore, PlanCatalog};
use crate::domain::{
    ActiveDeposit, CurrencyField, CurrencyId, DepositFilter, DepositId, DepositStatus,
    EarningRecord, FundingSource, HistoryEntry, HistoryKind, PendingTransaction, Plan,
    TransactionId, TransactionType, UserAccount, UserId, Wallet, WalletDelta, WalletId,
};
use crate::error::AccrualError;

macro_rules! deposit_columns {
    () => {
        "id, user_id, username, wallet_id, currency_id, symbol, plan_name, principal, \
         percentage, earning_per_cycle, cycle_length_ms, total_duration_ms, \
         remaining_duration_ms, accumulated_earning, last_server_timestamp, created_at, \
         referral_username, status"
    };
}

macro_rules! earning_columns {
    () => {
        "id, deposit_id, user_id, username, amount, wallet_id, symbol, earned_at, \
         referral_username"
    };
}

macro_rules! wallet_columns {
    () => {
        "id, user_id, currency_id, name, symbol, balance, total_deposit, pending_deposit, \
         total_withdrawal, pending_withdrawal"
    };
}

macro_rules! history_columns {
    () => {
        "id, deposit_id, user_id, wallet_id, plan_name, amount, kind, recorded_at"
    };
}

macro_rules! transaction_columns {
    () => {
        "id, user_id, wallet_id, plan_name, amount, transaction_type, created_at"
    };
}

#[derive(Debug, sqlx::FromRow)]
struct DepositRow {
    id: Uuid,
    user_id: Uuid,
    username: String,
    wallet_id: Uuid,
    currency_id: Uuid,
    symbol: String,
    plan_name: String,
    principal: Decimal,
    percentage: Decimal,
    earning_per_cycle: Decimal,
    cycle_length_ms: i64,
    total_duration_ms: i64,
    remaining_duration_ms: i64,
    accumulated_earning: Decimal,
    last_server_timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    referral_username: Option<String>,
    status: String,
}

impl TryFrom<DepositRow> for ActiveDeposit {
    type Error = AccrualError;

    fn try_from(row: DepositRow) -> Result<Self, Self::Error> {
        let status = DepositStatus::parse(&row.status).ok_or_else(|| {
            AccrualError::PersistenceError(format!(
                "deposit {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        Ok(Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            username: row.username,
            wallet_id: row.wallet_id.into(),
            currency_id: row.currency_id.into(),
            symbol: row.symbol,
            plan_name: row.plan_name,
            principal: row.principal,
            percentage: row.percentage,
            earning_per_cycle: row.earning_per_cycle,
            cycle_length_ms: row.cycle_length_ms,
            total_duration_ms: row.total_duration_ms,
            remaining_duration_ms: row.remaining_duration_ms,
            accumulated_earning: row.accumulated_earning,
            last_server_timestamp: row.last_server_timestamp,
            created_at: row.created_at,
            referral_username: row.referral_username,
            status,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EarningRow {
    id: Uuid,
    deposit_id: Uuid,
    user_id: Uuid,
    username: String,
    amount: Decimal,
    wallet_id: Uuid,
    symbol: String,
    earned_at: DateTime<Utc>,
    referral_username: Option<String>,
}

impl From<EarningRow> for EarningRecord {
    fn from(row: EarningRow) -> Self {
        Self {
            id: row.id.into(),
            deposit_id: row.deposit_id.into(),
            user_id: row.user_id.into(),
            username: row.username,
            amount: row.amount,
            wallet_id: row.wallet_id.into(),
            symbol: row.symbol,
            earned_at: row.earned_at,
            referral_username: row.referral_username,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    total_balance: Decimal,
    commission: Decimal,
    referred_by: Option<String>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id.into(),
            username: row.username,
            email: row.email,
            total_balance: row.total_balance,
            commission: row.commission,
            referred_by: row.referred_by,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    currency_id: Uuid,
    name: String,
    symbol: String,
    balance: Decimal,
    total_deposit: Decimal,
    pending_deposit: Decimal,
    total_withdrawal: Decimal,
    pending_withdrawal: Decimal,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            currency_id: row.currency_id.into(),
            name: row.name,
            symbol: row.symbol,
            balance: row.balance,
            total_deposit: row.total_deposit,
            pending_deposit: row.pending_deposit,
            total_withdrawal: row.total_withdrawal,
            pending_withdrawal: row.pending_withdrawal,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    wallet_id: Uuid,
    plan_name: Option<String>,
    amount: Decimal,
    transaction_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PendingTransaction {
    type Error = AccrualError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let transaction_type = TransactionType::parse(&row.transaction_type).ok_or_else(|| {
            AccrualError::PersistenceError(format!(
                "transaction {} has unknown type {:?}",
                row.id, row.transaction_type
            ))
        })?;
        Ok(Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            wallet_id: row.wallet_id.into(),
            plan_name: row.plan_name,
            amount: row.amount,
            transaction_type,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    deposit_id: Option<Uuid>,
    user_id: Uuid,
    wallet_id: Uuid,
    plan_name: Option<String>,
    amount: Decimal,
    kind: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = AccrualError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let kind = HistoryKind::parse(&row.kind).ok_or_else(|| {
            AccrualError::PersistenceError(format!(
                "history row {} has unknown kind {:?}",
                row.id, row.kind
            ))
        })?;
        Ok(Self {
            id: row.id.into(),
            deposit_id: row.deposit_id.map(DepositId::from),
            user_id: row.user_id.into(),
            wallet_id: row.wallet_id.into(),
            plan_name: row.plan_name,
            amount: row.amount,
            kind,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    name: String,
    percentage: Decimal,
    cycle_length_ms: i64,
    duration_days: i64,
    referral_commission_percent: Decimal,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Self {
            name: row.name,
            percentage: row.percentage,
            cycle_length_ms: row.cycle_length_ms,
            duration_days: row.duration_days,
            referral_commission_percent: row.referral_commission_percent,
        }
    }
}

/// PostgreSQL-backed [`AccrualStore`] and [`PlanCatalog`] using
/// `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends an event to the event log.
    ///
    /// # Errors
    ///
    /// Returns an [`AccrualError`] on database failure.
    pub async fn save_event(
        &self,
        deposit_id: Uuid,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<i64, AccrualError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO accrual_events (deposit_id, event_type, payload) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(deposit_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

/// Applies `delta` to a wallet and its balance change to the owner's total.
async fn apply_wallet_delta(
    conn: &mut PgConnection,
    wallet_id: WalletId,
    user_id: UserId,
    delta: WalletDelta,
) -> Result<(), AccrualError> {
    let wallet = sqlx::query(
        "UPDATE wallets SET balance = balance + $2, total_deposit = total_deposit + $3, \
         pending_deposit = pending_deposit + $4, total_withdrawal = total_withdrawal + $5, \
         pending_withdrawal = pending_withdrawal + $6 WHERE id = $1",
    )
    .bind(*wallet_id.as_uuid())
    .bind(delta.balance)
    .bind(delta.total_deposit)
    .bind(delta.pending_deposit)
    .bind(delta.total_withdrawal)
    .bind(delta.pending_withdrawal)
    .execute(&mut *conn)
    .await?;
    if wallet.rows_affected() == 0 {
        return Err(AccrualError::WalletNotFound(*wallet_id.as_uuid()));
    }

    let user = sqlx::query("UPDATE users SET total_balance = total_balance + $2 WHERE id = $1")
        .bind(*user_id.as_uuid())
        .bind(delta.balance)
        .execute(&mut *conn)
        .await?;
    if user.rows_affected() == 0 {
        return Err(AccrualError::UserNotFound(user_id.to_string()));
    }
    Ok(())
}

async fn bump_currency(
    conn: &mut PgConnection,
    currency_id: CurrencyId,
    field: CurrencyField,
    delta: Decimal,
) -> Result<(), AccrualError> {
    let column = field.column();
    let sql = format!("UPDATE currencies SET {column} = {column} + $2 WHERE id = $1");
    sqlx::query(&sql)
        .bind(*currency_id.as_uuid())
        .bind(delta)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Builds the error for a conditional debit that matched no row.
async fn short_bucket(
    conn: &mut PgConnection,
    wallet_id: WalletId,
    requested: Decimal,
    source: FundingSource,
) -> AccrualError {
    let row = sqlx::query_as::<_, (Decimal, Decimal)>(
        "SELECT balance, pending_deposit FROM wallets WHERE id = $1",
    )
    .bind(*wallet_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await;
    match row {
        Ok(Some((balance, pending))) => AccrualError::InsufficientFunds {
            requested,
            available: match source {
                FundingSource::Balance => balance,
                FundingSource::PendingDeposit => balance.min(pending),
            },
        },
        Ok(None) => AccrualError::WalletNotFound(*wallet_id.as_uuid()),
        Err(err) => err.into(),
    }
}

async fn insert_history(conn: &mut PgConnection, entry: &HistoryEntry) -> Result<(), AccrualError> {
    sqlx::query(concat!(
        "INSERT INTO ledger_history (",
        history_columns!(),
        ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    ))
    .bind(*entry.id.as_uuid())
    .bind(entry.deposit_id.map(Uuid::from))
    .bind(*entry.user_id.as_uuid())
    .bind(*entry.wallet_id.as_uuid())
    .bind(entry.plan_name.as_deref())
    .bind(entry.amount)
    .bind(entry.kind.as_str())
    .bind(entry.recorded_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Inserts a deposit row. Returns `false` if the id already exists.
async fn insert_deposit_row(
    conn: &mut PgConnection,
    deposit: &ActiveDeposit,
) -> Result<bool, AccrualError> {
    let result = sqlx::query(concat!(
        "INSERT INTO active_deposits (",
        deposit_columns!(),
        ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
         ON CONFLICT (id) DO NOTHING"
    ))
    .bind(*deposit.id.as_uuid())
    .bind(*deposit.user_id.as_uuid())
    .bind(&deposit.username)
    .bind(*deposit.wallet_id.as_uuid())
    .bind(*deposit.currency_id.as_uuid())
    .bind(&deposit.symbol)
    .bind(&deposit.plan_name)
    .bind(deposit.principal)
    .bind(deposit.percentage)
    .bind(deposit.earning_per_cycle)
    .bind(deposit.cycle_length_ms)
    .bind(deposit.total_duration_ms)
    .bind(deposit.remaining_duration_ms)
    .bind(deposit.accumulated_earning)
    .bind(deposit.last_server_timestamp)
    .bind(deposit.created_at)
    .bind(&deposit.referral_username)
    .bind(deposit.status.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn fetch_deposit(
    conn: &mut PgConnection,
    id: DepositId,
) -> Result<Option<ActiveDeposit>, AccrualError> {
    sqlx::query_as::<_, DepositRow>(concat!(
        "SELECT ",
        deposit_columns!(),
        " FROM active_deposits WHERE id = $1"
    ))
    .bind(*id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .map(ActiveDeposit::try_from)
    .transpose()
}

fn duplicate_deposit(id: DepositId) -> AccrualError {
    AccrualError::InvalidRequest(format!("deposit {id} already exists"))
}

#[async_trait]
impl AccrualStore for PostgresStore {
    async fn insert_deposit(&self, deposit: &ActiveDeposit) -> Result<(), AccrualError> {
        let mut conn = self.pool.acquire().await?;
        if insert_deposit_row(&mut conn, deposit).await? {
            Ok(())
        } else {
            Err(duplicate_deposit(deposit.id))
        }
    }

    async fn get_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError> {
        let mut conn = self.pool.acquire().await?;
        fetch_deposit(&mut conn, id).await
    }

    async fn remove_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError> {
        sqlx::query_as::<_, DepositRow>(concat!(
            "DELETE FROM active_deposits WHERE id = $1 RETURNING ",
            deposit_columns!()
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(ActiveDeposit::try_from)
        .transpose()
    }

    fn stream_deposits(&self) -> BoxStream<'_, Result<ActiveDeposit, AccrualError>> {
        sqlx::query_as::<_, DepositRow>(concat!(
            "SELECT ",
            deposit_columns!(),
            " FROM active_deposits ORDER BY created_at ASC"
        ))
        .fetch(&self.pool)
        .map(|row| row.map_err(AccrualError::from).and_then(ActiveDeposit::try_from))
        .boxed()
    }

    async fn list_deposits(
        &self,
        filter: &DepositFilter,
    ) -> Result<Vec<ActiveDeposit>, AccrualError> {
        let rows = sqlx::query_as::<_, DepositRow>(concat!(
            "SELECT ",
            deposit_columns!(),
            " FROM active_deposits \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
             AND ($2::text IS NULL OR status = $2) \
             AND ($3::text IS NULL OR plan_name = $3)"
        ))
        .bind(filter.user_id.map(Uuid::from))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.plan_name.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ActiveDeposit::try_from).collect()
    }

    async fn set_deposit_status(
        &self,
        id: DepositId,
        status: DepositStatus,
    ) -> Result<Option<ActiveDeposit>, AccrualError> {
        sqlx::query_as::<_, DepositRow>(concat!(
            "UPDATE active_deposits SET status = $2 WHERE id = $1 RETURNING ",
            deposit_columns!()
        ))
        .bind(*id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(ActiveDeposit::try_from)
        .transpose()
    }

    async fn list_earnings(
        &self,
        deposit_id: DepositId,
    ) -> Result<Vec<EarningRecord>, AccrualError> {
        let rows = sqlx::query_as::<_, EarningRow>(concat!(
            "SELECT ",
            earning_columns!(),
            " FROM earnings WHERE deposit_id = $1 ORDER BY earned_at ASC, seq ASC"
        ))
        .bind(*deposit_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EarningRecord::from).collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, AccrualError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, total_balance, commission, referred_by \
             FROM users WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserAccount::from))
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, AccrualError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, total_balance, commission, referred_by \
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserAccount::from))
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, AccrualError> {
        let row = sqlx::query_as::<_, WalletRow>(concat!(
            "SELECT ",
            wallet_columns!(),
            " FROM wallets WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Wallet::from))
    }

    async fn find_wallet(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Wallet>, AccrualError> {
        let row = sqlx::query_as::<_, WalletRow>(concat!(
            "SELECT ",
            wallet_columns!(),
            " FROM wallets WHERE user_id = $1 AND currency_id = $2"
        ))
        .bind(*user_id.as_uuid())
        .bind(*currency_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Wallet::from))
    }

    async fn increment_balance(
        &self,
        wallet_id: WalletId,
        user_id: UserId,
        delta: Decimal,
    ) -> Result<(), AccrualError> {
        let mut tx = self.pool.begin().await?;
        apply_wallet_delta(&mut tx, wallet_id, user_id, WalletDelta::balance(delta)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn increment_currency_totals(
        &self,
        currency_id: CurrencyId,
        field: CurrencyField,
        delta: Decimal,
    ) -> Result<(), AccrualError> {
        let mut conn = self.pool.acquire().await?;
        bump_currency(&mut conn, currency_id, field, delta).await
    }

    async fn submit_transaction(&self, txn: &PendingTransaction) -> Result<(), AccrualError> {
        let mut tx = self.pool.begin().await?;
        match txn.transaction_type {
            TransactionType::Deposit => {
                apply_wallet_delta(&mut tx, txn.wallet_id, txn.user_id, txn.reservation()).await?;
            }
            TransactionType::Withdrawal => {
                let debit = sqlx::query(
                    "UPDATE wallets SET balance = balance - $2, \
                     pending_withdrawal = pending_withdrawal + $2, \
                     total_withdrawal = total_withdrawal + $2 \
                     WHERE id = $1 AND balance >= $2",
                )
                .bind(*txn.wallet_id.as_uuid())
                .bind(txn.amount)
                .execute(&mut *tx)
                .await?;
                if debit.rows_affected() == 0 {
                    return Err(
                        short_bucket(&mut tx, txn.wallet_id, txn.amount, FundingSource::Balance)
                            .await,
                    );
                }
                let user = sqlx::query(
                    "UPDATE users SET total_balance = total_balance - $2 WHERE id = $1",
                )
                .bind(*txn.user_id.as_uuid())
                .bind(txn.amount)
                .execute(&mut *tx)
                .await?;
                if user.rows_affected() == 0 {
                    return Err(AccrualError::UserNotFound(txn.user_id.to_string()));
                }
            }
        }

        sqlx::query(concat!(
            "INSERT INTO pending_transactions (",
            transaction_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(*txn.id.as_uuid())
        .bind(*txn.user_id.as_uuid())
        .bind(*txn.wallet_id.as_uuid())
        .bind(txn.plan_name.as_deref())
        .bind(txn.amount)
        .bind(txn.transaction_type.as_str())
        .bind(txn.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<PendingTransaction>, AccrualError> {
        sqlx::query_as::<_, TransactionRow>(concat!(
            "SELECT ",
            transaction_columns!(),
            " FROM pending_transactions WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(PendingTransaction::try_from)
        .transpose()
    }

    async fn cancel_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<PendingTransaction>, AccrualError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query_as::<_, TransactionRow>(concat!(
            "DELETE FROM pending_transactions WHERE id = $1 RETURNING ",
            transaction_columns!()
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let txn = PendingTransaction::try_from(row)?;
        apply_wallet_delta(&mut tx, txn.wallet_id, txn.user_id, -txn.reservation()).await?;

        tx.commit().await?;
        Ok(Some(txn))
    }

    async fn list_history(
        &self,
        user_id: Option<UserId>,
    ) -> Result<Vec<HistoryEntry>, AccrualError> {
        let rows = sqlx::query_as::<_, HistoryRow>(concat!(
            "SELECT ",
            history_columns!(),
            " FROM ledger_history WHERE ($1::uuid IS NULL OR user_id = $1) \
             ORDER BY recorded_at DESC"
        ))
        .bind(user_id.map(Uuid::from))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    async fn open_deposit(&self, opening: &DepositOpening) -> Result<(), AccrualError> {
        let deposit = &opening.deposit;
        let amount = deposit.principal;
        let from_pending = matches!(opening.source, FundingSource::PendingDeposit);
        let mut tx = self.pool.begin().await?;

        let debit = sqlx::query(
            "UPDATE wallets SET balance = balance - $2, total_deposit = total_deposit + $2, \
             pending_deposit = pending_deposit - CASE WHEN $3 THEN $2 ELSE 0 END \
             WHERE id = $1 AND balance >= $2 AND (NOT $3 OR pending_deposit >= $2)",
        )
        .bind(*deposit.wallet_id.as_uuid())
        .bind(amount)
        .bind(from_pending)
        .execute(&mut *tx)
        .await?;
        if debit.rows_affected() == 0 {
            return Err(short_bucket(&mut tx, deposit.wallet_id, amount, opening.source).await);
        }

        let user = sqlx::query("UPDATE users SET total_balance = total_balance - $2 WHERE id = $1")
            .bind(*deposit.user_id.as_uuid())
            .bind(amount)
            .execute(&mut *tx)
            .await?;
        if user.rows_affected() == 0 {
            return Err(AccrualError::UserNotFound(deposit.user_id.to_string()));
        }

        insert_history(&mut tx, &opening.history).await?;
        if !insert_deposit_row(&mut tx, deposit).await? {
            return Err(duplicate_deposit(deposit.id));
        }
        bump_currency(&mut tx, deposit.currency_id, CurrencyField::TotalDeposit, amount).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn approve_transaction(&self, approval: &DepositApproval) -> Result<(), AccrualError> {
        let deposit = &approval.deposit;
        let amount = deposit.principal;
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM pending_transactions \
             WHERE id = $1 AND transaction_type = 'deposit' RETURNING id",
        )
        .bind(*approval.transaction_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if consumed.is_none() {
            return Err(AccrualError::TransactionNotFound(
                *approval.transaction_id.as_uuid(),
            ));
        }

        let release = sqlx::query(
            "UPDATE wallets SET pending_deposit = pending_deposit - $2, \
             total_deposit = total_deposit + $2 \
             WHERE id = $1 AND pending_deposit >= $2",
        )
        .bind(*deposit.wallet_id.as_uuid())
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if release.rows_affected() == 0 {
            let pending = sqlx::query_scalar::<_, Decimal>(
                "SELECT pending_deposit FROM wallets WHERE id = $1",
            )
            .bind(*deposit.wallet_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
            return Err(match pending {
                Some(available) => AccrualError::InsufficientFunds {
                    requested: amount,
                    available,
                },
                None => AccrualError::WalletNotFound(*deposit.wallet_id.as_uuid()),
            });
        }

        insert_history(&mut tx, &approval.history).await?;
        if !insert_deposit_row(&mut tx, deposit).await? {
            return Err(duplicate_deposit(deposit.id));
        }
        bump_currency(&mut tx, deposit.currency_id, CurrencyField::TotalDeposit, amount).await?;

        if let Some(referral) = &approval.referral {
            let earning = &referral.earning;
            apply_wallet_delta(
                &mut tx,
                referral.referrer_wallet_id,
                earning.referrer_id,
                WalletDelta::balance(earning.commission),
            )
            .await?;
            sqlx::query("UPDATE users SET commission = commission + $2 WHERE id = $1")
                .bind(*earning.referrer_id.as_uuid())
                .bind(earning.commission)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO referral_earnings \
                 (id, deposit_id, referrer_id, referrer_username, referred_username, \
                  principal, commission, symbol, paid_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(*earning.id.as_uuid())
            .bind(*earning.deposit_id.as_uuid())
            .bind(*earning.referrer_id.as_uuid())
            .bind(&earning.referrer_username)
            .bind(&earning.referred_username)
            .bind(earning.principal)
            .bind(earning.commission)
            .bind(&earning.symbol)
            .bind(earning.paid_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn approve_withdrawal(
        &self,
        approval: &WithdrawalApproval,
    ) -> Result<PendingTransaction, AccrualError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query_as::<_, TransactionRow>(concat!(
            "DELETE FROM pending_transactions \
             WHERE id = $1 AND transaction_type = 'withdrawal' RETURNING ",
            transaction_columns!()
        ))
        .bind(*approval.transaction_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Err(AccrualError::TransactionNotFound(
                *approval.transaction_id.as_uuid(),
            ));
        };
        let txn = PendingTransaction::try_from(row)?;

        apply_wallet_delta(
            &mut tx,
            txn.wallet_id,
            txn.user_id,
            WalletDelta {
                pending_withdrawal: -txn.amount,
                ..WalletDelta::default()
            },
        )
        .await?;
        insert_history(&mut tx, &approval.history).await?;
        bump_currency(
            &mut tx,
            approval.currency_id,
            CurrencyField::TotalWithdrawal,
            txn.amount,
        )
        .await?;

        tx.commit().await?;
        Ok(txn)
    }

    async fn apply_tick(&self, posting: &TickPosting) -> Result<Option<TickReceipt>, AccrualError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, EarningRow>(concat!(
            "SELECT ",
            earning_columns!(),
            " FROM earnings WHERE id = $1"
        ))
        .bind(*posting.earning_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            let deposit = fetch_deposit(&mut tx, posting.deposit_id).await?;
            return Ok(deposit.map(|deposit| TickReceipt {
                deposit,
                posted: TickPosted::Replayed(row.into()),
            }));
        }

        let Some(row) = sqlx::query_as::<_, DepositRow>(concat!(
            "UPDATE active_deposits SET \
             remaining_duration_ms = remaining_duration_ms - cycle_length_ms, \
             accumulated_earning = accumulated_earning + earning_per_cycle, \
             last_server_timestamp = GREATEST(last_server_timestamp, $2) \
             WHERE id = $1 AND remaining_duration_ms > 0 RETURNING ",
            deposit_columns!()
        ))
        .bind(*posting.deposit_id.as_uuid())
        .bind(posting.tick_at)
        .fetch_optional(&mut *tx)
        .await?
        else {
            let deposit = fetch_deposit(&mut tx, posting.deposit_id).await?;
            return Ok(deposit.map(|deposit| TickReceipt {
                deposit,
                posted: TickPosted::AlreadyMatured,
            }));
        };
        let deposit = ActiveDeposit::try_from(row)?;
        let record = EarningRecord::for_tick(posting.earning_id, &deposit, posting.tick_at);

        sqlx::query(concat!(
            "INSERT INTO earnings (",
            earning_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(*record.id.as_uuid())
        .bind(*record.deposit_id.as_uuid())
        .bind(*record.user_id.as_uuid())
        .bind(&record.username)
        .bind(record.amount)
        .bind(*record.wallet_id.as_uuid())
        .bind(&record.symbol)
        .bind(record.earned_at)
        .bind(&record.referral_username)
        .execute(&mut *tx)
        .await?;

        apply_wallet_delta(
            &mut tx,
            deposit.wallet_id,
            deposit.user_id,
            WalletDelta::balance(record.amount),
        )
        .await?;

        tx.commit().await?;
        Ok(Some(TickReceipt {
            deposit,
            posted: TickPosted::Credited(record),
        }))
    }

    async fn settle_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query_as::<_, DepositRow>(concat!(
            "DELETE FROM active_deposits WHERE id = $1 RETURNING ",
            deposit_columns!()
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let deposit = ActiveDeposit::try_from(row)?;

        apply_wallet_delta(
            &mut tx,
            deposit.wallet_id,
            deposit.user_id,
            WalletDelta::balance(deposit.principal),
        )
        .await?;

        tx.commit().await?;
        Ok(Some(deposit))
    }
}

#[async_trait]
impl PlanCatalog for PostgresStore {
    async fn get_plan(&self, name: &str) -> Result<Option<Plan>, AccrualError> {
        let row = sqlx::query_as::<_, PlanRow>(
            "SELECT name, percentage, cycle_length_ms, duration_days, referral_commission_percent \
             FROM plans WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Plan::from))
    }
}
