//! Persistence layer: the store seam and its two backends.
//!
//! [`AccrualStore`] covers the active deposit registry, the earning ledger,
//! pending transactions, the history log and the delta-only ledger
//! operations on wallets, users and currencies. Every compound operation
//! (opening a deposit, approving a transaction, posting a tick, settling)
//! is atomic: either all of its writes land or none do.
//!
//! Balance fields are only ever changed by increments. No method accepts an
//! absolute balance, so lost updates between concurrent ticks on the same
//! wallet cannot be expressed.
//!
//! [`memory::MemoryStore`] backs tests and persistence-disabled runs;
//! [`postgres::PostgresStore`] uses `sqlx::PgPool` with one database
//! transaction per compound operation.

pub mod event_log;
pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;

use crate::domain::{
    ActiveDeposit, CurrencyField, CurrencyId, DepositFilter, DepositId, DepositStatus,
    EarningRecord, HistoryEntry, PendingTransaction, Plan, TransactionId, UserAccount, UserId,
    Wallet, WalletId,
};
use crate::error::AccrualError;

pub use memory::MemoryStore;
pub use models::{
    DepositApproval, DepositOpening, ReferralPayout, TickPosted, TickPosting, TickReceipt,
    WithdrawalApproval,
};
pub use postgres::PostgresStore;

/// Durable storage used by the accrual engine.
#[async_trait]
pub trait AccrualStore: fmt::Debug + Send + Sync {
    // ── Active deposit registry ─────────────────────────────────────────

    /// Persists a deposit as-is.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::InvalidRequest`] if the id already exists, or
    /// a storage error.
    async fn insert_deposit(&self, deposit: &ActiveDeposit) -> Result<(), AccrualError>;

    /// Fetches one deposit.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn get_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError>;

    /// Deletes a deposit without touching any balance. Removing a missing
    /// id is a no-op returning `None`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn remove_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError>;

    /// Lazily yields every registered deposit, oldest first. Each call
    /// starts a fresh pass.
    fn stream_deposits(&self) -> BoxStream<'_, Result<ActiveDeposit, AccrualError>>;

    /// Returns all deposits passing `filter`, unordered.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn list_deposits(
        &self,
        filter: &DepositFilter,
    ) -> Result<Vec<ActiveDeposit>, AccrualError>;

    /// Changes a deposit's status, returning the updated row.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn set_deposit_status(
        &self,
        id: DepositId,
        status: DepositStatus,
    ) -> Result<Option<ActiveDeposit>, AccrualError>;

    // ── Earning ledger ──────────────────────────────────────────────────

    /// Returns every earning row of a deposit in tick order.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn list_earnings(&self, deposit_id: DepositId)
    -> Result<Vec<EarningRecord>, AccrualError>;

    // ── Ledger store ────────────────────────────────────────────────────

    /// Fetches a user.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, AccrualError>;

    /// Fetches a user by username.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, AccrualError>;

    /// Fetches a wallet.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, AccrualError>;

    /// Fetches a user's wallet in a given currency.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn find_wallet(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Wallet>, AccrualError>;

    /// Atomically adds `delta` to a wallet's balance and its owner's total
    /// balance.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::WalletNotFound`] / [`AccrualError::UserNotFound`]
    /// (nothing applied), or a storage error.
    async fn increment_balance(
        &self,
        wallet_id: WalletId,
        user_id: UserId,
        delta: Decimal,
    ) -> Result<(), AccrualError>;

    /// Atomically adds `delta` to one currency aggregate.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn increment_currency_totals(
        &self,
        currency_id: CurrencyId,
        field: CurrencyField,
        delta: Decimal,
    ) -> Result<(), AccrualError>;

    // ── Pending transactions ────────────────────────────────────────────

    /// Records a pending transaction.
    ///
    /// A deposit adds its amount to the wallet's `pending_deposit`. A
    /// withdrawal moves it out of `balance` (and the owner's total balance)
    /// into `pending_withdrawal` and `total_withdrawal`.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::WalletNotFound`],
    /// [`AccrualError::InsufficientFunds`] with nothing applied if a
    /// withdrawal exceeds the balance, or a storage error.
    async fn submit_transaction(&self, txn: &PendingTransaction) -> Result<(), AccrualError>;

    /// Fetches a pending transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<PendingTransaction>, AccrualError>;

    /// Deletes a pending transaction and reverses what submitting it did
    /// to the wallet: a deposit releases `pending_deposit`, a withdrawal
    /// returns its amount to the balance.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn cancel_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<PendingTransaction>, AccrualError>;

    // ── History log ─────────────────────────────────────────────────────

    /// History rows, newest first, optionally for one user only.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn list_history(
        &self,
        user_id: Option<UserId>,
    ) -> Result<Vec<HistoryEntry>, AccrualError>;

    // ── Atomic compound operations ──────────────────────────────────────

    /// Debits the funding bucket, writes history, registers the deposit and
    /// bumps the currency total.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::InsufficientFunds`] with nothing applied if
    /// the bucket is short, or a storage error.
    async fn open_deposit(&self, opening: &DepositOpening) -> Result<(), AccrualError>;

    /// Consumes a pending transaction, registers its deposit and pays the
    /// referral commission if one is attached.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::TransactionNotFound`] if the transaction was
    /// already consumed, [`AccrualError::InsufficientFunds`] if the wallet's
    /// pending bucket is short, or a storage error. Nothing is applied on
    /// error.
    async fn approve_transaction(&self, approval: &DepositApproval) -> Result<(), AccrualError>;

    /// Consumes a pending withdrawal, releases its `pending_withdrawal`,
    /// bumps the currency's `total_withdrawal` and writes history. Returns
    /// the consumed transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::TransactionNotFound`] if no pending
    /// withdrawal has that id, or a storage error. Nothing is applied on
    /// error.
    async fn approve_withdrawal(
        &self,
        approval: &WithdrawalApproval,
    ) -> Result<PendingTransaction, AccrualError>;

    /// Posts one tick: decrements remaining duration, accumulates earning,
    /// advances the server timestamp, appends the earning row and credits
    /// wallet and user. Returns `None` if the deposit no longer exists.
    ///
    /// Posting the same `earning_id` twice applies it once; the second call
    /// returns the current state flagged as replayed. A deposit whose
    /// remaining duration is already exhausted is never credited.
    ///
    /// # Errors
    ///
    /// Returns a storage error with nothing applied.
    async fn apply_tick(&self, posting: &TickPosting) -> Result<Option<TickReceipt>, AccrualError>;

    /// Removes a deposit and returns its principal to wallet and user.
    /// Returns `None`, crediting nothing, if it was already removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error with nothing applied.
    async fn settle_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError>;
}

/// Read-only plan reference data.
#[async_trait]
pub trait PlanCatalog: fmt::Debug + Send + Sync {
    /// Looks a plan up by name.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    async fn get_plan(&self, name: &str) -> Result<Option<Plan>, AccrualError>;
}
