//! In-process store.
//!
//! All state sits behind one [`tokio::sync::Mutex`], so every compound
//! operation is trivially atomic: it validates first and only mutates once
//! nothing can fail. Used by tests and when `PERSISTENCE_ENABLED=false`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::models::{
    DepositApproval, DepositOpening, TickPosted, TickPosting, TickReceipt, WithdrawalApproval,
};
use super::{AccrualStore, PlanCatalog};
use crate::domain::{
    ActiveDeposit, Currency, CurrencyField, CurrencyId, DepositFilter, DepositId, DepositStatus,
    EarningRecord, FundingSource, HistoryEntry, PendingTransaction, Plan, ReferralEarning,
    TransactionId, TransactionType, UserAccount, UserId, Wallet, WalletDelta, WalletId,
};
use crate::error::AccrualError;

#[derive(Debug, Default)]
struct MemoryState {
    deposits: HashMap<DepositId, ActiveDeposit>,
    earnings: Vec<EarningRecord>,
    users: HashMap<UserId, UserAccount>,
    wallets: HashMap<WalletId, Wallet>,
    currencies: HashMap<CurrencyId, Currency>,
    plans: HashMap<String, Plan>,
    transactions: HashMap<TransactionId, PendingTransaction>,
    history: Vec<HistoryEntry>,
    referral_earnings: Vec<ReferralEarning>,
}

impl MemoryState {
    fn wallet(&self, id: WalletId) -> Result<&Wallet, AccrualError> {
        self.wallets
            .get(&id)
            .ok_or(AccrualError::WalletNotFound(*id.as_uuid()))
    }

    fn ensure_user(&self, id: UserId) -> Result<(), AccrualError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(AccrualError::UserNotFound(id.to_string()))
        }
    }

    fn ensure_new_deposit(&self, id: DepositId) -> Result<(), AccrualError> {
        if self.deposits.contains_key(&id) {
            return Err(AccrualError::InvalidRequest(format!(
                "deposit {id} already exists"
            )));
        }
        Ok(())
    }

    /// Applies a wallet delta and moves the owner's total balance by the
    /// same balance change. Callers validate existence first.
    fn apply_wallet_delta(&mut self, wallet_id: WalletId, user_id: UserId, delta: WalletDelta) {
        if let Some(wallet) = self.wallets.get_mut(&wallet_id) {
            delta.apply(wallet);
        }
        if let Some(user) = self.users.get_mut(&user_id) {
            user.total_balance += delta.balance;
        }
    }

    fn bump_currency(&mut self, id: CurrencyId, field: CurrencyField, delta: Decimal) {
        if let Some(currency) = self.currencies.get_mut(&id) {
            match field {
                CurrencyField::TotalDeposit => currency.total_deposit += delta,
                CurrencyField::TotalWithdrawal => currency.total_withdrawal += delta,
            }
        }
    }
}

/// In-memory [`AccrualStore`] and [`PlanCatalog`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    tick_failures: AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub async fn put_user(&self, user: UserAccount) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Adds or replaces a wallet.
    pub async fn put_wallet(&self, wallet: Wallet) {
        self.state.lock().await.wallets.insert(wallet.id, wallet);
    }

    /// Adds or replaces a currency aggregate.
    pub async fn put_currency(&self, currency: Currency) {
        self.state
            .lock()
            .await
            .currencies
            .insert(currency.id, currency);
    }

    /// Adds or replaces a plan.
    pub async fn put_plan(&self, plan: Plan) {
        self.state.lock().await.plans.insert(plan.name.clone(), plan);
    }

    /// Returns a currency aggregate.
    pub async fn currency(&self, id: CurrencyId) -> Option<Currency> {
        self.state.lock().await.currencies.get(&id).cloned()
    }

    /// Returns all referral commission rows.
    pub async fn referral_earnings(&self) -> Vec<ReferralEarning> {
        self.state.lock().await.referral_earnings.clone()
    }

    /// Makes the next `count` tick postings fail with
    /// [`AccrualError::TransientStorage`] before touching any state.
    pub fn fail_next_ticks(&self, count: u32) {
        self.tick_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.tick_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AccrualStore for MemoryStore {
    async fn insert_deposit(&self, deposit: &ActiveDeposit) -> Result<(), AccrualError> {
        let mut state = self.state.lock().await;
        state.ensure_new_deposit(deposit.id)?;
        state.deposits.insert(deposit.id, deposit.clone());
        Ok(())
    }

    async fn get_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError> {
        Ok(self.state.lock().await.deposits.get(&id).cloned())
    }

    async fn remove_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError> {
        Ok(self.state.lock().await.deposits.remove(&id))
    }

    fn stream_deposits(&self) -> BoxStream<'_, Result<ActiveDeposit, AccrualError>> {
        stream::once(async move {
            let state = self.state.lock().await;
            let mut deposits: Vec<ActiveDeposit> = state.deposits.values().cloned().collect();
            deposits.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            stream::iter(deposits.into_iter().map(Ok))
        })
        .flatten()
        .boxed()
    }

    async fn list_deposits(
        &self,
        filter: &DepositFilter,
    ) -> Result<Vec<ActiveDeposit>, AccrualError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn set_deposit_status(
        &self,
        id: DepositId,
        status: DepositStatus,
    ) -> Result<Option<ActiveDeposit>, AccrualError> {
        let mut state = self.state.lock().await;
        Ok(state.deposits.get_mut(&id).map(|deposit| {
            deposit.status = status;
            deposit.clone()
        }))
    }

    async fn list_earnings(
        &self,
        deposit_id: DepositId,
    ) -> Result<Vec<EarningRecord>, AccrualError> {
        let state = self.state.lock().await;
        Ok(state
            .earnings
            .iter()
            .filter(|e| e.deposit_id == deposit_id)
            .cloned()
            .collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, AccrualError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, AccrualError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, AccrualError> {
        Ok(self.state.lock().await.wallets.get(&id).cloned())
    }

    async fn find_wallet(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Wallet>, AccrualError> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .find(|w| w.user_id == user_id && w.currency_id == currency_id)
            .cloned())
    }

    async fn increment_balance(
        &self,
        wallet_id: WalletId,
        user_id: UserId,
        delta: Decimal,
    ) -> Result<(), AccrualError> {
        let mut state = self.state.lock().await;
        state.wallet(wallet_id)?;
        state.ensure_user(user_id)?;
        state.apply_wallet_delta(wallet_id, user_id, WalletDelta::balance(delta));
        Ok(())
    }

    async fn increment_currency_totals(
        &self,
        currency_id: CurrencyId,
        field: CurrencyField,
        delta: Decimal,
    ) -> Result<(), AccrualError> {
        self.state
            .lock()
            .await
            .bump_currency(currency_id, field, delta);
        Ok(())
    }

    async fn submit_transaction(&self, txn: &PendingTransaction) -> Result<(), AccrualError> {
        let mut state = self.state.lock().await;
        let wallet = state.wallet(txn.wallet_id)?;
        let (user_id, balance) = (wallet.user_id, wallet.balance);
        if state.transactions.contains_key(&txn.id) {
            return Err(AccrualError::InvalidRequest(format!(
                "transaction {} already exists",
                txn.id
            )));
        }
        if txn.transaction_type == TransactionType::Withdrawal {
            if txn.amount > balance {
                return Err(AccrualError::InsufficientFunds {
                    requested: txn.amount,
                    available: balance,
                });
            }
            state.ensure_user(user_id)?;
        }
        state.apply_wallet_delta(txn.wallet_id, user_id, txn.reservation());
        state.transactions.insert(txn.id, txn.clone());
        Ok(())
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<PendingTransaction>, AccrualError> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn cancel_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<PendingTransaction>, AccrualError> {
        let mut state = self.state.lock().await;
        let Some(txn) = state.transactions.remove(&id) else {
            return Ok(None);
        };
        state.apply_wallet_delta(txn.wallet_id, txn.user_id, -txn.reservation());
        Ok(Some(txn))
    }

    async fn list_history(
        &self,
        user_id: Option<UserId>,
    ) -> Result<Vec<HistoryEntry>, AccrualError> {
        let state = self.state.lock().await;
        let mut rows: Vec<HistoryEntry> = state
            .history
            .iter()
            .filter(|entry| user_id.is_none_or(|id| entry.user_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(rows)
    }

    async fn open_deposit(&self, opening: &DepositOpening) -> Result<(), AccrualError> {
        let deposit = &opening.deposit;
        let amount = deposit.principal;
        let mut state = self.state.lock().await;

        let wallet = state.wallet(deposit.wallet_id)?;
        let available = match opening.source {
            FundingSource::Balance => wallet.balance,
            FundingSource::PendingDeposit => wallet.balance.min(wallet.pending_deposit),
        };
        if amount > available {
            return Err(AccrualError::InsufficientFunds {
                requested: amount,
                available,
            });
        }
        state.ensure_user(deposit.user_id)?;
        state.ensure_new_deposit(deposit.id)?;

        let pending_release = match opening.source {
            FundingSource::Balance => Decimal::ZERO,
            FundingSource::PendingDeposit => -amount,
        };
        state.apply_wallet_delta(
            deposit.wallet_id,
            deposit.user_id,
            WalletDelta {
                balance: -amount,
                total_deposit: amount,
                pending_deposit: pending_release,
                ..WalletDelta::default()
            },
        );
        state.history.push(opening.history.clone());
        state.deposits.insert(deposit.id, deposit.clone());
        state.bump_currency(deposit.currency_id, CurrencyField::TotalDeposit, amount);
        Ok(())
    }

    async fn approve_transaction(&self, approval: &DepositApproval) -> Result<(), AccrualError> {
        let deposit = &approval.deposit;
        let amount = deposit.principal;
        let mut state = self.state.lock().await;

        if !state
            .transactions
            .get(&approval.transaction_id)
            .is_some_and(|txn| txn.transaction_type == TransactionType::Deposit)
        {
            return Err(AccrualError::TransactionNotFound(
                *approval.transaction_id.as_uuid(),
            ));
        }
        let pending = state.wallet(deposit.wallet_id)?.pending_deposit;
        if amount > pending {
            return Err(AccrualError::InsufficientFunds {
                requested: amount,
                available: pending,
            });
        }
        state.ensure_new_deposit(deposit.id)?;
        if let Some(referral) = &approval.referral {
            state.wallet(referral.referrer_wallet_id)?;
            state.ensure_user(referral.earning.referrer_id)?;
        }

        state.transactions.remove(&approval.transaction_id);
        state.history.push(approval.history.clone());
        state.apply_wallet_delta(
            deposit.wallet_id,
            deposit.user_id,
            WalletDelta {
                pending_deposit: -amount,
                total_deposit: amount,
                ..WalletDelta::default()
            },
        );
        state.deposits.insert(deposit.id, deposit.clone());
        state.bump_currency(deposit.currency_id, CurrencyField::TotalDeposit, amount);

        if let Some(referral) = &approval.referral {
            let commission = referral.earning.commission;
            state.apply_wallet_delta(
                referral.referrer_wallet_id,
                referral.earning.referrer_id,
                WalletDelta::balance(commission),
            );
            if let Some(referrer) = state.users.get_mut(&referral.earning.referrer_id) {
                referrer.commission += commission;
            }
            state.referral_earnings.push(referral.earning.clone());
        }
        Ok(())
    }

    async fn approve_withdrawal(
        &self,
        approval: &WithdrawalApproval,
    ) -> Result<PendingTransaction, AccrualError> {
        let mut state = self.state.lock().await;
        let Some(txn) = state
            .transactions
            .get(&approval.transaction_id)
            .filter(|txn| txn.transaction_type == TransactionType::Withdrawal)
            .cloned()
        else {
            return Err(AccrualError::TransactionNotFound(
                *approval.transaction_id.as_uuid(),
            ));
        };
        state.wallet(txn.wallet_id)?;

        state.transactions.remove(&txn.id);
        state.history.push(approval.history.clone());
        state.apply_wallet_delta(
            txn.wallet_id,
            txn.user_id,
            WalletDelta {
                pending_withdrawal: -txn.amount,
                ..WalletDelta::default()
            },
        );
        state.bump_currency(
            approval.currency_id,
            CurrencyField::TotalWithdrawal,
            txn.amount,
        );
        Ok(txn)
    }

    async fn apply_tick(&self, posting: &TickPosting) -> Result<Option<TickReceipt>, AccrualError> {
        if self.take_injected_failure() {
            return Err(AccrualError::TransientStorage(
                "injected tick failure".to_string(),
            ));
        }
        let mut state = self.state.lock().await;

        if let Some(record) = state
            .earnings
            .iter()
            .find(|e| e.id == posting.earning_id)
            .cloned()
        {
            return Ok(state
                .deposits
                .get(&posting.deposit_id)
                .map(|deposit| TickReceipt {
                    deposit: deposit.clone(),
                    posted: TickPosted::Replayed(record),
                }));
        }

        let Some(deposit) = state.deposits.get_mut(&posting.deposit_id) else {
            return Ok(None);
        };
        if deposit.is_matured() {
            return Ok(Some(TickReceipt {
                deposit: deposit.clone(),
                posted: TickPosted::AlreadyMatured,
            }));
        }
        let amount = deposit.apply_tick(posting.tick_at);
        let deposit = deposit.clone();
        let record = EarningRecord::for_tick(posting.earning_id, &deposit, posting.tick_at);

        state.earnings.push(record.clone());
        state.apply_wallet_delta(
            deposit.wallet_id,
            deposit.user_id,
            WalletDelta::balance(amount),
        );
        Ok(Some(TickReceipt {
            deposit,
            posted: TickPosted::Credited(record),
        }))
    }

    async fn settle_deposit(&self, id: DepositId) -> Result<Option<ActiveDeposit>, AccrualError> {
        let mut state = self.state.lock().await;
        let Some(deposit) = state.deposits.remove(&id) else {
            return Ok(None);
        };
        state.apply_wallet_delta(
            deposit.wallet_id,
            deposit.user_id,
            WalletDelta::balance(deposit.principal),
        );
        Ok(Some(deposit))
    }
}

#[async_trait]
impl PlanCatalog for MemoryStore {
    async fn get_plan(&self, name: &str) -> Result<Option<Plan>, AccrualError> {
        Ok(self.state.lock().await.plans.get(name).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{EntryId, HistoryKind, MS_PER_DAY, NewDeposit};

    struct Fixture {
        store: MemoryStore,
        user: UserAccount,
        wallet: Wallet,
        plan: Plan,
    }

    async fn fixture(balance: Decimal) -> Fixture {
        let store = MemoryStore::new();
        let user = UserAccount {
            id: UserId::new(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            total_balance: balance,
            commission: Decimal::ZERO,
            referred_by: None,
        };
        let currency = Currency {
            id: CurrencyId::new(),
            name: "Tether".to_string(),
            symbol: "USDT".to_string(),
            total_deposit: Decimal::ZERO,
            total_withdrawal: Decimal::ZERO,
        };
        let wallet = Wallet {
            id: WalletId::new(),
            user_id: user.id,
            currency_id: currency.id,
            name: "Tether".to_string(),
            symbol: "USDT".to_string(),
            balance,
            total_deposit: Decimal::ZERO,
            pending_deposit: Decimal::ZERO,
            total_withdrawal: Decimal::ZERO,
            pending_withdrawal: Decimal::ZERO,
        };
        let plan = Plan {
            name: "starter".to_string(),
            percentage: dec!(2),
            cycle_length_ms: MS_PER_DAY,
            duration_days: 10,
            referral_commission_percent: dec!(5),
        };
        store.put_user(user.clone()).await;
        store.put_currency(currency).await;
        store.put_wallet(wallet.clone()).await;
        store.put_plan(plan.clone()).await;
        Fixture {
            store,
            user,
            wallet,
            plan,
        }
    }

    fn deposit(f: &Fixture, principal: Decimal) -> ActiveDeposit {
        ActiveDeposit::open(
            NewDeposit {
                user_id: f.user.id,
                username: f.user.username.clone(),
                wallet_id: f.wallet.id,
                currency_id: f.wallet.currency_id,
                symbol: f.wallet.symbol.clone(),
                principal,
                referral_username: None,
            },
            &f.plan,
            Utc::now(),
        )
    }

    async fn balances(f: &Fixture) -> (Decimal, Decimal) {
        let Ok(Some(wallet)) = f.store.get_wallet(f.wallet.id).await else {
            panic!("wallet missing");
        };
        let Ok(Some(user)) = f.store.get_user(f.user.id).await else {
            panic!("user missing");
        };
        (wallet.balance, user.total_balance)
    }

    #[tokio::test]
    async fn open_deposit_rejects_overdraft_without_mutation() {
        let f = fixture(dec!(100)).await;
        let d = deposit(&f, dec!(150));
        let opening = DepositOpening {
            history: HistoryEntry::opened(&d, HistoryKind::AutoTransact),
            deposit: d,
            source: FundingSource::Balance,
        };

        let result = f.store.open_deposit(&opening).await;
        let Err(AccrualError::InsufficientFunds {
            requested,
            available,
        }) = result
        else {
            panic!("expected insufficient funds");
        };
        assert_eq!(requested, dec!(150));
        assert_eq!(available, dec!(100));
        assert_eq!(balances(&f).await, (dec!(100), dec!(100)));
        assert!(matches!(f.store.list_history(None).await, Ok(rows) if rows.is_empty()));
        let Ok(listed) = f.store.list_deposits(&DepositFilter::default()).await else {
            panic!("list failed");
        };
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn open_deposit_debits_and_registers() {
        let f = fixture(dec!(1000)).await;
        let d = deposit(&f, dec!(400));
        let id = d.id;
        let opening = DepositOpening {
            history: HistoryEntry::opened(&d, HistoryKind::AutoTransact),
            deposit: d,
            source: FundingSource::Balance,
        };
        tokio_test::assert_ok!(f.store.open_deposit(&opening).await);

        assert_eq!(balances(&f).await, (dec!(600), dec!(600)));
        assert!(matches!(f.store.get_deposit(id).await, Ok(Some(_))));
        let Some(currency) = f.store.currency(f.wallet.currency_id).await else {
            panic!("currency missing");
        };
        assert_eq!(currency.total_deposit, dec!(400));
    }

    #[tokio::test]
    async fn reinvest_requires_pending_bucket() {
        let f = fixture(dec!(1000)).await;
        let d = deposit(&f, dec!(200));
        let opening = DepositOpening {
            history: HistoryEntry::opened(&d, HistoryKind::Reinvest),
            deposit: d,
            source: FundingSource::PendingDeposit,
        };
        let result = f.store.open_deposit(&opening).await;
        assert!(matches!(
            result,
            Err(AccrualError::InsufficientFunds { available, .. }) if available.is_zero()
        ));
    }

    #[tokio::test]
    async fn tick_posts_earning_and_credits_once_per_id() {
        let f = fixture(Decimal::ZERO).await;
        let d = deposit(&f, dec!(1000));
        tokio_test::assert_ok!(f.store.insert_deposit(&d).await);

        let posting = TickPosting::new(d.id, Utc::now());
        let Ok(Some(first)) = f.store.apply_tick(&posting).await else {
            panic!("tick failed");
        };
        assert!(matches!(first.posted, TickPosted::Credited(_)));
        assert_eq!(first.deposit.accumulated_earning, dec!(20));
        assert_eq!(first.deposit.remaining_duration_ms, 9 * MS_PER_DAY);

        let Ok(Some(second)) = f.store.apply_tick(&posting).await else {
            panic!("replay failed");
        };
        assert!(matches!(second.posted, TickPosted::Replayed(_)));
        assert_eq!(second.deposit.accumulated_earning, dec!(20));
        assert_eq!(balances(&f).await, (dec!(20), dec!(20)));
        let Ok(earnings) = f.store.list_earnings(d.id).await else {
            panic!("earnings failed");
        };
        assert_eq!(earnings.len(), 1);
    }

    #[tokio::test]
    async fn tick_after_maturity_credits_nothing() {
        let f = fixture(Decimal::ZERO).await;
        let mut d = deposit(&f, dec!(1000));
        d.remaining_duration_ms = 0;
        d.accumulated_earning = dec!(200);
        tokio_test::assert_ok!(f.store.insert_deposit(&d).await);

        let posting = TickPosting::new(d.id, Utc::now());
        let Ok(Some(receipt)) = f.store.apply_tick(&posting).await else {
            panic!("tick failed");
        };
        assert!(matches!(receipt.posted, TickPosted::AlreadyMatured));
        assert_eq!(receipt.deposit.remaining_duration_ms, 0);
        assert_eq!(receipt.deposit.accumulated_earning, dec!(200));
        assert_eq!(balances(&f).await, (Decimal::ZERO, Decimal::ZERO));
        let Ok(earnings) = f.store.list_earnings(d.id).await else {
            panic!("earnings failed");
        };
        assert!(earnings.is_empty());
    }

    #[tokio::test]
    async fn tick_on_missing_deposit_returns_none() {
        let f = fixture(Decimal::ZERO).await;
        let posting = TickPosting {
            deposit_id: DepositId::new(),
            earning_id: EntryId::new(),
            tick_at: Utc::now(),
        };
        assert!(matches!(f.store.apply_tick(&posting).await, Ok(None)));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_leave_state_untouched() {
        let f = fixture(Decimal::ZERO).await;
        let d = deposit(&f, dec!(1000));
        tokio_test::assert_ok!(f.store.insert_deposit(&d).await);
        f.store.fail_next_ticks(1);

        let posting = TickPosting::new(d.id, Utc::now());
        let Err(err) = f.store.apply_tick(&posting).await else {
            panic!("expected injected failure");
        };
        assert!(err.is_transient());
        assert_eq!(balances(&f).await, (Decimal::ZERO, Decimal::ZERO));
        assert!(matches!(f.store.apply_tick(&posting).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn settle_returns_principal_exactly_once() {
        let f = fixture(Decimal::ZERO).await;
        let d = deposit(&f, dec!(1000));
        tokio_test::assert_ok!(f.store.insert_deposit(&d).await);

        assert!(matches!(f.store.settle_deposit(d.id).await, Ok(Some(_))));
        assert!(matches!(f.store.settle_deposit(d.id).await, Ok(None)));
        assert_eq!(balances(&f).await, (dec!(1000), dec!(1000)));
        assert!(matches!(f.store.get_deposit(d.id).await, Ok(None)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let f = fixture(Decimal::ZERO).await;
        let d = deposit(&f, dec!(10));
        tokio_test::assert_ok!(f.store.insert_deposit(&d).await);
        assert!(matches!(f.store.remove_deposit(d.id).await, Ok(Some(_))));
        assert!(matches!(f.store.remove_deposit(d.id).await, Ok(None)));
        assert_eq!(balances(&f).await, (Decimal::ZERO, Decimal::ZERO));
    }

    #[tokio::test]
    async fn concurrent_credits_are_not_lost() {
        let f = fixture(dec!(100)).await;
        let store = Arc::new(f.store);
        let (wallet_id, user_id) = (f.wallet.id, f.user.id);

        let mut handles = Vec::new();
        for delta in [dec!(12.5), dec!(7.25)] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment_balance(wallet_id, user_id, delta).await
            }));
        }
        for handle in handles {
            let Ok(result) = handle.await else {
                panic!("task panicked");
            };
            tokio_test::assert_ok!(result);
        }

        let Ok(Some(wallet)) = store.get_wallet(wallet_id).await else {
            panic!("wallet missing");
        };
        assert_eq!(wallet.balance, dec!(119.75));
    }

    #[tokio::test]
    async fn stream_yields_every_deposit_and_restarts() {
        let f = fixture(Decimal::ZERO).await;
        for principal in [dec!(1), dec!(2), dec!(3)] {
            tokio_test::assert_ok!(f.store.insert_deposit(&deposit(&f, principal)).await);
        }
        for _ in 0..2 {
            let rows: Vec<_> = f.store.stream_deposits().collect().await;
            assert_eq!(rows.len(), 3);
            assert!(rows.iter().all(Result::is_ok));
        }
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let f = fixture(Decimal::ZERO).await;
        let d = deposit(&f, dec!(5));
        tokio_test::assert_ok!(f.store.insert_deposit(&d).await);
        tokio_test::assert_ok!(f.store.insert_deposit(&deposit(&f, dec!(6))).await);
        let _ = f
            .store
            .set_deposit_status(d.id, DepositStatus::Suspended)
            .await;

        let filter = DepositFilter {
            status: Some(DepositStatus::Suspended),
            ..DepositFilter::default()
        };
        let Ok(listed) = f.store.list_deposits(&filter).await else {
            panic!("list failed");
        };
        assert_eq!(listed.len(), 1);

        let other_user = DepositFilter {
            user_id: Some(UserId::new()),
            ..DepositFilter::default()
        };
        let Ok(listed) = f.store.list_deposits(&other_user).await else {
            panic!("list failed");
        };
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn cancel_transaction_reverses_pending() {
        let f = fixture(Decimal::ZERO).await;
        let txn = PendingTransaction {
            id: TransactionId::new(),
            user_id: f.user.id,
            wallet_id: f.wallet.id,
            plan_name: Some(f.plan.name.clone()),
            amount: dec!(300),
            transaction_type: TransactionType::Deposit,
            created_at: Utc::now(),
        };
        tokio_test::assert_ok!(f.store.submit_transaction(&txn).await);
        let Ok(Some(wallet)) = f.store.get_wallet(f.wallet.id).await else {
            panic!("wallet missing");
        };
        assert_eq!(wallet.pending_deposit, dec!(300));

        assert!(matches!(f.store.cancel_transaction(txn.id).await, Ok(Some(_))));
        assert!(matches!(f.store.cancel_transaction(txn.id).await, Ok(None)));
        let Ok(Some(wallet)) = f.store.get_wallet(f.wallet.id).await else {
            panic!("wallet missing");
        };
        assert!(wallet.pending_deposit.is_zero());
    }

    fn withdrawal(f: &Fixture, amount: Decimal) -> PendingTransaction {
        PendingTransaction {
            id: TransactionId::new(),
            user_id: f.user.id,
            wallet_id: f.wallet.id,
            plan_name: None,
            amount,
            transaction_type: TransactionType::Withdrawal,
            created_at: Utc::now(),
        }
    }

    async fn wallet(f: &Fixture) -> Wallet {
        let Ok(Some(wallet)) = f.store.get_wallet(f.wallet.id).await else {
            panic!("wallet missing");
        };
        wallet
    }

    #[tokio::test]
    async fn withdrawal_submit_reserves_and_cancel_refunds() {
        let f = fixture(dec!(500)).await;
        let txn = withdrawal(&f, dec!(200));
        tokio_test::assert_ok!(f.store.submit_transaction(&txn).await);

        assert_eq!(balances(&f).await, (dec!(300), dec!(300)));
        let reserved = wallet(&f).await;
        assert_eq!(reserved.pending_withdrawal, dec!(200));
        assert_eq!(reserved.total_withdrawal, dec!(200));
        assert!(reserved.pending_deposit.is_zero());

        let Ok(Some(cancelled)) = f.store.cancel_transaction(txn.id).await else {
            panic!("cancel failed");
        };
        assert_eq!(cancelled.transaction_type, TransactionType::Withdrawal);
        assert_eq!(balances(&f).await, (dec!(500), dec!(500)));
        let refunded = wallet(&f).await;
        assert!(refunded.pending_withdrawal.is_zero());
        assert!(refunded.total_withdrawal.is_zero());
        assert!(refunded.pending_deposit.is_zero());
    }

    #[tokio::test]
    async fn withdrawal_over_balance_is_rejected() {
        let f = fixture(dec!(100)).await;
        let txn = withdrawal(&f, dec!(101));
        let result = f.store.submit_transaction(&txn).await;
        assert!(matches!(
            result,
            Err(AccrualError::InsufficientFunds { available, .. }) if available == dec!(100)
        ));
        assert_eq!(balances(&f).await, (dec!(100), dec!(100)));
        assert!(matches!(f.store.get_transaction(txn.id).await, Ok(None)));
    }

    #[tokio::test]
    async fn approve_withdrawal_releases_pending_and_logs_history() {
        let f = fixture(dec!(500)).await;
        let txn = withdrawal(&f, dec!(120));
        tokio_test::assert_ok!(f.store.submit_transaction(&txn).await);
        let approval = WithdrawalApproval {
            transaction_id: txn.id,
            currency_id: f.wallet.currency_id,
            history: HistoryEntry::withdrawn(&txn, Utc::now()),
        };

        let Ok(consumed) = f.store.approve_withdrawal(&approval).await else {
            panic!("approval failed");
        };
        assert_eq!(consumed.amount, dec!(120));
        let approved = wallet(&f).await;
        assert_eq!(approved.balance, dec!(380));
        assert!(approved.pending_withdrawal.is_zero());
        assert_eq!(approved.total_withdrawal, dec!(120));
        let Some(currency) = f.store.currency(f.wallet.currency_id).await else {
            panic!("currency missing");
        };
        assert_eq!(currency.total_withdrawal, dec!(120));

        let Ok(history) = f.store.list_history(Some(f.user.id)).await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 1);
        assert!(
            history
                .iter()
                .all(|h| h.kind == HistoryKind::Withdrawal && h.deposit_id.is_none())
        );

        assert!(matches!(
            f.store.approve_withdrawal(&approval).await,
            Err(AccrualError::TransactionNotFound(_))
        ));
        assert_eq!(wallet(&f).await.total_withdrawal, dec!(120));
    }

    #[tokio::test]
    async fn approvals_do_not_cross_transaction_types() {
        let f = fixture(dec!(500)).await;
        let txn = withdrawal(&f, dec!(50));
        tokio_test::assert_ok!(f.store.submit_transaction(&txn).await);

        let d = deposit(&f, dec!(50));
        let approval = DepositApproval {
            transaction_id: txn.id,
            history: HistoryEntry::opened(&d, HistoryKind::Approval),
            deposit: d,
            referral: None,
        };
        assert!(matches!(
            f.store.approve_transaction(&approval).await,
            Err(AccrualError::TransactionNotFound(_))
        ));
        assert!(matches!(f.store.get_transaction(txn.id).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn history_lists_newest_first_per_user() {
        let f = fixture(dec!(1000)).await;
        let older = deposit(&f, dec!(100));
        let mut newer = deposit(&f, dec!(200));
        newer.created_at = older.created_at + chrono::TimeDelta::seconds(5);
        for d in [older, newer] {
            let opening = DepositOpening {
                history: HistoryEntry::opened(&d, HistoryKind::AutoTransact),
                deposit: d,
                source: FundingSource::Balance,
            };
            tokio_test::assert_ok!(f.store.open_deposit(&opening).await);
        }

        let Ok(rows) = f.store.list_history(Some(f.user.id)).await else {
            panic!("history failed");
        };
        let amounts: Vec<Decimal> = rows.iter().map(|h| h.amount).collect();
        assert_eq!(amounts, vec![dec!(200), dec!(100)]);
        assert!(matches!(
            f.store.list_history(Some(UserId::new())).await,
            Ok(rows) if rows.is_empty()
        ));
    }
}
