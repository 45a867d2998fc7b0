//! Deposit service: opens, approves, lists and resumes active deposits, and
//! handles the withdrawals that share their pending-transaction queue.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::accrual::scheduler::cycle_duration;
use crate::accrual::{
    AccrualScheduler, CatchUpPolicy, DepositPhase, ResumeCoordinator, ResumeReport,
    SchedulerOptions, TimerPlan,
};
use crate::domain::{
    AccrualEvent, ActiveDeposit, Clock, DepositFilter, DepositId, DepositSort, DepositStatus,
    EarningRecord, EntryId, EventBus, FundingSource, HistoryEntry, HistoryKind, NewDeposit, Page,
    PageRequest, PendingTransaction, Plan, ReferralEarning, TransactionId, TransactionType,
    UserAccount, UserId, Wallet, WalletId, percent_of,
};
use crate::error::AccrualError;
use crate::notification::{NotificationSink, NotificationTemplate, Recipient, notify_best_effort};
use crate::persistence::{
    AccrualStore, DepositApproval, DepositOpening, PlanCatalog, ReferralPayout, WithdrawalApproval,
};

/// Engine tuning taken from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSettings {
    /// Catch-up behaviour on resume.
    pub catch_up: CatchUpPolicy,
    /// Extra delay per deposit during boot-time resumption.
    pub resume_stagger: Duration,
    /// Tick retry and payout notification options.
    pub scheduler: SchedulerOptions,
}

/// Request to open a deposit directly from a wallet.
#[derive(Debug, Clone)]
pub struct CreateDepositRequest {
    /// Depositing user.
    pub user_id: UserId,
    /// Funding wallet; must belong to the user.
    pub wallet_id: WalletId,
    /// Plan to enter.
    pub plan_name: String,
    /// Principal.
    pub amount: Decimal,
    /// Bucket the principal comes from.
    pub source: FundingSource,
}

/// Request to record a deposit that needs administrative approval.
#[derive(Debug, Clone)]
pub struct SubmitDepositRequest {
    /// Depositing user.
    pub user_id: UserId,
    /// Target wallet; must belong to the user.
    pub wallet_id: WalletId,
    /// Plan to enter on approval.
    pub plan_name: String,
    /// Amount.
    pub amount: Decimal,
}

/// Request to take funds out of a wallet, subject to approval.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    /// Withdrawing user.
    pub user_id: UserId,
    /// Wallet debited; must belong to the user.
    pub wallet_id: WalletId,
    /// Amount.
    pub amount: Decimal,
}

/// Orchestration layer for the accrual engine.
///
/// Every operation validates against reference data, performs one atomic
/// store operation, then starts or stops timers, publishes events and sends
/// notifications. Notifications never fail an operation.
#[derive(Debug)]
pub struct DepositService {
    store: Arc<dyn AccrualStore>,
    plans: Arc<dyn PlanCatalog>,
    notifier: Arc<dyn NotificationSink>,
    event_bus: EventBus,
    clock: Clock,
    scheduler: Arc<AccrualScheduler>,
    resume: ResumeCoordinator,
}

impl DepositService {
    /// Creates a service with its own scheduler and resume coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn AccrualStore>,
        plans: Arc<dyn PlanCatalog>,
        notifier: Arc<dyn NotificationSink>,
        event_bus: EventBus,
        clock: Clock,
        settings: EngineSettings,
    ) -> Self {
        let scheduler = Arc::new(AccrualScheduler::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            event_bus.clone(),
            clock,
            settings.scheduler,
        ));
        let resume = ResumeCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            event_bus.clone(),
            clock,
            settings.catch_up,
            settings.resume_stagger,
        );
        Self {
            store,
            plans,
            notifier,
            event_bus,
            clock,
            scheduler,
            resume,
        }
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Timer phase of a deposit, if it has a timer.
    #[must_use]
    pub fn deposit_phase(&self, deposit_id: DepositId) -> Option<DepositPhase> {
        self.scheduler.phase(deposit_id)
    }

    /// Number of running timers.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.scheduler.active_timers()
    }

    /// Opens a deposit funded from the wallet balance (auto-transact) or
    /// from the pending-deposit bucket (reinvestment) and starts accruing.
    ///
    /// Auto-transact sends a `deposit-approval` notification; reinvestment
    /// sends none.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::InvalidRequest`] for a non-positive amount or
    /// a wallet not owned by the user, [`AccrualError::PlanNotFound`],
    /// [`AccrualError::UserNotFound`], [`AccrualError::WalletNotFound`], or
    /// [`AccrualError::InsufficientFunds`] with nothing applied.
    pub async fn create_active_deposit(
        &self,
        request: CreateDepositRequest,
    ) -> Result<ActiveDeposit, AccrualError> {
        ensure_positive(request.amount)?;
        let plan = self.load_plan(&request.plan_name).await?;
        let (user, wallet) = self.owner_and_wallet(request.user_id, request.wallet_id).await?;

        let deposit = self.new_deposit(&user, &wallet, &plan, request.amount);
        let opening = DepositOpening {
            history: HistoryEntry::opened(&deposit, HistoryKind::from(request.source)),
            deposit,
            source: request.source,
        };
        self.store.open_deposit(&opening).await?;
        let deposit = opening.deposit;
        self.start_accrual(&deposit)?;

        if request.source == FundingSource::Balance {
            notify_best_effort(
                self.notifier.as_ref(),
                &recipient(&user),
                NotificationTemplate::DepositApproval,
                deposit.principal,
            )
            .await;
        }
        Ok(deposit)
    }

    /// Records a pending deposit and reserves its amount in the wallet's
    /// pending bucket.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::InvalidRequest`], [`AccrualError::PlanNotFound`],
    /// [`AccrualError::UserNotFound`] or [`AccrualError::WalletNotFound`].
    pub async fn submit_deposit(
        &self,
        request: SubmitDepositRequest,
    ) -> Result<PendingTransaction, AccrualError> {
        ensure_positive(request.amount)?;
        let plan = self.load_plan(&request.plan_name).await?;
        let (user, wallet) = self.owner_and_wallet(request.user_id, request.wallet_id).await?;

        let txn = PendingTransaction {
            id: TransactionId::new(),
            user_id: user.id,
            wallet_id: wallet.id,
            plan_name: Some(plan.name),
            amount: request.amount,
            transaction_type: TransactionType::Deposit,
            created_at: self.clock.now(),
        };
        self.store.submit_transaction(&txn).await?;
        tracing::info!(
            transaction_id = %txn.id,
            user_id = %txn.user_id,
            amount = %txn.amount,
            "deposit submitted for approval"
        );
        notify_best_effort(
            self.notifier.as_ref(),
            &recipient(&user),
            NotificationTemplate::DepositRequest,
            txn.amount,
        )
        .await;
        Ok(txn)
    }

    /// Drops a pending deposit or withdrawal and undoes its reservation: a
    /// deposit releases `pending_deposit`, a withdrawal refunds the balance.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::TransactionNotFound`] if it no longer exists.
    pub async fn cancel_pending_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<PendingTransaction, AccrualError> {
        let txn = self
            .store
            .cancel_transaction(transaction_id)
            .await?
            .ok_or(AccrualError::TransactionNotFound(*transaction_id.as_uuid()))?;
        tracing::info!(
            %transaction_id,
            kind = txn.transaction_type.as_str(),
            amount = %txn.amount,
            "pending transaction cancelled"
        );
        Ok(txn)
    }

    /// Records a withdrawal awaiting approval. The amount leaves the wallet
    /// balance immediately and is held in `pending_withdrawal`.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::InvalidRequest`],
    /// [`AccrualError::InsufficientFunds`] if the balance is short, or a
    /// lookup error.
    pub async fn submit_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> Result<PendingTransaction, AccrualError> {
        ensure_positive(request.amount)?;
        let (user, wallet) = self.owner_and_wallet(request.user_id, request.wallet_id).await?;

        let txn = PendingTransaction {
            id: TransactionId::new(),
            user_id: user.id,
            wallet_id: wallet.id,
            plan_name: None,
            amount: request.amount,
            transaction_type: TransactionType::Withdrawal,
            created_at: self.clock.now(),
        };
        self.store.submit_transaction(&txn).await?;
        tracing::info!(
            transaction_id = %txn.id,
            user_id = %txn.user_id,
            amount = %txn.amount,
            "withdrawal submitted for approval"
        );
        notify_best_effort(
            self.notifier.as_ref(),
            &recipient(&user),
            NotificationTemplate::WithdrawalRequest,
            txn.amount,
        )
        .await;
        Ok(txn)
    }

    /// Approves a pending withdrawal: releases the held amount, adds it to
    /// the currency's withdrawal total and writes a history row.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::TransactionNotFound`] (including when a
    /// concurrent approval won), [`AccrualError::InvalidRequest`] for a
    /// deposit, or a lookup error.
    pub async fn approve_withdrawal(
        &self,
        transaction_id: TransactionId,
    ) -> Result<PendingTransaction, AccrualError> {
        let txn = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(AccrualError::TransactionNotFound(*transaction_id.as_uuid()))?;
        if txn.transaction_type != TransactionType::Withdrawal {
            return Err(AccrualError::InvalidRequest(format!(
                "transaction {transaction_id} is a {}, not a withdrawal",
                txn.transaction_type.as_str()
            )));
        }
        let (user, wallet) = self.owner_and_wallet(txn.user_id, txn.wallet_id).await?;

        let approval = WithdrawalApproval {
            transaction_id,
            currency_id: wallet.currency_id,
            history: HistoryEntry::withdrawn(&txn, self.clock.now()),
        };
        let txn = self.store.approve_withdrawal(&approval).await?;
        tracing::info!(
            %transaction_id,
            user_id = %txn.user_id,
            amount = %txn.amount,
            "withdrawal approved"
        );
        notify_best_effort(
            self.notifier.as_ref(),
            &recipient(&user),
            NotificationTemplate::WithdrawalApproval,
            txn.amount,
        )
        .await;
        Ok(txn)
    }

    /// Approves a pending deposit: opens the deposit from the pending
    /// bucket, pays the referrer's one-time commission if the depositor was
    /// referred, and starts accruing.
    ///
    /// A missing referrer, or a referrer without a wallet in the deposit's
    /// currency, skips the commission with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::TransactionNotFound`] (including when a
    /// concurrent approval won), [`AccrualError::InvalidRequest`] for a
    /// withdrawal, [`AccrualError::InsufficientFunds`] if the wallet's
    /// pending bucket is short, or a lookup error.
    pub async fn approve_deposit(
        &self,
        transaction_id: TransactionId,
    ) -> Result<ActiveDeposit, AccrualError> {
        let txn = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(AccrualError::TransactionNotFound(*transaction_id.as_uuid()))?;
        if txn.transaction_type != TransactionType::Deposit {
            return Err(AccrualError::InvalidRequest(format!(
                "transaction {transaction_id} is a {}, not a deposit",
                txn.transaction_type.as_str()
            )));
        }
        let plan_name = txn.plan_name.as_deref().ok_or_else(|| {
            AccrualError::InvalidRequest(format!("deposit {transaction_id} names no plan"))
        })?;
        let plan = self.load_plan(plan_name).await?;
        let (user, wallet) = self.owner_and_wallet(txn.user_id, txn.wallet_id).await?;

        let deposit = self.new_deposit(&user, &wallet, &plan, txn.amount);
        let referral = self.referral_payout(&user, &wallet, &plan, &deposit).await?;
        let approval = DepositApproval {
            transaction_id,
            history: HistoryEntry::opened(&deposit, HistoryKind::Approval),
            deposit,
            referral,
        };
        self.store.approve_transaction(&approval).await?;
        let deposit = approval.deposit;
        self.start_accrual(&deposit)?;

        if let Some(payout) = approval.referral {
            let earning = payout.earning;
            self.event_bus.publish(AccrualEvent::ReferralCommissionPaid {
                deposit_id: deposit.id,
                referrer_id: earning.referrer_id,
                amount: earning.commission,
                timestamp: earning.paid_at,
            });
            tracing::info!(
                deposit_id = %deposit.id,
                referrer = %earning.referrer_username,
                commission = %earning.commission,
                "referral commission paid"
            );
            notify_best_effort(
                self.notifier.as_ref(),
                &Recipient {
                    user_id: earning.referrer_id,
                    username: earning.referrer_username,
                },
                NotificationTemplate::ReferralDeposit,
                earning.commission,
            )
            .await;
        }

        notify_best_effort(
            self.notifier.as_ref(),
            &recipient(&user),
            NotificationTemplate::DepositApproval,
            deposit.principal,
        )
        .await;
        Ok(deposit)
    }

    /// Restarts the timer of every active deposit that has none. Called once
    /// at start-up.
    pub async fn resume_all(&self) -> ResumeReport {
        self.resume.resume_all().await
    }

    /// Re-activates one deposit and restarts its timer.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::DepositNotFound`] or a store error.
    pub async fn resume_one(&self, deposit_id: DepositId) -> Result<ActiveDeposit, AccrualError> {
        self.resume.resume_one(deposit_id).await
    }

    /// Pauses a deposit: marks it suspended and stops its timer. It stays
    /// registered and is skipped by [`Self::resume_all`].
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::DepositNotFound`] or a store error.
    pub async fn suspend_deposit(
        &self,
        deposit_id: DepositId,
    ) -> Result<ActiveDeposit, AccrualError> {
        let deposit = self
            .store
            .set_deposit_status(deposit_id, DepositStatus::Suspended)
            .await?
            .ok_or(AccrualError::DepositNotFound(*deposit_id.as_uuid()))?;
        self.scheduler.cancel(deposit_id);
        self.event_bus.publish(AccrualEvent::DepositSuspended {
            deposit_id,
            timestamp: self.clock.now(),
        });
        tracing::info!(%deposit_id, "deposit suspended");
        Ok(deposit)
    }

    /// Fetches one active deposit.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::DepositNotFound`] or a store error.
    pub async fn get_active_deposit(
        &self,
        deposit_id: DepositId,
    ) -> Result<ActiveDeposit, AccrualError> {
        self.store
            .get_deposit(deposit_id)
            .await?
            .ok_or(AccrualError::DepositNotFound(*deposit_id.as_uuid()))
    }

    /// Lists active deposits passing `filter`, ordered by `sort`, one page
    /// at a time.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_active_deposits(
        &self,
        filter: &DepositFilter,
        sort: DepositSort,
        page: PageRequest,
    ) -> Result<Page<ActiveDeposit>, AccrualError> {
        let mut deposits = self.store.list_deposits(filter).await?;
        sort.apply(&mut deposits);
        Ok(Page::slice(deposits, page))
    }

    /// Earning rows of a deposit in tick order. Rows outlive settlement.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_earnings(
        &self,
        deposit_id: DepositId,
    ) -> Result<Vec<EarningRecord>, AccrualError> {
        self.store.list_earnings(deposit_id).await
    }

    /// History rows (deposit openings and approved withdrawals), newest
    /// first, optionally for one user, one page at a time.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_history(
        &self,
        user_id: Option<UserId>,
        page: PageRequest,
    ) -> Result<Page<HistoryEntry>, AccrualError> {
        let rows = self.store.list_history(user_id).await?;
        Ok(Page::slice(rows, page))
    }

    /// Stops every timer. Deposits stay registered and resume on the next
    /// start.
    pub fn shutdown(&self) {
        let stopped = self.scheduler.cancel_all();
        tracing::info!(stopped, "accrual timers stopped");
    }

    async fn load_plan(&self, name: &str) -> Result<Plan, AccrualError> {
        let plan = self
            .plans
            .get_plan(name)
            .await?
            .ok_or_else(|| AccrualError::PlanNotFound(name.to_string()))?;
        if !plan.is_schedulable() {
            return Err(AccrualError::InvalidRequest(format!(
                "plan {name} has no positive cycle and duration"
            )));
        }
        Ok(plan)
    }

    async fn owner_and_wallet(
        &self,
        user_id: UserId,
        wallet_id: WalletId,
    ) -> Result<(UserAccount, Wallet), AccrualError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AccrualError::UserNotFound(user_id.to_string()))?;
        let wallet = self
            .store
            .get_wallet(wallet_id)
            .await?
            .ok_or(AccrualError::WalletNotFound(*wallet_id.as_uuid()))?;
        if wallet.user_id != user.id {
            return Err(AccrualError::InvalidRequest(format!(
                "wallet {wallet_id} does not belong to user {user_id}"
            )));
        }
        Ok((user, wallet))
    }

    fn new_deposit(
        &self,
        user: &UserAccount,
        wallet: &Wallet,
        plan: &Plan,
        amount: Decimal,
    ) -> ActiveDeposit {
        ActiveDeposit::open(
            NewDeposit {
                user_id: user.id,
                username: user.username.clone(),
                wallet_id: wallet.id,
                currency_id: wallet.currency_id,
                symbol: wallet.symbol.clone(),
                principal: amount,
                referral_username: user.referred_by.clone(),
            },
            plan,
            self.clock.now(),
        )
    }

    async fn referral_payout(
        &self,
        user: &UserAccount,
        wallet: &Wallet,
        plan: &Plan,
        deposit: &ActiveDeposit,
    ) -> Result<Option<ReferralPayout>, AccrualError> {
        let Some(referrer_name) = user.referred_by.as_deref() else {
            return Ok(None);
        };
        let commission = percent_of(deposit.principal, plan.referral_commission_percent);
        if commission.is_zero() {
            return Ok(None);
        }
        let Some(referrer) = self.store.find_user_by_username(referrer_name).await? else {
            tracing::warn!(referrer = referrer_name, "referrer not found, commission skipped");
            return Ok(None);
        };
        let Some(referrer_wallet) = self.store.find_wallet(referrer.id, wallet.currency_id).await?
        else {
            tracing::warn!(
                referrer = referrer_name,
                currency_id = %wallet.currency_id,
                "referrer has no wallet in this currency, commission skipped"
            );
            return Ok(None);
        };

        Ok(Some(ReferralPayout {
            referrer_wallet_id: referrer_wallet.id,
            earning: ReferralEarning {
                id: EntryId::new(),
                deposit_id: deposit.id,
                referrer_id: referrer.id,
                referrer_username: referrer.username,
                referred_username: user.username.clone(),
                principal: deposit.principal,
                commission,
                symbol: deposit.symbol.clone(),
                paid_at: self.clock.now(),
            },
        }))
    }

    fn start_accrual(&self, deposit: &ActiveDeposit) -> Result<(), AccrualError> {
        let cycle = cycle_duration(deposit.cycle_length_ms).ok_or_else(|| {
            AccrualError::Internal(format!("deposit {} has no usable cycle", deposit.id))
        })?;
        self.scheduler.schedule(deposit.id, TimerPlan::regular(cycle));
        self.event_bus.publish(AccrualEvent::DepositOpened {
            deposit_id: deposit.id,
            user_id: deposit.user_id,
            plan_name: deposit.plan_name.clone(),
            principal: deposit.principal,
            timestamp: deposit.created_at,
        });
        tracing::info!(
            deposit_id = %deposit.id,
            user_id = %deposit.user_id,
            plan = %deposit.plan_name,
            principal = %deposit.principal,
            earning_per_cycle = %deposit.earning_per_cycle,
            "deposit opened"
        );
        Ok(())
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), AccrualError> {
    if amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(AccrualError::InvalidRequest(format!(
            "amount must be positive, got {amount}"
        )))
    }
}

fn recipient(user: &UserAccount) -> Recipient {
    Recipient {
        user_id: user.id,
        username: user.username.clone(),
    }
}
