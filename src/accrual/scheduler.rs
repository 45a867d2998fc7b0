//! Per-deposit accrual timers.
//!
//! [`AccrualScheduler`] owns one spawned task per active deposit. The task
//! loops sleep → tick, so ticks of one deposit are serialized by
//! construction. Each tick is one atomic [`AccrualStore::apply_tick`] call;
//! when the deposit matures the same task settles it and exits.
//!
//! Timers live in an explicit map keyed by [`DepositId`]. Every entry carries
//! a generation number and a `watch` cancellation signal. Cancelling only
//! interrupts a sleeping timer: a tick already in flight finishes, after
//! which the task notices it was superseded and stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::retry::RetryPolicy;
use crate::domain::{AccrualEvent, ActiveDeposit, Clock, DepositId, EventBus};
use crate::error::AccrualError;
use crate::notification::{NotificationSink, NotificationTemplate, Recipient, notify_best_effort};
use crate::persistence::{AccrualStore, TickPosted, TickPosting};

/// Lifecycle of a deposit's timer.
///
/// ```text
/// Scheduled ──> Ticking ──> Scheduled
///     │            │
///     └────────────┴──> Settling ──> Settled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepositPhase {
    /// Sleeping until the next tick.
    Scheduled,
    /// A tick is being posted.
    Ticking,
    /// Matured; settlement is running or waiting for a retry.
    Settling,
    /// Principal returned. Terminal.
    Settled,
}

impl DepositPhase {
    /// Returns `true` if moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Ticking | Self::Settling)
                | (Self::Ticking, Self::Scheduled | Self::Settling)
                | (Self::Settling, Self::Settled)
        )
    }
}

/// When a timer fires first and how it continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlan {
    /// Delay before the first firing.
    pub first_delay: Duration,
    /// Ticks posted back to back at the first firing.
    pub catch_up_ticks: u32,
    /// Period between firings after the first one.
    pub cycle: Duration,
}

impl TimerPlan {
    /// Plain periodic timer: one tick every `cycle`, starting one cycle
    /// from now.
    #[must_use]
    pub const fn regular(cycle: Duration) -> Self {
        Self {
            first_delay: cycle,
            catch_up_ticks: 1,
            cycle,
        }
    }
}

/// Converts a cycle length in milliseconds to a [`Duration`], rejecting
/// non-positive values.
#[must_use]
pub fn cycle_duration(cycle_length_ms: i64) -> Option<Duration> {
    u64::try_from(cycle_length_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    /// `None` once the deposit is settled.
    cancel: Option<watch::Sender<bool>>,
    phase: DepositPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Matured,
    Failed,
    Gone,
    Superseded,
}

/// Options that shape tick behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Backoff for transient store errors.
    pub retry: RetryPolicy,
    /// Send an `earning-payout` notification on every tick.
    pub notify_payouts: bool,
}

/// Owns the timer of every active deposit.
#[derive(Debug)]
pub struct AccrualScheduler {
    store: Arc<dyn AccrualStore>,
    notifier: Arc<dyn NotificationSink>,
    event_bus: EventBus,
    clock: Clock,
    options: SchedulerOptions,
    timers: Mutex<HashMap<DepositId, TimerEntry>>,
    generation: AtomicU64,
}

impl AccrualScheduler {
    /// Creates a scheduler with no timers.
    #[must_use]
    pub fn new(
        store: Arc<dyn AccrualStore>,
        notifier: Arc<dyn NotificationSink>,
        event_bus: EventBus,
        clock: Clock,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            store,
            notifier,
            event_bus,
            clock,
            options,
            timers: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<DepositId, TimerEntry>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the timer of `deposit_id`, replacing (and cancelling) any
    /// timer it already had.
    pub fn schedule(self: &Arc<Self>, deposit_id: DepositId, plan: TimerPlan) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let previous = self.timers().insert(
            deposit_id,
            TimerEntry {
                generation,
                cancel: Some(cancel_tx),
                phase: DepositPhase::Scheduled,
            },
        );
        if let Some(sender) = previous.and_then(|entry| entry.cancel) {
            let _ = sender.send(true);
        }

        tracing::debug!(
            %deposit_id,
            generation,
            first_delay_ms = plan.first_delay.as_millis(),
            catch_up_ticks = plan.catch_up_ticks,
            "timer scheduled"
        );
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler
                .run_timer(deposit_id, generation, plan, cancel_rx)
                .await;
        });
    }

    /// Stops the timer of `deposit_id`. Returns `true` if one was running.
    pub fn cancel(&self, deposit_id: DepositId) -> bool {
        let Some(entry) = self.timers().remove(&deposit_id) else {
            return false;
        };
        match entry.cancel {
            Some(sender) => {
                let _ = sender.send(true);
                tracing::debug!(%deposit_id, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Stops the timer of `deposit_id` unless a tick or settlement is in
    /// flight. Returns `false`, leaving the timer untouched, in that case.
    pub fn cancel_if_idle(&self, deposit_id: DepositId) -> bool {
        let mut timers = self.timers();
        if timers.get(&deposit_id).is_some_and(|entry| {
            matches!(entry.phase, DepositPhase::Ticking | DepositPhase::Settling)
        }) {
            return false;
        }
        if let Some(sender) = timers.remove(&deposit_id).and_then(|entry| entry.cancel) {
            let _ = sender.send(true);
            tracing::debug!(%deposit_id, "timer cancelled");
        }
        true
    }

    /// Returns `true` if `deposit_id` has a timer that has not settled.
    #[must_use]
    pub fn is_live(&self, deposit_id: DepositId) -> bool {
        self.phase(deposit_id).is_some_and(|phase| phase != DepositPhase::Settled)
    }

    /// Stops every timer. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.timers());
        entries
            .into_values()
            .filter_map(|entry| entry.cancel)
            .map(|sender| sender.send(true))
            .count()
    }

    /// Current phase of `deposit_id`, or `None` if it has no timer.
    #[must_use]
    pub fn phase(&self, deposit_id: DepositId) -> Option<DepositPhase> {
        self.timers().get(&deposit_id).map(|entry| entry.phase)
    }

    /// Number of deposits with a live (not yet settled) timer.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.timers()
            .values()
            .filter(|entry| entry.phase != DepositPhase::Settled)
            .count()
    }

    /// Moves the timer of `generation` to `next`. Fails if the timer was
    /// replaced, cancelled or the transition is not allowed.
    fn transition(&self, deposit_id: DepositId, generation: u64, next: DepositPhase) -> bool {
        let mut timers = self.timers();
        match timers.get_mut(&deposit_id) {
            Some(entry) if entry.generation == generation => {
                if entry.phase.can_transition_to(next) {
                    entry.phase = next;
                    true
                } else {
                    tracing::warn!(
                        %deposit_id,
                        from = ?entry.phase,
                        to = ?next,
                        "rejected timer phase transition"
                    );
                    false
                }
            }
            _ => false,
        }
    }

    fn forget(&self, deposit_id: DepositId, generation: u64) {
        let mut timers = self.timers();
        if timers
            .get(&deposit_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            timers.remove(&deposit_id);
        }
    }

    fn mark_settled(&self, deposit_id: DepositId) {
        let mut timers = self.timers();
        let entry = timers.entry(deposit_id).or_insert(TimerEntry {
            generation: 0,
            cancel: None,
            phase: DepositPhase::Settled,
        });
        entry.phase = DepositPhase::Settled;
        entry.cancel = None;
    }

    async fn run_timer(
        self: Arc<Self>,
        deposit_id: DepositId,
        generation: u64,
        plan: TimerPlan,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut delay = plan.first_delay;
        let mut burst = plan.catch_up_ticks.max(1);
        let mut matured = false;

        loop {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = cancel.changed() => return,
            }
            if *cancel.borrow() {
                return;
            }

            if !matured {
                for _ in 0..burst {
                    match self.tick(deposit_id, generation).await {
                        TickOutcome::Continue | TickOutcome::Failed => {}
                        TickOutcome::Matured => {
                            matured = true;
                            break;
                        }
                        TickOutcome::Gone => {
                            self.forget(deposit_id, generation);
                            return;
                        }
                        TickOutcome::Superseded => return,
                    }
                }
            }

            if matured {
                match self.settle(deposit_id).await {
                    Ok(_) => return,
                    Err(err) => {
                        tracing::error!(
                            %deposit_id,
                            error = %err,
                            "settlement failed, retrying after one cycle"
                        );
                        delay = plan.cycle;
                        continue;
                    }
                }
            }

            burst = 1;
            delay = plan.cycle;
        }
    }

    async fn tick(&self, deposit_id: DepositId, generation: u64) -> TickOutcome {
        if !self.transition(deposit_id, generation, DepositPhase::Ticking) {
            return TickOutcome::Superseded;
        }

        let posting = TickPosting::new(deposit_id, self.clock.now());
        let result = self
            .options
            .retry
            .run(|| self.store.apply_tick(&posting))
            .await;

        match result {
            Ok(Some(receipt)) => {
                let deposit = receipt.deposit;
                match receipt.posted {
                    TickPosted::Credited(record) => {
                        self.event_bus.publish(AccrualEvent::EarningCredited {
                            deposit_id,
                            amount: record.amount,
                            accumulated_earning: deposit.accumulated_earning,
                            remaining_duration_ms: deposit.remaining_duration_ms,
                            timestamp: posting.tick_at,
                        });
                        tracing::info!(
                            %deposit_id,
                            amount = %record.amount,
                            accumulated = %deposit.accumulated_earning,
                            remaining_ms = deposit.remaining_duration_ms,
                            "earning credited"
                        );
                        if self.options.notify_payouts {
                            notify_best_effort(
                                self.notifier.as_ref(),
                                &recipient_of(&deposit),
                                NotificationTemplate::EarningPayout,
                                record.amount,
                            )
                            .await;
                        }
                    }
                    TickPosted::Replayed(_) => {
                        tracing::debug!(%deposit_id, "tick already posted");
                    }
                    TickPosted::AlreadyMatured => {
                        tracing::warn!(%deposit_id, "tick refused, deposit already matured");
                    }
                }

                if deposit.is_matured() {
                    self.transition(deposit_id, generation, DepositPhase::Settling);
                    TickOutcome::Matured
                } else {
                    self.transition(deposit_id, generation, DepositPhase::Scheduled);
                    TickOutcome::Continue
                }
            }
            Ok(None) => {
                tracing::warn!(%deposit_id, "deposit no longer registered, stopping timer");
                TickOutcome::Gone
            }
            Err(err) => {
                tracing::error!(
                    %deposit_id,
                    tick_at = %posting.tick_at,
                    error = %err,
                    "tick failed after retries"
                );
                self.event_bus.publish(AccrualEvent::TickFailed {
                    deposit_id,
                    tick_at: posting.tick_at,
                    reason: err.to_string(),
                    timestamp: self.clock.now(),
                });
                self.transition(deposit_id, generation, DepositPhase::Scheduled);
                TickOutcome::Failed
            }
        }
    }

    /// Removes a matured deposit and returns its principal.
    ///
    /// Safe to call more than once: only the call that actually removes the
    /// row credits the principal and sends the completion notification.
    /// Any sleeping timer of the deposit stops.
    ///
    /// # Errors
    ///
    /// Returns the store error once retries are exhausted; nothing is
    /// credited in that case.
    pub async fn settle(
        &self,
        deposit_id: DepositId,
    ) -> Result<Option<ActiveDeposit>, AccrualError> {
        let settled = self
            .options
            .retry
            .run(|| self.store.settle_deposit(deposit_id))
            .await?;
        self.mark_settled(deposit_id);

        let Some(deposit) = settled else {
            tracing::debug!(%deposit_id, "deposit already settled");
            return Ok(None);
        };

        self.event_bus.publish(AccrualEvent::DepositSettled {
            deposit_id,
            principal: deposit.principal,
            total_earning: deposit.accumulated_earning,
            timestamp: self.clock.now(),
        });
        tracing::info!(
            %deposit_id,
            principal = %deposit.principal,
            total_earning = %deposit.accumulated_earning,
            "deposit settled"
        );
        notify_best_effort(
            self.notifier.as_ref(),
            &recipient_of(&deposit),
            NotificationTemplate::InvestmentCompletion,
            deposit.principal,
        )
        .await;
        Ok(Some(deposit))
    }
}

fn recipient_of(deposit: &ActiveDeposit) -> Recipient {
    Recipient {
        user_id: deposit.user_id,
        username: deposit.username.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{
        Currency, CurrencyId, MS_PER_DAY, NewDeposit, Plan, UserAccount, UserId, Wallet, WalletId,
    };
    use crate::notification::RecordingNotifier;
    use crate::persistence::MemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const DAY: Duration = Duration::from_millis(MS_PER_DAY as u64);

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        bus: EventBus,
        scheduler: Arc<AccrualScheduler>,
        clock: Clock,
        user_id: UserId,
        wallet_id: WalletId,
        currency_id: CurrencyId,
    }

    async fn harness(retry: RetryPolicy) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = EventBus::new(1024);
        let clock = Clock::system();
        let user_id = UserId::new();
        let currency_id = CurrencyId::new();
        let wallet_id = WalletId::new();
        store
            .put_user(UserAccount {
                id: user_id,
                username: "carol".to_string(),
                email: "carol@example.com".to_string(),
                total_balance: Decimal::ZERO,
                commission: Decimal::ZERO,
                referred_by: None,
            })
            .await;
        store
            .put_currency(Currency {
                id: currency_id,
                name: "Tether".to_string(),
                symbol: "USDT".to_string(),
                total_deposit: Decimal::ZERO,
                total_withdrawal: Decimal::ZERO,
            })
            .await;
        store
            .put_wallet(Wallet {
                id: wallet_id,
                user_id,
                currency_id,
                name: "Tether".to_string(),
                symbol: "USDT".to_string(),
                balance: Decimal::ZERO,
                total_deposit: Decimal::ZERO,
                pending_deposit: Decimal::ZERO,
                total_withdrawal: Decimal::ZERO,
                pending_withdrawal: Decimal::ZERO,
            })
            .await;
        let scheduler = Arc::new(AccrualScheduler::new(
            Arc::clone(&store) as Arc<dyn AccrualStore>,
            Arc::clone(&notifier) as Arc<dyn NotificationSink>,
            bus.clone(),
            clock,
            SchedulerOptions {
                retry,
                notify_payouts: false,
            },
        ));
        Harness {
            store,
            notifier,
            bus,
            scheduler,
            clock,
            user_id,
            wallet_id,
            currency_id,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    async fn open(
        h: &Harness,
        principal: Decimal,
        cycle_days: i64,
        duration_days: i64,
    ) -> ActiveDeposit {
        let plan = Plan {
            name: "daily".to_string(),
            percentage: dec!(2),
            cycle_length_ms: cycle_days * MS_PER_DAY,
            duration_days,
            referral_commission_percent: Decimal::ZERO,
        };
        let deposit = ActiveDeposit::open(
            NewDeposit {
                user_id: h.user_id,
                username: "carol".to_string(),
                wallet_id: h.wallet_id,
                currency_id: h.currency_id,
                symbol: "USDT".to_string(),
                principal,
                referral_username: None,
            },
            &plan,
            h.clock.now(),
        );
        tokio_test::assert_ok!(h.store.insert_deposit(&deposit).await);
        deposit
    }

    async fn wallet_balance(h: &Harness) -> Decimal {
        let Ok(Some(wallet)) = h.store.get_wallet(h.wallet_id).await else {
            panic!("wallet missing");
        };
        wallet.balance
    }

    #[test]
    fn phase_transitions() {
        use DepositPhase::{Scheduled, Settled, Settling, Ticking};
        assert!(Scheduled.can_transition_to(Ticking));
        assert!(Ticking.can_transition_to(Scheduled));
        assert!(Ticking.can_transition_to(Settling));
        assert!(Scheduled.can_transition_to(Settling));
        assert!(Settling.can_transition_to(Settled));
        assert!(!Settled.can_transition_to(Scheduled));
        assert!(!Settling.can_transition_to(Ticking));
        assert!(!Scheduled.can_transition_to(Settled));
    }

    #[test]
    fn cycle_duration_rejects_non_positive() {
        assert_eq!(cycle_duration(1_500), Some(Duration::from_millis(1_500)));
        assert_eq!(cycle_duration(0), None);
        assert_eq!(cycle_duration(-5), None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_plan_pays_out_and_settles_once() {
        let h = harness(RetryPolicy::none()).await;
        let mut events = h.bus.subscribe();
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));

        tokio::time::sleep(DAY * 10 + Duration::from_secs(1)).await;

        assert_eq!(wallet_balance(&h).await, dec!(1200));
        let Ok(earnings) = h.store.list_earnings(deposit.id).await else {
            panic!("earnings failed");
        };
        assert_eq!(earnings.len(), 10);
        assert!(earnings.iter().all(|e| e.amount == dec!(20)));
        assert!(matches!(h.store.get_deposit(deposit.id).await, Ok(None)));
        assert_eq!(h.scheduler.phase(deposit.id), Some(DepositPhase::Settled));
        assert_eq!(h.scheduler.active_timers(), 0);

        let completions = h.notifier.sent_with(NotificationTemplate::InvestmentCompletion);
        assert_eq!(completions.len(), 1);
        assert!(
            completions
                .first()
                .is_some_and(|n| n.amount == dec!(1000))
        );

        let mut credited = 0;
        let mut settled = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                AccrualEvent::EarningCredited { .. } => credited += 1,
                AccrualEvent::DepositSettled { .. } => settled += 1,
                _ => {}
            }
        }
        assert_eq!((credited, settled), (10, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn earnings_sum_matches_accumulated() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));

        tokio::time::sleep(DAY * 3 + DAY / 2).await;

        let Ok(Some(current)) = h.store.get_deposit(deposit.id).await else {
            panic!("deposit missing");
        };
        let Ok(earnings) = h.store.list_earnings(deposit.id).await else {
            panic!("earnings failed");
        };
        let total: Decimal = earnings.iter().map(|e| e.amount).sum();
        assert_eq!(total, current.accumulated_earning);
        assert_eq!(total, dec!(60));
        assert_eq!(current.remaining_duration_ms, 7 * MS_PER_DAY);
        assert!(current.last_server_timestamp > deposit.last_server_timestamp);
        assert_eq!(h.scheduler.phase(deposit.id), Some(DepositPhase::Scheduled));
    }

    #[tokio::test(start_paused = true)]
    async fn uneven_cycles_settle_when_remaining_goes_negative() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 3, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY * 3));

        tokio::time::sleep(DAY * 12 + Duration::from_secs(1)).await;

        let Ok(earnings) = h.store.list_earnings(deposit.id).await else {
            panic!("earnings failed");
        };
        assert_eq!(earnings.len(), 4);
        assert_eq!(wallet_balance(&h).await, dec!(1080));
        assert!(matches!(h.store.get_deposit(deposit.id).await, Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_within_a_tick() {
        let h = harness(fast_retry(5)).await;
        let mut events = h.bus.subscribe();
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.store.fail_next_ticks(2);
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));

        tokio::time::sleep(DAY + Duration::from_secs(1)).await;

        assert_eq!(wallet_balance(&h).await, dec!(20));
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, AccrualEvent::TickFailed { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_open() {
        let h = harness(fast_retry(2)).await;
        let mut events = h.bus.subscribe();
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.store.fail_next_ticks(2);
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));

        tokio::time::sleep(DAY * 2 + Duration::from_secs(1)).await;

        let Ok(Some(current)) = h.store.get_deposit(deposit.id).await else {
            panic!("deposit missing");
        };
        assert_eq!(current.remaining_duration_ms, 9 * MS_PER_DAY);
        assert_eq!(current.accumulated_earning, dec!(20));

        let mut failed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AccrualEvent::TickFailed { .. }) {
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_a_sleeping_timer() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));
        assert!(h.scheduler.cancel(deposit.id));
        assert!(!h.scheduler.cancel(deposit.id));

        tokio::time::sleep(DAY * 3).await;

        assert!(wallet_balance(&h).await.is_zero());
        assert_eq!(h.scheduler.phase(deposit.id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));

        tokio::time::sleep(DAY + Duration::from_secs(1)).await;

        assert_eq!(wallet_balance(&h).await, dec!(20));
        assert_eq!(h.scheduler.active_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_if_idle_spares_a_busy_timer() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));
        assert!(h.scheduler.is_live(deposit.id));

        if let Some(entry) = h.scheduler.timers().get_mut(&deposit.id) {
            entry.phase = DepositPhase::Ticking;
        }
        assert!(!h.scheduler.cancel_if_idle(deposit.id));
        assert_eq!(h.scheduler.phase(deposit.id), Some(DepositPhase::Ticking));

        if let Some(entry) = h.scheduler.timers().get_mut(&deposit.id) {
            entry.phase = DepositPhase::Scheduled;
        }
        assert!(h.scheduler.cancel_if_idle(deposit.id));
        assert!(!h.scheduler.is_live(deposit.id));
        assert!(h.scheduler.cancel_if_idle(deposit.id));
    }

    #[tokio::test(start_paused = true)]
    async fn catch_up_burst_posts_several_ticks() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(
            deposit.id,
            TimerPlan {
                first_delay: Duration::ZERO,
                catch_up_ticks: 3,
                cycle: DAY,
            },
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(wallet_balance(&h).await, dec!(60));

        // The burst counts as one firing: the next tick is a full cycle on.
        tokio::time::sleep(DAY - Duration::from_secs(2)).await;
        assert_eq!(wallet_balance(&h).await, dec!(60));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(wallet_balance(&h).await, dec!(80));
    }

    #[tokio::test(start_paused = true)]
    async fn matured_deposit_settles_without_extra_payout() {
        let h = harness(RetryPolicy::none()).await;
        let mut deposit = open(&h, dec!(1000), 1, 10).await;
        let _ = h.store.remove_deposit(deposit.id).await;
        deposit.remaining_duration_ms = 0;
        deposit.accumulated_earning = dec!(200);
        tokio_test::assert_ok!(h.store.insert_deposit(&deposit).await);
        h.scheduler.schedule(
            deposit.id,
            TimerPlan {
                first_delay: Duration::ZERO,
                catch_up_ticks: 3,
                cycle: DAY,
            },
        );

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(wallet_balance(&h).await, dec!(1000));
        let Ok(earnings) = h.store.list_earnings(deposit.id).await else {
            panic!("earnings failed");
        };
        assert!(earnings.is_empty());
        assert_eq!(h.scheduler.phase(deposit.id), Some(DepositPhase::Settled));
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_deposit_stops_the_timer() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.scheduler.schedule(deposit.id, TimerPlan::regular(DAY));
        let _ = h.store.remove_deposit(deposit.id).await;

        tokio::time::sleep(DAY * 2).await;

        assert_eq!(h.scheduler.phase(deposit.id), None);
        assert!(wallet_balance(&h).await.is_zero());
    }

    #[tokio::test]
    async fn settle_is_idempotent() {
        let h = harness(RetryPolicy::none()).await;
        let deposit = open(&h, dec!(1000), 1, 10).await;

        let Ok(first) = h.scheduler.settle(deposit.id).await else {
            panic!("settle failed");
        };
        let Ok(second) = h.scheduler.settle(deposit.id).await else {
            panic!("settle failed");
        };
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(wallet_balance(&h).await, dec!(1000));
        assert_eq!(
            h.notifier
                .sent_with(NotificationTemplate::InvestmentCompletion)
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn payout_notifications_are_opt_in() {
        let h = harness(RetryPolicy::none()).await;
        let scheduler = Arc::new(AccrualScheduler::new(
            Arc::clone(&h.store) as Arc<dyn AccrualStore>,
            Arc::clone(&h.notifier) as Arc<dyn NotificationSink>,
            h.bus.clone(),
            h.clock,
            SchedulerOptions {
                retry: RetryPolicy::none(),
                notify_payouts: true,
            },
        ));
        let deposit = open(&h, dec!(1000), 1, 10).await;
        h.notifier.set_failing(true);
        scheduler.schedule(deposit.id, TimerPlan::regular(DAY));

        tokio::time::sleep(DAY * 2 + Duration::from_secs(1)).await;

        assert_eq!(
            h.notifier.sent_with(NotificationTemplate::EarningPayout).len(),
            2
        );
        assert_eq!(wallet_balance(&h).await, dec!(40));
    }
}
