//! Rebuilding timers after a restart or an administrative resume.
//!
//! A deposit's progress lives entirely in the store (`remaining_duration_ms`
//! and `last_server_timestamp`). On resume the elapsed wall-clock time since
//! the last tick decides when the timer fires first and how many missed
//! cycles it makes up for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::scheduler::{AccrualScheduler, TimerPlan, cycle_duration};
use crate::domain::{AccrualEvent, ActiveDeposit, Clock, DepositId, DepositStatus, EventBus};
use crate::error::AccrualError;
use crate::persistence::AccrualStore;

/// How many ticks a deposit that slept through whole cycles makes up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpPolicy {
    /// Exactly one catch-up tick, however long the outage.
    #[default]
    SingleTick,
    /// One tick per whole missed cycle, never more than the deposit still
    /// owes.
    AllMissed,
}

impl CatchUpPolicy {
    /// Config representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SingleTick => "single",
            Self::AllMissed => "all_missed",
        }
    }

    /// Parses the config representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" | "single_tick" => Some(Self::SingleTick),
            "all_missed" | "all" => Some(Self::AllMissed),
            _ => None,
        }
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// Computes the timer of a deposit resumed at `now`, delayed by `stagger`.
///
/// Returns `None` if the deposit's cycle length cannot drive a timer.
#[must_use]
pub fn plan_resume(
    deposit: &ActiveDeposit,
    now: DateTime<Utc>,
    policy: CatchUpPolicy,
    stagger: Duration,
) -> Option<TimerPlan> {
    let cycle = cycle_duration(deposit.cycle_length_ms)?;
    let cycle_ms = deposit.cycle_length_ms;
    let elapsed_ms = (now - deposit.last_server_timestamp)
        .num_milliseconds()
        .max(0);

    if elapsed_ms < cycle_ms {
        return Some(TimerPlan {
            first_delay: stagger + millis(cycle_ms - elapsed_ms),
            catch_up_ticks: 1,
            cycle,
        });
    }

    // Catch-up ticks stamp `now`, so regular ticks run a full cycle after them.
    let missed = elapsed_ms / cycle_ms;
    let ticks = match policy {
        CatchUpPolicy::SingleTick => 1,
        CatchUpPolicy::AllMissed => missed.min(deposit.ticks_remaining()).max(1),
    };
    Some(TimerPlan {
        first_delay: stagger,
        catch_up_ticks: u32::try_from(ticks).unwrap_or(u32::MAX),
        cycle,
    })
}

/// Outcome of [`ResumeCoordinator::resume_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ResumeReport {
    /// Timers rebuilt.
    pub resumed: usize,
    /// Suspended deposits left alone.
    pub skipped: usize,
    /// Deposits whose timer was already live and kept its cadence.
    pub running: usize,
    /// Deposits found already matured and settled on the spot.
    pub settled: usize,
    /// Rows that could not be read, scheduled or settled.
    pub failed: usize,
}

/// Rebuilds accrual timers from the registry.
#[derive(Debug)]
pub struct ResumeCoordinator {
    store: Arc<dyn AccrualStore>,
    scheduler: Arc<AccrualScheduler>,
    event_bus: EventBus,
    clock: Clock,
    policy: CatchUpPolicy,
    stagger: Duration,
}

impl ResumeCoordinator {
    /// Creates a coordinator. `stagger` is added once per previously
    /// resumed deposit during [`Self::resume_all`].
    #[must_use]
    pub fn new(
        store: Arc<dyn AccrualStore>,
        scheduler: Arc<AccrualScheduler>,
        event_bus: EventBus,
        clock: Clock,
        policy: CatchUpPolicy,
        stagger: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            event_bus,
            clock,
            policy,
            stagger,
        }
    }

    /// Configured catch-up policy.
    #[must_use]
    pub const fn policy(&self) -> CatchUpPolicy {
        self.policy
    }

    /// Restarts the timer of every active deposit in the registry.
    ///
    /// The N-th resumed deposit (zero-based) is delayed by `N × stagger`.
    /// Suspended deposits and deposits whose timer is still live are
    /// skipped; deposits that already matured are settled immediately. A row
    /// that fails is logged and counted, and the pass continues.
    pub async fn resume_all(&self) -> ResumeReport {
        let mut report = ResumeReport::default();
        let mut deposits = self.store.stream_deposits();

        while let Some(row) = deposits.next().await {
            let deposit = match row {
                Ok(deposit) => deposit,
                Err(err) => {
                    tracing::error!(error = %err, "failed to read deposit during resume");
                    report.failed += 1;
                    continue;
                }
            };

            if deposit.status == DepositStatus::Suspended {
                tracing::debug!(deposit_id = %deposit.id, "skipping suspended deposit");
                report.skipped += 1;
                continue;
            }

            if self.scheduler.is_live(deposit.id) {
                tracing::debug!(deposit_id = %deposit.id, "timer already running");
                report.running += 1;
                continue;
            }

            if deposit.is_matured() {
                match self.scheduler.settle(deposit.id).await {
                    Ok(_) => report.settled += 1,
                    Err(err) => {
                        tracing::error!(
                            deposit_id = %deposit.id,
                            error = %err,
                            "settlement on resume failed"
                        );
                        report.failed += 1;
                    }
                }
                continue;
            }

            let factor = u32::try_from(report.resumed).unwrap_or(u32::MAX);
            let stagger = self.stagger.saturating_mul(factor);
            if self.start(&deposit, stagger) {
                report.resumed += 1;
            } else {
                report.failed += 1;
            }
        }

        tracing::info!(
            resumed = report.resumed,
            skipped = report.skipped,
            running = report.running,
            settled = report.settled,
            failed = report.failed,
            "active deposits resumed"
        );
        report
    }

    /// Re-activates one deposit and restarts its timer without stagger.
    /// A sleeping timer is replaced; one caught mid-tick or mid-settlement
    /// is left running so the in-flight write is not posted twice.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::DepositNotFound`] if the deposit is not
    /// registered, [`AccrualError::InvalidRequest`] if its cycle cannot
    /// drive a timer, or a store error.
    pub async fn resume_one(&self, deposit_id: DepositId) -> Result<ActiveDeposit, AccrualError> {
        let deposit = self
            .store
            .set_deposit_status(deposit_id, DepositStatus::Active)
            .await?
            .ok_or(AccrualError::DepositNotFound(*deposit_id.as_uuid()))?;
        if !self.scheduler.cancel_if_idle(deposit_id) {
            tracing::info!(%deposit_id, "timer busy, left running");
            return Ok(deposit);
        }

        if deposit.is_matured() {
            self.scheduler.settle(deposit_id).await?;
            return Ok(deposit);
        }
        if !self.start(&deposit, Duration::ZERO) {
            return Err(AccrualError::InvalidRequest(format!(
                "deposit {deposit_id} has a non-positive cycle length"
            )));
        }
        Ok(deposit)
    }

    fn start(&self, deposit: &ActiveDeposit, stagger: Duration) -> bool {
        let now = self.clock.now();
        let Some(plan) = plan_resume(deposit, now, self.policy, stagger) else {
            tracing::error!(
                deposit_id = %deposit.id,
                cycle_length_ms = deposit.cycle_length_ms,
                "cannot schedule deposit with non-positive cycle"
            );
            return false;
        };

        self.scheduler.schedule(deposit.id, plan);
        self.event_bus.publish(AccrualEvent::DepositResumed {
            deposit_id: deposit.id,
            catch_up_ticks: plan.catch_up_ticks,
            first_delay_ms: u64::try_from(plan.first_delay.as_millis()).unwrap_or(u64::MAX),
            timestamp: now,
        });
        tracing::info!(
            deposit_id = %deposit.id,
            first_delay_ms = plan.first_delay.as_millis(),
            catch_up_ticks = plan.catch_up_ticks,
            "deposit resumed"
        );
        true
    }
}
