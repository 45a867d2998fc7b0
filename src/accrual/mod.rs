//! Accrual engine: per-deposit timers, settlement and resumption.
//!
//! - [`scheduler::AccrualScheduler`] runs one timer per active deposit,
//!   posts ticks and settles matured deposits.
//! - [`resume::ResumeCoordinator`] rebuilds timers from the registry after a
//!   restart or an administrative resume.
//! - [`retry::RetryPolicy`] bounds retries of transient store failures.

pub mod resume;
pub mod retry;
pub mod scheduler;

pub use resume::{CatchUpPolicy, ResumeCoordinator, ResumeReport, plan_resume};
pub use retry::RetryPolicy;
pub use scheduler::{AccrualScheduler, DepositPhase, SchedulerOptions, TimerPlan};
