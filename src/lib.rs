//! # deposit-accrual
//!
//! Accrual engine for fixed-term investment deposits.
//!
//! Users commit a principal to a plan (percentage, cycle length, duration).
//! Every cycle the engine credits `principal × percentage / 100` to the
//! user's wallet and records an earning row. When the plan's duration is
//! used up it returns the principal and retires the deposit. All progress
//! lives in the store, so after a restart every deposit picks up where it
//! left off.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── DepositService (service/)
//!     ├── EventBus (domain/) ──► event log (persistence/)
//!     │
//!     ├── AccrualScheduler + ResumeCoordinator (accrual/)
//!     ├── NotificationSink (notification)
//!     │
//!     └── AccrualStore: PostgreSQL or in-memory (persistence/)
//! ```

pub mod accrual;
pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod notification;
pub mod persistence;
pub mod service;
