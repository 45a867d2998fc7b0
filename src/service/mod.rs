//! Service layer: business logic orchestration.
//!
//! [`DepositService`] validates requests against reference data, performs
//! one atomic store operation per request, drives the accrual scheduler and
//! emits events through the [`super::domain::EventBus`].

pub mod deposit_service;

pub use deposit_service::{
    CreateDepositRequest, DepositService, EngineSettings, SubmitDepositRequest, WithdrawalRequest,
};
