//! Domain layer: deposit model, ledger entities, events and time.
//!
//! This module contains the engine's data model: the [`ActiveDeposit`]
//! aggregate and its invariants, the append-only earning rows, the ledger
//! entities the engine credits through deltas, the event bus for
//! broadcasting state changes, and the monotonic [`Clock`].

pub mod account;
pub mod accrual_event;
pub mod active_deposit;
pub mod clock;
pub mod earning;
pub mod event_bus;
pub mod ids;
pub mod money;
pub mod plan;
pub mod query;
pub mod transaction;

pub use account::{Currency, CurrencyField, UserAccount, Wallet, WalletDelta};
pub use accrual_event::AccrualEvent;
pub use active_deposit::{ActiveDeposit, DepositStatus, NewDeposit};
pub use clock::Clock;
pub use earning::{EarningRecord, ReferralEarning};
pub use event_bus::EventBus;
pub use ids::{CurrencyId, DepositId, EntryId, TransactionId, UserId, WalletId};
pub use money::percent_of;
pub use plan::{MS_PER_DAY, Plan};
pub use query::{DepositFilter, DepositSort, Page, PageRequest};
pub use transaction::{FundingSource, HistoryEntry, HistoryKind, PendingTransaction, TransactionType};
