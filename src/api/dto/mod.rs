//! Data Transfer Objects for REST request/response serialization.
//!
//! All monetary amounts are serialized as JSON strings to prevent
//! precision loss.

pub mod common_dto;
pub mod deposit_dto;
pub mod transaction_dto;

pub use common_dto::*;
pub use deposit_dto::*;
pub use transaction_dto::*;
