//! Ledger entities owned by the surrounding platform and mutated by the
//! engine through delta-only operations.

use std::ops::Neg;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{CurrencyId, UserId, WalletId};

/// A user's balance aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// User identifier.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Contact address for notifications.
    pub email: String,
    /// Sum of wallet balances, kept in lock-step with wallet credits.
    pub total_balance: Decimal,
    /// Lifetime referral commission earned.
    pub commission: Decimal,
    /// Username of the user who referred this one.
    pub referred_by: Option<String>,
}

/// A single-currency wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet identifier.
    pub id: WalletId,
    /// Owner.
    pub user_id: UserId,
    /// Currency held.
    pub currency_id: CurrencyId,
    /// Display name (e.g. `"Tether"`).
    pub name: String,
    /// Currency symbol (e.g. `"USDT"`).
    pub symbol: String,
    /// Spendable balance.
    pub balance: Decimal,
    /// Lifetime deposits.
    pub total_deposit: Decimal,
    /// Deposits awaiting approval.
    pub pending_deposit: Decimal,
    /// Lifetime withdrawals.
    pub total_withdrawal: Decimal,
    /// Withdrawals awaiting approval.
    pub pending_withdrawal: Decimal,
}

/// Platform-wide totals for one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Currency identifier.
    pub id: CurrencyId,
    /// Display name.
    pub name: String,
    /// Symbol.
    pub symbol: String,
    /// Sum of all approved deposits.
    pub total_deposit: Decimal,
    /// Sum of all approved withdrawals.
    pub total_withdrawal: Decimal,
}

/// Aggregate field of a [`Currency`] that can be incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyField {
    /// [`Currency::total_deposit`].
    TotalDeposit,
    /// [`Currency::total_withdrawal`].
    TotalWithdrawal,
}

impl CurrencyField {
    /// Column name in the `currencies` table.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::TotalDeposit => "total_deposit",
            Self::TotalWithdrawal => "total_withdrawal",
        }
    }
}

/// Delta applied to a [`Wallet`]. Stores must apply every field as an
/// increment; there is no way to express an absolute overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletDelta {
    /// Change to `balance`.
    pub balance: Decimal,
    /// Change to `total_deposit`.
    pub total_deposit: Decimal,
    /// Change to `pending_deposit`.
    pub pending_deposit: Decimal,
    /// Change to `total_withdrawal`.
    pub total_withdrawal: Decimal,
    /// Change to `pending_withdrawal`.
    pub pending_withdrawal: Decimal,
}

impl WalletDelta {
    /// Credit or debit of the spendable balance only.
    #[must_use]
    pub fn balance(delta: Decimal) -> Self {
        Self {
            balance: delta,
            ..Self::default()
        }
    }

    /// Moves `amount` out of the balance into a withdrawal awaiting
    /// approval. The negated delta undoes it.
    #[must_use]
    pub fn withdrawal(amount: Decimal) -> Self {
        Self {
            balance: -amount,
            total_withdrawal: amount,
            pending_withdrawal: amount,
            ..Self::default()
        }
    }

    /// Applies the delta to an in-memory wallet.
    pub fn apply(&self, wallet: &mut Wallet) {
        wallet.balance += self.balance;
        wallet.total_deposit += self.total_deposit;
        wallet.pending_deposit += self.pending_deposit;
        wallet.total_withdrawal += self.total_withdrawal;
        wallet.pending_withdrawal += self.pending_withdrawal;
    }
}

impl Neg for WalletDelta {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            balance: -self.balance,
            total_deposit: -self.total_deposit,
            pending_deposit: -self.pending_deposit,
            total_withdrawal: -self.total_withdrawal,
            pending_withdrawal: -self.pending_withdrawal,
        }
    }
}
