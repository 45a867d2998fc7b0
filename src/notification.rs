//! Outbound user notifications.
//!
//! The engine only triggers notifications; rendering and delivery belong to
//! whatever implements [`NotificationSink`]. Every call is best effort: a
//! failure is logged and never reverses the financial mutation that caused
//! it.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::UserId;
use crate::error::AccrualError;

/// Message template, identified by the key the delivery side looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationTemplate {
    /// A pending deposit was submitted.
    DepositRequest,
    /// A deposit was opened, by auto-transact or approval.
    DepositApproval,
    /// A referred user's deposit paid the recipient a commission.
    ReferralDeposit,
    /// A tick credited an earning.
    EarningPayout,
    /// A deposit matured and its principal was returned.
    InvestmentCompletion,
    /// A withdrawal was submitted.
    WithdrawalRequest,
    /// A withdrawal was approved.
    WithdrawalApproval,
}

impl NotificationTemplate {
    /// Template key.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::DepositRequest => "deposit",
            Self::DepositApproval => "deposit-approval",
            Self::ReferralDeposit => "referral-deposit",
            Self::EarningPayout => "earning-payout",
            Self::InvestmentCompletion => "investment-completion",
            Self::WithdrawalRequest => "withdrawal",
            Self::WithdrawalApproval => "withdrawal-approval",
        }
    }
}

impl fmt::Display for NotificationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Who a notification goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    /// User id.
    pub user_id: UserId,
    /// Username.
    pub username: String,
}

/// Delivery side of notifications.
#[async_trait]
pub trait NotificationSink: fmt::Debug + Send + Sync {
    /// Sends `template` to `recipient` about `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`AccrualError::Notification`] if delivery failed.
    async fn notify(
        &self,
        recipient: &Recipient,
        template: NotificationTemplate,
        amount: Decimal,
    ) -> Result<(), AccrualError>;
}

/// Sends a notification and logs instead of propagating a failure.
pub async fn notify_best_effort(
    sink: &dyn NotificationSink,
    recipient: &Recipient,
    template: NotificationTemplate,
    amount: Decimal,
) {
    if let Err(err) = sink.notify(recipient, template, amount).await {
        tracing::warn!(
            user_id = %recipient.user_id,
            template = template.key(),
            %amount,
            error = %err,
            "notification failed"
        );
    }
}

/// Sink that only writes a log line. Used when no delivery backend is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        template: NotificationTemplate,
        amount: Decimal,
    ) -> Result<(), AccrualError> {
        tracing::info!(
            user_id = %recipient.user_id,
            username = %recipient.username,
            template = template.key(),
            %amount,
            "notification dispatched"
        );
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Recipient.
    pub recipient: Recipient,
    /// Template.
    pub template: NotificationTemplate,
    /// Amount.
    pub amount: Decimal,
}

/// Sink that keeps every notification in memory, optionally failing each
/// delivery after recording it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Recorded notifications using `template`.
    #[must_use]
    pub fn sent_with(&self, template: NotificationTemplate) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        template: NotificationTemplate,
        amount: Decimal,
    ) -> Result<(), AccrualError> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(SentNotification {
                recipient: recipient.clone(),
                template,
                amount,
            });
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccrualError::Notification(format!(
                "delivery of {template} failed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn recipient() -> Recipient {
        Recipient {
            user_id: UserId::new(),
            username: "bob".to_string(),
        }
    }

    #[test]
    fn template_keys() {
        assert_eq!(NotificationTemplate::DepositRequest.key(), "deposit");
        assert_eq!(NotificationTemplate::DepositApproval.key(), "deposit-approval");
        assert_eq!(NotificationTemplate::ReferralDeposit.key(), "referral-deposit");
        assert_eq!(
            NotificationTemplate::InvestmentCompletion.to_string(),
            "investment-completion"
        );
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let sink = RecordingNotifier::new();
        sink.set_failing(true);
        notify_best_effort(
            &sink,
            &recipient(),
            NotificationTemplate::EarningPayout,
            dec!(20),
        )
        .await;
        assert_eq!(sink.sent_with(NotificationTemplate::EarningPayout).len(), 1);
    }
}
