//! Background task appending bus events to the `accrual_events` table.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::PostgresStore;
use crate::domain::{AccrualEvent, EventBus};

/// Subscribes to `bus` and writes every event to the event log until the
/// bus is dropped.
///
/// A failed insert is logged and skipped; the event log is an audit trail,
/// not the source of truth for balances.
#[must_use]
pub fn spawn_event_log(bus: &EventBus, store: Arc<PostgresStore>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => append(&store, &event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagged behind the bus");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("event bus closed, event log stopping");
                    break;
                }
            }
        }
    })
}

async fn append(store: &PostgresStore, event: &AccrualEvent) {
    let payload = match serde_json::to_value(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize accrual event");
            return;
        }
    };
    let deposit_id = event.deposit_id();
    if let Err(err) = store
        .save_event(deposit_id.into(), event.event_type_str(), &payload)
        .await
    {
        tracing::error!(
            %deposit_id,
            event_type = event.event_type_str(),
            error = %err,
            "failed to append accrual event"
        );
    }
}
