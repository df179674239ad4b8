use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// The various events emitted by the payment and entitlement lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentInitiated {
        transaction_id: Uuid,
        order_id: String,
        user_id: Uuid,
        book_id: Uuid,
        amount: Decimal,
    },
    PaymentCompleted {
        transaction_id: Uuid,
        order_id: String,
        book_id: Uuid,
    },
    PaymentFailed {
        transaction_id: Uuid,
        order_id: String,
        reason: Option<String>,
    },
    PaymentRefunded {
        transaction_id: Uuid,
        order_id: String,
    },
    FreeGrantIssued {
        transaction_id: Uuid,
        user_id: Uuid,
        book_id: Uuid,
    },
    DownloadRedeemed {
        transaction_id: Uuid,
        remaining_downloads: i32,
    },
    // Audit trail for destructive admin operations; emitted before the
    // record disappears.
    TransactionDeleted {
        transaction_id: Uuid,
        actor_id: Uuid,
        prior_status: String,
        forced: bool,
        deleted_at: DateTime<Utc>,
    },
    FailedTransactionsCleaned {
        actor_id: Uuid,
        removed: u64,
        older_than_days: i64,
    },
}

/// Drains the event channel, logging each event. Runs for the lifetime of
/// the process.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentInitiated {
                transaction_id,
                order_id,
                amount,
                ..
            } => {
                info!(%transaction_id, %order_id, %amount, "payment initiated");
            }
            Event::PaymentCompleted {
                transaction_id,
                order_id,
                ..
            } => {
                info!(%transaction_id, %order_id, "payment completed");
            }
            Event::PaymentFailed {
                transaction_id,
                order_id,
                reason,
            } => {
                warn!(%transaction_id, %order_id, reason = ?reason, "payment failed");
            }
            Event::PaymentRefunded {
                transaction_id,
                order_id,
            } => {
                info!(%transaction_id, %order_id, "payment refunded");
            }
            Event::FreeGrantIssued {
                transaction_id,
                user_id,
                book_id,
            } => {
                info!(%transaction_id, %user_id, %book_id, "free download grant issued");
            }
            Event::DownloadRedeemed {
                transaction_id,
                remaining_downloads,
            } => {
                info!(%transaction_id, remaining_downloads, "download redeemed");
            }
            Event::TransactionDeleted {
                transaction_id,
                actor_id,
                prior_status,
                forced,
                deleted_at,
            } => {
                // Audit line: actor, timestamp, and prior state survive the
                // record's removal in the logs.
                info!(
                    %transaction_id,
                    %actor_id,
                    prior_status = %prior_status,
                    forced,
                    deleted_at = %deleted_at,
                    "transaction deleted by admin"
                );
            }
            Event::FailedTransactionsCleaned {
                actor_id,
                removed,
                older_than_days,
            } => {
                info!(%actor_id, removed, older_than_days, "failed transactions cleaned up");
            }
        }
    }

    info!("Event processing loop stopped");
}
