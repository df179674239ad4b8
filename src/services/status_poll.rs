use crate::{
    entities::transaction::PaymentStatus,
    errors::ServiceError,
    services::payments::{PaymentService, ReconcileSource},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Terminal outcome of a bounded polling run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Failed,
    /// Attempts exhausted while still pending; the webhook may still land
    /// independently
    TimedOut,
}

/// Bounded reconciliation poller: the server-side rendering of the client
/// polling contract. Polls at a fixed interval for a capped number of
/// attempts, then reports TimedOut instead of looping forever.
pub struct StatusPoller {
    payments: Arc<PaymentService>,
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(payments: Arc<PaymentService>) -> Self {
        Self {
            payments,
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn poll(&self, order_id: &str) -> Result<PollOutcome, ServiceError> {
        for attempt in 1..=self.max_attempts {
            match self.payments.reconcile(order_id, ReconcileSource::Poll).await {
                Ok(txn) => match txn.status() {
                    PaymentStatus::Completed | PaymentStatus::Refunded => {
                        return Ok(PollOutcome::Completed);
                    }
                    PaymentStatus::Failed => return Ok(PollOutcome::Failed),
                    PaymentStatus::Pending => {
                        debug!(attempt, "payment still pending");
                    }
                },
                // Gateway blips are retryable from the caller's side; the
                // remaining attempts are that retry budget. Anything else
                // aborts the poll.
                Err(ServiceError::GatewayUnavailable(reason)) => {
                    warn!(attempt, %reason, "gateway unavailable during poll");
                }
                Err(err) => return Err(err),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Ok(PollOutcome::TimedOut)
    }
}
