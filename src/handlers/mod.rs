pub mod admin_transactions;
pub mod common;
pub mod payment_webhooks;
pub mod payments;

use crate::config::DownloadConfig;
use crate::events::EventSender;
use crate::services::{
    admin_transactions::AdminTransactionService, downloads::DownloadService,
    payments::PaymentService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Service constructors shared by the handler modules. Services are cheap to
/// build per request; they borrow the pooled connection and channels from
/// the app state.
pub(crate) fn payment_service(state: &AppState) -> PaymentService {
    PaymentService::new(
        state.db.clone(),
        state.gateway.clone(),
        Arc::new(state.event_sender.clone()),
        download_config(state),
    )
}

pub(crate) fn download_service(state: &AppState) -> DownloadService {
    DownloadService::new(
        state.db.clone(),
        Arc::new(state.event_sender.clone()),
        download_config(state),
    )
}

pub(crate) fn admin_transaction_service(state: &AppState) -> AdminTransactionService {
    AdminTransactionService::new(state.db.clone(), Arc::new(state.event_sender.clone()))
}

fn download_config(state: &AppState) -> DownloadConfig {
    state.config.downloads.clone()
}
