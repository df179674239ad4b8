use crate::{
    entities::{book, transaction, transaction::PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::DownloadConfig;

/// Redeemed download link plus what is left of the quota
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DownloadLinkResponse {
    pub download_url: String,
    pub remaining_downloads: i32,
}

/// Releases download artifacts against a purchase's entitlement: token must
/// be known, the grant unexpired, and quota available. The quota check and
/// increment are a single conditional update so concurrent redemptions can
/// never exceed `max_downloads`.
pub struct DownloadService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: DownloadConfig,
}

impl DownloadService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    #[instrument(skip(self, download_token))]
    pub async fn issue_download_link(
        &self,
        download_token: &str,
    ) -> Result<DownloadLinkResponse, ServiceError> {
        let txn = transaction::Entity::find()
            .filter(transaction::Column::DownloadToken.eq(download_token))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Unknown download token".to_string()))?;

        let now = Utc::now();

        // A refunded purchase keeps its token for bookkeeping but the
        // entitlement is gone.
        if txn.status() != PaymentStatus::Completed {
            return Err(ServiceError::Expired(format!(
                "entitlement for transaction {} is no longer active",
                txn.id
            )));
        }

        if let Some(expires_at) = txn.download_expires_at {
            if now > expires_at {
                return Err(ServiceError::Expired(format!(
                    "download window for transaction {} closed at {}",
                    txn.id, expires_at
                )));
            }
        }

        // Conditional increment: the quota precondition is part of the same
        // update, so two concurrent redemptions cannot both take the last
        // slot.
        let result = transaction::Entity::update_many()
            .col_expr(
                transaction::Column::DownloadCount,
                Expr::col(transaction::Column::DownloadCount).add(1),
            )
            .col_expr(transaction::Column::UpdatedAt, Expr::value(now))
            .filter(transaction::Column::Id.eq(txn.id))
            .filter(
                transaction::Column::PaymentStatus.eq(PaymentStatus::Completed.as_str()),
            )
            .filter(
                Expr::col(transaction::Column::DownloadCount)
                    .lt(Expr::col(transaction::Column::MaxDownloads)),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let stored = transaction::Entity::find_by_id(txn.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Transaction {} not found", txn.id))
                })?;
            if stored.download_count >= stored.max_downloads {
                return Err(ServiceError::QuotaExceeded(format!(
                    "all {} downloads for transaction {} have been used",
                    stored.max_downloads, stored.id
                )));
            }
            return Err(ServiceError::Conflict(format!(
                "transaction {} changed concurrently",
                txn.id
            )));
        }

        let stored = transaction::Entity::find_by_id(txn.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", txn.id)))?;
        let remaining = stored.remaining_downloads();

        let book = book::Entity::find_by_id(stored.book_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Book {} not found", stored.book_id))
            })?;

        let download_url = format!(
            "{}/files/{}?grant={}",
            self.config.base_url.trim_end_matches('/'),
            book.file_key,
            download_token
        );

        info!(transaction_id = %stored.id, remaining, "download link issued");
        if let Err(e) = self
            .event_sender
            .send(Event::DownloadRedeemed {
                transaction_id: stored.id,
                remaining_downloads: remaining,
            })
            .await
        {
            warn!(error = %e, "failed to send download event");
        }

        Ok(DownloadLinkResponse {
            download_url,
            remaining_downloads: remaining,
        })
    }
}
