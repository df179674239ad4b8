use crate::{
    auth::AuthUser,
    entities::{book, transaction, transaction::PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Result of a bulk delete
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkDeleteSummary {
    pub requested: usize,
    pub deleted: u64,
    /// COMPLETED/REFUNDED records in the selection
    pub protected: u64,
}

/// Result of a failed-transaction sweep
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CleanupSummary {
    pub removed: u64,
    pub older_than_days: i64,
}

/// Destructive operations over the transaction store, restricted to admin
/// principals. COMPLETED/REFUNDED records carry live entitlements and
/// require an explicit `force` override; deleting a COMPLETED record
/// decrements the book's aggregate counter in the same database
/// transaction.
pub struct AdminTransactionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl AdminTransactionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Admin listing with optional status filter, newest first.
    pub async fn list_transactions(
        &self,
        actor: &AuthUser,
        status: Option<PaymentStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<transaction::Model>, u64), ServiceError> {
        self.require_admin(actor)?;

        let mut query = transaction::Entity::find();
        if let Some(status) = status {
            query = query.filter(transaction::Column::PaymentStatus.eq(status.as_str()));
        }
        let paginator = query
            .order_by_desc(transaction::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Deletes one transaction. Entitled records (COMPLETED/REFUNDED) are
    /// refused unless `force` is set; deleting a COMPLETED record reverses
    /// the book's counter increment.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete_transaction(
        &self,
        actor: &AuthUser,
        id: Uuid,
        force: bool,
    ) -> Result<(), ServiceError> {
        self.require_admin(actor)?;

        let txn = transaction::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))?;

        let status = txn.status();
        if status.is_entitled() && !force {
            return Err(ServiceError::ProtectedState(format!(
                "transaction {} is {} and carries a live entitlement; set force=true to delete",
                id, status
            )));
        }

        // Audit line lands before the record disappears.
        log_pending_deletion(actor, &txn, force);

        let db_txn = self.db.begin().await?;
        Self::delete_within(&db_txn, &txn).await?;
        db_txn.commit().await?;

        self.audit_deletion(actor, &txn, force).await;
        Ok(())
    }

    /// Deletes a selection of transactions, all or nothing: if any selected
    /// record is entitled and `force` is unset, nothing is deleted and the
    /// error reports how many were protected.
    #[instrument(skip(self, actor, ids), fields(actor_id = %actor.user_id, count = ids.len()))]
    pub async fn bulk_delete_transactions(
        &self,
        actor: &AuthUser,
        ids: &[Uuid],
        force: bool,
    ) -> Result<BulkDeleteSummary, ServiceError> {
        self.require_admin(actor)?;

        if ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "no transaction ids supplied".to_string(),
            ));
        }

        let selected = transaction::Entity::find()
            .filter(transaction::Column::Id.is_in(ids.iter().copied()))
            .all(&*self.db)
            .await?;

        let protected = selected
            .iter()
            .filter(|txn| txn.status().is_entitled())
            .count() as u64;

        if protected > 0 && !force {
            return Err(ServiceError::ProtectedState(format!(
                "{} of {} selected transactions carry live entitlements; set force=true to delete",
                protected,
                selected.len()
            )));
        }

        for txn in &selected {
            log_pending_deletion(actor, txn, force);
        }

        let db_txn = self.db.begin().await?;
        for txn in &selected {
            Self::delete_within(&db_txn, txn).await?;
        }
        db_txn.commit().await?;

        for txn in &selected {
            self.audit_deletion(actor, txn, force).await;
        }

        Ok(BulkDeleteSummary {
            requested: ids.len(),
            deleted: selected.len() as u64,
            protected,
        })
    }

    /// Sweeps FAILED transactions older than the cutoff. FAILED records
    /// carry no entitlement, so no force flag applies; PENDING records are
    /// never swept.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn cleanup_failed_transactions(
        &self,
        actor: &AuthUser,
        days_old: i64,
    ) -> Result<CleanupSummary, ServiceError> {
        self.require_admin(actor)?;

        if days_old < 1 {
            return Err(ServiceError::ValidationError(
                "days_old must be at least 1".to_string(),
            ));
        }

        let cutoff = Utc::now() - Duration::days(days_old);
        let result = transaction::Entity::delete_many()
            .filter(transaction::Column::PaymentStatus.eq(PaymentStatus::Failed.as_str()))
            .filter(transaction::Column::CreatedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;

        info!(removed = result.rows_affected, days_old, "cleaned up failed transactions");
        if let Err(e) = self
            .event_sender
            .send(Event::FailedTransactionsCleaned {
                actor_id: actor.user_id,
                removed: result.rows_affected,
                older_than_days: days_old,
            })
            .await
        {
            tracing::warn!(error = %e, "failed to send cleanup event");
        }

        Ok(CleanupSummary {
            removed: result.rows_affected,
            older_than_days: days_old,
        })
    }

    fn require_admin(&self, actor: &AuthUser) -> Result<(), ServiceError> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }

    /// Removes one record, compensating the book counter for COMPLETED
    /// grants. Runs inside the caller's database transaction so the pair is
    /// one logical unit.
    async fn delete_within(
        db_txn: &DatabaseTransaction,
        txn: &transaction::Model,
    ) -> Result<(), ServiceError> {
        if txn.status() == PaymentStatus::Completed {
            book::Entity::update_many()
                .col_expr(
                    book::Column::DownloadCount,
                    Expr::col(book::Column::DownloadCount).sub(1),
                )
                .col_expr(book::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(book::Column::Id.eq(txn.book_id))
                .filter(Expr::col(book::Column::DownloadCount).gt(0))
                .exec(db_txn)
                .await?;
        }

        transaction::Entity::delete_by_id(txn.id)
            .exec(db_txn)
            .await?;
        Ok(())
    }

    async fn audit_deletion(&self, actor: &AuthUser, txn: &transaction::Model, forced: bool) {
        let deleted_at = Utc::now();
        if let Err(e) = self
            .event_sender
            .send(Event::TransactionDeleted {
                transaction_id: txn.id,
                actor_id: actor.user_id,
                prior_status: txn.payment_status.clone(),
                forced,
                deleted_at,
            })
            .await
        {
            tracing::warn!(error = %e, "failed to send audit event");
        }
    }
}

fn log_pending_deletion(actor: &AuthUser, txn: &transaction::Model, forced: bool) {
    info!(
        transaction_id = %txn.id,
        actor_id = %actor.user_id,
        prior_status = %txn.payment_status,
        forced,
        deleted_at = %Utc::now(),
        "deleting transaction"
    );
}
