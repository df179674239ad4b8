use crate::{
    entities::{book, transaction, transaction::PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayOutcome, GatewayStatus, PaymentGateway, PaymentMethod},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::DownloadConfig;

/// Where a reconciliation request originated. Callbacks carry the raw signed
/// payload; polls trigger a fresh gateway status query.
#[derive(Debug, Clone)]
pub enum ReconcileSource {
    Callback { payload: Vec<u8>, signature: String },
    Poll,
}

/// Redirect/iframe handle returned from payment initiation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiatePaymentResponse {
    pub transaction_id: Uuid,
    pub order_id: String,
    pub payment_url: String,
}

/// API view of a transaction
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub book_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_status: String,
    pub payment_gateway: String,
    pub order_id: String,
    pub download_token: Option<String>,
    pub download_count: i32,
    pub max_downloads: i32,
    pub download_expires_at: Option<chrono::DateTime<Utc>>,
    pub purchased_at: Option<chrono::DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<transaction::Model> for TransactionResponse {
    fn from(model: transaction::Model) -> Self {
        Self {
            id: model.id,
            book_id: model.book_id,
            amount: model.amount,
            currency: model.currency,
            payment_status: model.payment_status,
            payment_gateway: model.payment_gateway,
            order_id: model.gateway_order_id,
            download_token: model.download_token,
            download_count: model.download_count,
            max_downloads: model.max_downloads,
            download_expires_at: model.download_expires_at,
            purchased_at: model.purchased_at,
            failure_reason: model.failure_reason,
            created_at: model.created_at,
        }
    }
}

/// Payment orchestrator: owns every `payment_status` transition. Terminal
/// states make re-delivered callbacks and racing polls benign.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    downloads: DownloadConfig,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        downloads: DownloadConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            downloads,
        }
    }

    /// Creates a PENDING transaction with the book's current price
    /// snapshotted and returns the signed gateway redirect handle. The
    /// client never supplies an amount.
    #[instrument(skip(self))]
    pub async fn initiate(
        &self,
        user_id: Uuid,
        book_id: Uuid,
        method: Option<PaymentMethod>,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        let book = self.find_book(book_id).await?;
        if !book.is_paid {
            return Err(ServiceError::InvalidOperation(format!(
                "Book {} is free; use the free download flow",
                book_id
            )));
        }

        let transaction_id = Uuid::new_v4();
        let order_id = generate_order_id();
        let now = Utc::now();

        let model = transaction::ActiveModel {
            id: Set(transaction_id),
            user_id: Set(user_id),
            book_id: Set(book_id),
            amount: Set(book.price),
            currency: Set(book.currency.clone()),
            payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
            payment_gateway: Set(self.gateway.provider().to_string()),
            gateway_order_id: Set(order_id.clone()),
            gateway_transaction_id: Set(None),
            payment_method: Set(method.map(|m| m.as_str().to_string())),
            download_token: Set(None),
            download_count: Set(0),
            max_downloads: Set(self.downloads.max_downloads),
            download_expires_at: Set(None),
            purchased_at: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };
        model.insert(&*self.db).await?;

        info!(%transaction_id, %order_id, amount = %book.price, "payment initiated");

        let signed = match self
            .gateway
            .build_payment_request(&order_id, user_id, book.price, &book.currency, method.unwrap_or(PaymentMethod::Upi))
            .await
        {
            Ok(signed) => signed,
            Err(err) => {
                // The gateway was never engaged; park the record in FAILED so
                // cleanup can sweep it.
                if let Err(mark_err) = self
                    .fail_transaction(transaction_id, Some("gateway signing failed".to_string()))
                    .await
                {
                    warn!(%transaction_id, error = %mark_err, "failed to mark transaction after signing error");
                }
                return Err(err);
            }
        };

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentInitiated {
                transaction_id,
                order_id: order_id.clone(),
                user_id,
                book_id,
                amount: book.price,
            })
            .await
        {
            warn!(error = %e, "failed to send payment event");
        }

        Ok(InitiatePaymentResponse {
            transaction_id,
            order_id,
            payment_url: signed.payment_url,
        })
    }

    /// Resolves a transaction's true status from the gateway and applies the
    /// corresponding transition. Safe to invoke any number of times for the
    /// same order: terminal records are returned unchanged and grant side
    /// effects are applied exactly once.
    #[instrument(skip(self, source), fields(order_id = %order_id))]
    pub async fn reconcile(
        &self,
        order_id: &str,
        source: ReconcileSource,
    ) -> Result<transaction::Model, ServiceError> {
        let txn = self.find_by_order_id(order_id).await?;
        let current = txn.status();

        // FAILED and REFUNDED have no outgoing edges; COMPLETED may still
        // move to REFUNDED below.
        if matches!(current, PaymentStatus::Failed | PaymentStatus::Refunded) {
            return Ok(txn);
        }

        let gateway_status = match source {
            ReconcileSource::Callback { payload, signature } => {
                if !self.gateway.verify_callback(&payload, &signature) {
                    return Err(ServiceError::IntegrityError(format!(
                        "callback checksum mismatch for order {}",
                        order_id
                    )));
                }
                // A valid checksum authenticates the sender, not the verdict.
                // The embedded status field stays untrusted; the gateway is
                // asked directly before any transition.
                self.gateway.query_status(order_id).await?
            }
            ReconcileSource::Poll => self.gateway.query_status(order_id).await?,
        };

        match (current, gateway_status.outcome) {
            (PaymentStatus::Pending, GatewayOutcome::Success) => {
                self.complete_transaction(&txn, Some(&gateway_status)).await
            }
            (PaymentStatus::Pending, GatewayOutcome::Failure) => {
                self.fail_transaction(txn.id, gateway_status.reason.clone())
                    .await
            }
            (PaymentStatus::Completed, GatewayOutcome::Refunded) => {
                self.refund_transaction(&txn).await
            }
            (PaymentStatus::Pending, GatewayOutcome::Refunded) => {
                warn!(%order_id, "gateway reported refund for a pending transaction; ignoring");
                Ok(txn)
            }
            // Still pending gateway-side, or a terminal state already
            // holds: nothing to apply.
            _ => Ok(txn),
        }
    }

    /// Creates a COMPLETED grant directly for a free book, with the same
    /// quota and expiry rules as a paid purchase.
    #[instrument(skip(self))]
    pub async fn free_download(
        &self,
        user_id: Uuid,
        book_id: Uuid,
    ) -> Result<transaction::Model, ServiceError> {
        let book = self.find_book(book_id).await?;
        if book.is_paid {
            return Err(ServiceError::InvalidOperation(format!(
                "Book {} is paid; initiate a payment instead",
                book_id
            )));
        }

        let transaction_id = Uuid::new_v4();
        let order_id = generate_order_id();
        let now = Utc::now();

        let model = transaction::ActiveModel {
            id: Set(transaction_id),
            user_id: Set(user_id),
            book_id: Set(book_id),
            amount: Set(Decimal::ZERO),
            currency: Set(book.currency.clone()),
            payment_status: Set(PaymentStatus::Completed.as_str().to_string()),
            payment_gateway: Set("free".to_string()),
            gateway_order_id: Set(order_id),
            gateway_transaction_id: Set(None),
            payment_method: Set(None),
            download_token: Set(Some(generate_download_token())),
            download_count: Set(0),
            max_downloads: Set(self.downloads.max_downloads),
            download_expires_at: Set(Some(now + Duration::days(self.downloads.validity_days))),
            purchased_at: Set(Some(now)),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };
        let granted = model.insert(&*self.db).await?;

        self.increment_book_downloads(book_id).await?;

        if let Err(e) = self
            .event_sender
            .send(Event::FreeGrantIssued {
                transaction_id,
                user_id,
                book_id,
            })
            .await
        {
            warn!(error = %e, "failed to send free grant event");
        }

        Ok(granted)
    }

    /// Applies a validated state-machine edge. Invalid edges fail with
    /// `InvalidTransition` without touching the record.
    pub async fn update_status(
        &self,
        id: Uuid,
        to: PaymentStatus,
    ) -> Result<transaction::Model, ServiceError> {
        let txn = self.find_required(id).await?;
        let from = txn.status();
        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidTransition(format!(
                "cannot transition transaction {} from '{}' to '{}'",
                id, from, to
            )));
        }

        match to {
            PaymentStatus::Completed => self.complete_transaction(&txn, None).await,
            PaymentStatus::Failed => self.fail_transaction(id, None).await,
            PaymentStatus::Refunded => self.refund_transaction(&txn).await,
            PaymentStatus::Pending => Err(ServiceError::InvalidTransition(format!(
                "transaction {} cannot return to 'pending'",
                id
            ))),
        }
    }

    pub async fn find_required(&self, id: Uuid) -> Result<transaction::Model, ServiceError> {
        transaction::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))
    }

    pub async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<transaction::Model, ServiceError> {
        transaction::Entity::find()
            .filter(transaction::Column::GatewayOrderId.eq(order_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Transaction with order id {} not found", order_id))
            })
    }

    /// The caller's purchase history, newest first.
    pub async fn my_purchases(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<transaction::Model>, u64), ServiceError> {
        let paginator = transaction::Entity::find()
            .filter(transaction::Column::UserId.eq(user_id))
            .order_by_desc(transaction::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    // Transition helpers. Each is a compare-and-set on the current status so
    // racing reconciliations cannot double-apply side effects.

    async fn complete_transaction(
        &self,
        txn: &transaction::Model,
        gateway_status: Option<&GatewayStatus>,
    ) -> Result<transaction::Model, ServiceError> {
        let now = Utc::now();
        let token = generate_download_token();
        let expires_at = now + Duration::days(self.downloads.validity_days);
        let gateway_transaction_id =
            gateway_status.and_then(|s| s.gateway_transaction_id.clone());

        let result = transaction::Entity::update_many()
            .col_expr(
                transaction::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed.as_str()),
            )
            .col_expr(transaction::Column::DownloadToken, Expr::value(token))
            .col_expr(
                transaction::Column::GatewayTransactionId,
                Expr::value(gateway_transaction_id),
            )
            .col_expr(
                transaction::Column::DownloadExpiresAt,
                Expr::value(expires_at),
            )
            .col_expr(transaction::Column::PurchasedAt, Expr::value(now))
            .col_expr(transaction::Column::UpdatedAt, Expr::value(now))
            .filter(transaction::Column::Id.eq(txn.id))
            .filter(transaction::Column::PaymentStatus.eq(PaymentStatus::Pending.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race: another reconciliation already landed a terminal
            // state and its side effects. Return what is stored.
            return self.find_required(txn.id).await;
        }

        self.increment_book_downloads(txn.book_id).await?;

        info!(transaction_id = %txn.id, order_id = %txn.gateway_order_id, "payment completed");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentCompleted {
                transaction_id: txn.id,
                order_id: txn.gateway_order_id.clone(),
                book_id: txn.book_id,
            })
            .await
        {
            warn!(error = %e, "failed to send payment event");
        }

        self.find_required(txn.id).await
    }

    async fn fail_transaction(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<transaction::Model, ServiceError> {
        let now = Utc::now();
        let result = transaction::Entity::update_many()
            .col_expr(
                transaction::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed.as_str()),
            )
            .col_expr(
                transaction::Column::FailureReason,
                Expr::value(reason.clone()),
            )
            .col_expr(transaction::Column::UpdatedAt, Expr::value(now))
            .filter(transaction::Column::Id.eq(id))
            .filter(transaction::Column::PaymentStatus.eq(PaymentStatus::Pending.as_str()))
            .exec(&*self.db)
            .await?;

        let stored = self.find_required(id).await?;
        if result.rows_affected > 0 {
            warn!(transaction_id = %id, reason = ?reason, "payment failed");
            if let Err(e) = self
                .event_sender
                .send(Event::PaymentFailed {
                    transaction_id: id,
                    order_id: stored.gateway_order_id.clone(),
                    reason,
                })
                .await
            {
                warn!(error = %e, "failed to send payment event");
            }
        }
        Ok(stored)
    }

    async fn refund_transaction(
        &self,
        txn: &transaction::Model,
    ) -> Result<transaction::Model, ServiceError> {
        let now = Utc::now();
        let result = transaction::Entity::update_many()
            .col_expr(
                transaction::Column::PaymentStatus,
                Expr::value(PaymentStatus::Refunded.as_str()),
            )
            .col_expr(transaction::Column::UpdatedAt, Expr::value(now))
            .filter(transaction::Column::Id.eq(txn.id))
            .filter(transaction::Column::PaymentStatus.eq(PaymentStatus::Completed.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(transaction_id = %txn.id, "payment refunded");
            if let Err(e) = self
                .event_sender
                .send(Event::PaymentRefunded {
                    transaction_id: txn.id,
                    order_id: txn.gateway_order_id.clone(),
                })
                .await
            {
                warn!(error = %e, "failed to send payment event");
            }
        }

        self.find_required(txn.id).await
    }

    async fn find_book(&self, book_id: Uuid) -> Result<book::Model, ServiceError> {
        book::Entity::find_by_id(book_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", book_id)))
    }

    async fn increment_book_downloads(&self, book_id: Uuid) -> Result<(), ServiceError> {
        book::Entity::update_many()
            .col_expr(
                book::Column::DownloadCount,
                Expr::col(book::Column::DownloadCount).add(1),
            )
            .col_expr(book::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(book::Column::Id.eq(book_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}

fn generate_order_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d");
    let random = Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_uppercase();
    format!("BV-{}-{}", timestamp, random)
}

/// Opaque download credential: 32 random bytes, URL-safe base64.
fn generate_download_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
