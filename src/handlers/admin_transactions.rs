use super::common::PaginationParams;
use crate::auth::AuthUser;
use crate::entities::transaction::PaymentStatus;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::admin_transactions::{BulkDeleteSummary, CleanupSummary};
use crate::services::payments::TransactionResponse;
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ForceQuery {
    /// Required to delete COMPLETED/REFUNDED transactions
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CleanupQuery {
    /// Only FAILED transactions older than this many days are removed
    pub days_old: i64,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct TransactionStatusFilter {
    /// Filter by payment status (pending, completed, failed, refunded)
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "transaction_ids": ["550e8400-e29b-41d4-a716-446655440000"],
    "force": false
}))]
pub struct BulkDeleteRequest {
    pub transaction_ids: Vec<Uuid>,
    #[serde(default)]
    pub force: bool,
}

/// List transactions (admin)
#[utoipa::path(
    get,
    path = "/api/v1/payments/admin/transactions",
    params(PaginationParams, TransactionStatusFilter),
    responses(
        (status = 200, description = "Transactions", body = crate::ApiResponse<crate::PaginatedResponse<TransactionResponse>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<TransactionStatusFilter>,
    user: AuthUser,
) -> Result<Json<ApiResponse<crate::PaginatedResponse<TransactionResponse>>>, ServiceError> {
    let status = match filter.status {
        Some(value) => Some(parse_status_filter(&value)?),
        None => None,
    };

    let service = super::admin_transaction_service(&state);
    let (items, total) = service
        .list_transactions(&user, status, params.page, params.per_page)
        .await?;

    let response = crate::PaginatedResponse {
        items: items.into_iter().map(TransactionResponse::from).collect(),
        total,
        page: params.page,
        limit: params.per_page,
        total_pages: params.total_pages(total),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Delete a transaction (admin); `force` required for entitled records
#[utoipa::path(
    delete,
    path = "/api/v1/payments/admin/transactions/:id",
    params(
        ("id" = Uuid, Path, description = "Transaction ID"),
        ForceQuery
    ),
    responses(
        (status = 200, description = "Deleted", body = crate::ApiResponse<serde_json::Value>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Protected state; force required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ForceQuery>,
    user: AuthUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let service = super::admin_transaction_service(&state);
    service.delete_transaction(&user, id, query.force).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": id,
        "forced": query.force,
    }))))
}

/// Delete a selection of transactions, all or nothing (admin)
#[utoipa::path(
    post,
    path = "/api/v1/payments/admin/transactions/bulk-delete",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "Deletion summary", body = crate::ApiResponse<BulkDeleteSummary>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Selection contains protected records", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn bulk_delete_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<ApiResponse<BulkDeleteSummary>>, ServiceError> {
    let service = super::admin_transaction_service(&state);
    let summary = service
        .bulk_delete_transactions(&user, &request.transaction_ids, request.force)
        .await?;

    Ok(Json(ApiResponse::success(summary)))
}

/// Sweep FAILED transactions older than the cutoff (admin)
#[utoipa::path(
    delete,
    path = "/api/v1/payments/admin/transactions/cleanup",
    params(CleanupQuery),
    responses(
        (status = 200, description = "Cleanup summary", body = crate::ApiResponse<CleanupSummary>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn cleanup_failed_transactions(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CleanupSummary>>, ServiceError> {
    let service = super::admin_transaction_service(&state);
    let summary = service
        .cleanup_failed_transactions(&user, query.days_old)
        .await?;

    Ok(Json(ApiResponse::success(summary)))
}

/// Admin transaction routes
pub fn admin_transaction_routes() -> Router<AppState> {
    Router::new()
        .route("/transactions", get(list_transactions))
        .route("/transactions/bulk-delete", post(bulk_delete_transactions))
        .route("/transactions/cleanup", delete(cleanup_failed_transactions))
        .route("/transactions/:id", delete(delete_transaction))
}

fn parse_status_filter(value: &str) -> Result<PaymentStatus, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(
            "status filter cannot be empty".to_string(),
        ));
    }

    PaymentStatus::from_str(trimmed)
        .map_err(|_| ServiceError::ValidationError(format!("invalid status filter: {}", trimmed)))
}
