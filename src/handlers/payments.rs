use super::common::PaginationParams;
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::gateway::PaymentMethod;
use crate::handlers::AppState;
use crate::services::downloads::DownloadLinkResponse;
use crate::services::payments::{InitiatePaymentResponse, TransactionResponse};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "book_id": "550e8400-e29b-41d4-a716-446655440000",
    "payment_method": "upi"
}))]
pub struct InitiatePaymentHandlerRequest {
    /// Book to purchase; the price is snapshotted server-side
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub book_id: Uuid,

    /// Payment method (upi, card, net_banking, wallet, qr)
    #[schema(example = "upi")]
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub transaction_id: Uuid,
    pub order_id: String,
    pub status: String,
}

// Handler functions

/// Initiate a purchase of a paid book
#[utoipa::path(
    post,
    path = "/api/v1/payments/initiate",
    request_body = InitiatePaymentHandlerRequest,
    responses(
        (status = 201, description = "Payment initiated", body = crate::ApiResponse<InitiatePaymentResponse>),
        (status = 400, description = "Book is not purchasable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<InitiatePaymentHandlerRequest>,
) -> Result<(StatusCode, Json<ApiResponse<InitiatePaymentResponse>>), ServiceError> {
    let method = match request.payment_method.as_deref() {
        Some(raw) => Some(parse_payment_method(raw)?),
        None => None,
    };

    let service = super::payment_service(&state);
    let response = service.initiate(user.user_id, request.book_id, method).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Poll the status of a purchase; triggers a gateway-side reconciliation
#[utoipa::path(
    get,
    path = "/api/v1/payments/status/:order_id",
    params(
        ("order_id" = String, Path, description = "Gateway order id returned at initiation")
    ),
    responses(
        (status = 200, description = "Current payment status", body = crate::ApiResponse<PaymentStatusResponse>),
        (status = 404, description = "Unknown order id", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    user: AuthUser,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let service = super::payment_service(&state);

    let existing = service.find_by_order_id(&order_id).await?;
    if existing.user_id != user.user_id && !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "transaction belongs to another user".to_string(),
        ));
    }

    let txn = service
        .reconcile(&order_id, crate::services::payments::ReconcileSource::Poll)
        .await?;

    Ok(Json(ApiResponse::success(PaymentStatusResponse {
        transaction_id: txn.id,
        order_id: txn.gateway_order_id,
        status: txn.payment_status,
    })))
}

/// Claim a free book: creates a completed grant and returns the first link
#[utoipa::path(
    post,
    path = "/api/v1/payments/downloadfree/:book_id",
    params(
        ("book_id" = Uuid, Path, description = "Book ID")
    ),
    responses(
        (status = 201, description = "Grant created", body = crate::ApiResponse<DownloadLinkResponse>),
        (status = 400, description = "Book is not free", body = crate::errors::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn download_free(
    State(state): State<AppState>,
    Path(book_id): Path<Uuid>,
    user: AuthUser,
) -> Result<(StatusCode, Json<ApiResponse<DownloadLinkResponse>>), ServiceError> {
    let payments = super::payment_service(&state);
    let grant = payments.free_download(user.user_id, book_id).await?;

    let token = grant.download_token.ok_or_else(|| {
        ServiceError::InternalError("free grant created without a download token".to_string())
    })?;

    let downloads = super::download_service(&state);
    let link = downloads.issue_download_link(&token).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(link))))
}

/// Redeem a download against a purchase's entitlement
#[utoipa::path(
    get,
    path = "/api/v1/payments/download/:download_token",
    params(
        ("download_token" = String, Path, description = "Opaque download credential")
    ),
    responses(
        (status = 200, description = "Download link issued", body = crate::ApiResponse<DownloadLinkResponse>),
        (status = 404, description = "Unknown token", body = crate::errors::ErrorResponse),
        (status = 410, description = "Entitlement expired", body = crate::errors::ErrorResponse),
        (status = 422, description = "Quota exhausted", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn redeem_download(
    State(state): State<AppState>,
    Path(download_token): Path<String>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<DownloadLinkResponse>>, ServiceError> {
    let service = super::download_service(&state);
    let link = service.issue_download_link(&download_token).await?;
    Ok(Json(ApiResponse::success(link)))
}

/// List the caller's purchases
#[utoipa::path(
    get,
    path = "/api/v1/payments/my-purchases",
    params(PaginationParams),
    responses(
        (status = 200, description = "Caller's purchase history", body = crate::ApiResponse<crate::PaginatedResponse<TransactionResponse>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn my_purchases(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    user: AuthUser,
) -> Result<Json<ApiResponse<crate::PaginatedResponse<TransactionResponse>>>, ServiceError> {
    let service = super::payment_service(&state);
    let (items, total) = service
        .my_purchases(user.user_id, params.page, params.per_page)
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

/// Fetch one of the caller's transactions
#[utoipa::path(
    get,
    path = "/api/v1/payments/:transaction_id",
    params(
        ("transaction_id" = Uuid, Path, description = "Transaction ID")
    ),
    responses(
        (status = 200, description = "Transaction details", body = crate::ApiResponse<TransactionResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    user: AuthUser,
) -> Result<Json<ApiResponse<TransactionResponse>>, ServiceError> {
    let service = super::payment_service(&state);
    let txn = service.find_required(transaction_id).await?;

    if txn.user_id != user.user_id && !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "transaction belongs to another user".to_string(),
        ));
    }

    Ok(Json(ApiResponse::success(TransactionResponse::from(txn))))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(initiate_payment))
        .route("/status/:order_id", get(payment_status))
        .route("/downloadfree/:book_id", post(download_free))
        .route("/download/:download_token", get(redeem_download))
        .route("/my-purchases", get(my_purchases))
        .route("/:transaction_id", get(get_transaction))
}

fn parse_payment_method(value: &str) -> Result<PaymentMethod, ServiceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "upi" => Ok(PaymentMethod::Upi),
        "card" | "credit_card" | "debit_card" => Ok(PaymentMethod::Card),
        "net_banking" | "netbanking" => Ok(PaymentMethod::NetBanking),
        "wallet" => Ok(PaymentMethod::Wallet),
        "qr" => Ok(PaymentMethod::Qr),
        other => Err(ServiceError::ValidationError(format!(
            "invalid payment method: {}",
            other
        ))),
    }
}
