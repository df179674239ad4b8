use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::ReconcileSource;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info, warn};

const SIGNATURE_HEADER: &str = "x-verify";

// POST /api/v1/payments/webhook
//
// External-facing: no bearer auth, but the payload checksum must verify and
// the reported status is never trusted directly (the orchestrator re-queries
// the gateway before transitioning).
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook processed", body = serde_json::Value),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            warn!("payment webhook without signature header");
            ServiceError::IntegrityError("missing callback signature".to_string())
        })?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

    let order_id = ["orderId", "ORDERID", "order_id"]
        .iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))
        .ok_or_else(|| {
            ServiceError::ValidationError("missing order id in webhook payload".to_string())
        })?
        .to_string();

    let service = super::payment_service(&state);
    let txn = service
        .reconcile(
            &order_id,
            ReconcileSource::Callback {
                payload: body.to_vec(),
                signature,
            },
        )
        .await?;

    info!(%order_id, status = %txn.payment_status, "payment webhook processed");
    Ok((
        StatusCode::OK,
        Json(json!({
            "order_id": order_id,
            "status": txn.payment_status,
        })),
    ))
}
