use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "BookVault API",
        version = "1.0.0",
        description = r#"
# BookVault Digital Book Storefront API

Backend API for selling PDF/eBook titles: gateway-initiated payments,
asynchronous status reconciliation, and quota-bounded download entitlements.

## Authentication

All endpoints except the payment webhook require a JWT bearer token issued by
the auth service:

```
Authorization: Bearer <your-jwt-token>
```

The webhook endpoint is authenticated by the gateway checksum instead.

## Error Handling

Errors use a consistent response format with appropriate HTTP status codes:

```json
{
  "error": "Conflict",
  "message": "transaction ... carries a live entitlement; set force=true to delete",
  "request_id": "req-abc123",
  "timestamp": "2024-01-15T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Purchase, reconciliation, and download endpoints"),
        (name = "Admin", description = "Administrative transaction operations"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Payments
        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::payment_status,
        crate::handlers::payments::download_free,
        crate::handlers::payments::redeem_download,
        crate::handlers::payments::my_purchases,
        crate::handlers::payments::get_transaction,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Admin
        crate::handlers::admin_transactions::list_transactions,
        crate::handlers::admin_transactions::delete_transaction,
        crate::handlers::admin_transactions::bulk_delete_transactions,
        crate::handlers::admin_transactions::cleanup_failed_transactions,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Payments types
            crate::handlers::payments::InitiatePaymentHandlerRequest,
            crate::handlers::payments::PaymentStatusResponse,
            crate::services::payments::InitiatePaymentResponse,
            crate::services::payments::TransactionResponse,
            crate::services::downloads::DownloadLinkResponse,
            crate::entities::transaction::PaymentStatus,
            crate::gateway::PaymentMethod,

            // Admin types
            crate::handlers::admin_transactions::BulkDeleteRequest,
            crate::services::admin_transactions::BulkDeleteSummary,
            crate::services::admin_transactions::CleanupSummary,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
