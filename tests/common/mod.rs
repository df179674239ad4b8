use async_trait::async_trait;
use axum::Router;
use bookvault_api::{
    auth::{AuthConfig, AuthService, AuthUser, Claims},
    config::AppConfig,
    db,
    entities::book,
    events::{self, EventSender},
    gateway::{
        ChecksumSigner, GatewayOutcome, GatewayStatus, PaymentGateway, PaymentMethod,
        SignedRequest,
    },
    services::{
        admin_transactions::AdminTransactionService, downloads::DownloadService,
        payments::PaymentService,
    },
    AppState,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_64_chars_padded_xxxxx";
pub const TEST_GATEWAY_SECRET: &str = "test-gateway-checksum-secret";

/// Scriptable in-process gateway. Tests choose what the provider reports;
/// the signer matches what the webhook sender would use.
pub struct StubGateway {
    signer: ChecksumSigner,
    outcome: Mutex<GatewayOutcome>,
    status_calls: AtomicU32,
    unavailable: AtomicBool,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            signer: ChecksumSigner::new(TEST_GATEWAY_SECRET),
            outcome: Mutex::new(GatewayOutcome::Pending),
            status_calls: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_outcome(&self, outcome: GatewayOutcome) {
        *self.outcome.lock().expect("outcome lock") = outcome;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Signs a payload the way the real gateway would sign its callbacks.
    pub fn sign(&self, payload: &[u8]) -> String {
        self.signer.sign(payload).expect("stub signer")
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn provider(&self) -> &str {
        "stub"
    }

    async fn build_payment_request(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: PaymentMethod,
    ) -> Result<SignedRequest, bookvault_api::errors::ServiceError> {
        let body = json!({
            "orderId": order_id,
            "custId": user_id.to_string(),
            "amount": amount.to_string(),
            "currency": currency,
            "channel": method.as_str(),
        });
        let serialized = serde_json::to_string(&body).expect("stub body serializes");
        let signature = self.sign(serialized.as_bytes());

        Ok(SignedRequest {
            order_id: order_id.to_string(),
            payment_url: format!("https://gateway.test/checkout/{}", order_id),
            body,
            signature,
        })
    }

    fn verify_callback(&self, payload: &[u8], signature: &str) -> bool {
        self.signer.verify(payload, signature)
    }

    async fn query_status(
        &self,
        _order_id: &str,
    ) -> Result<GatewayStatus, bookvault_api::errors::ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(bookvault_api::errors::ServiceError::GatewayUnavailable(
                "stub gateway offline".to_string(),
            ));
        }

        let outcome = *self.outcome.lock().expect("outcome lock");
        let raw: Value = match outcome {
            GatewayOutcome::Success => json!({
                "status": "TXN_SUCCESS",
                "txnId": "GW-STUB-1",
                "respMsg": "Txn Success",
            }),
            GatewayOutcome::Failure => json!({
                "status": "TXN_FAILURE",
                "respMsg": "Insufficient funds",
            }),
            GatewayOutcome::Refunded => json!({ "status": "REFUNDED" }),
            GatewayOutcome::Pending => json!({ "status": "PENDING" }),
        };

        Ok(bookvault_api::gateway::normalize_status(&raw))
    }
}

/// Helper harness: app state over an in-memory SQLite database plus a stub
/// gateway the tests can script.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    pub auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.downloads.base_url = "http://downloads.test".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("database connects");
        bookvault_api::migrator::Migrator::up(&pool, None)
            .await
            .expect("migrations apply");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::new());
        let auth_service = Arc::new(AuthService::new(AuthConfig::new(cfg.jwt_secret.clone())));

        let state = AppState {
            db: Arc::new(pool),
            config: cfg,
            event_sender,
            gateway: gateway.clone(),
        };

        Self {
            state,
            gateway,
            auth_service,
            _event_task: event_task,
        }
    }

    /// Full router, wired the way `main` wires it (minus CORS/compression).
    pub fn router(&self) -> Router {
        let auth_service = self.auth_service.clone();
        Router::new()
            .nest("/api/v1", bookvault_api::api_v1_routes())
            .layer(axum::middleware::from_fn_with_state(
                auth_service,
                |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
                 mut req: axum::http::Request<axum::body::Body>,
                 next: axum::middleware::Next| async move {
                    req.extensions_mut().insert(auth);
                    next.run(req).await
                },
            ))
            .layer(axum::middleware::from_fn(
                bookvault_api::request_id::request_id_middleware,
            ))
            .with_state(self.state.clone())
    }

    pub fn payment_service(&self) -> PaymentService {
        PaymentService::new(
            self.state.db.clone(),
            self.gateway.clone(),
            Arc::new(self.state.event_sender.clone()),
            self.state.config.downloads.clone(),
        )
    }

    pub fn download_service(&self) -> DownloadService {
        DownloadService::new(
            self.state.db.clone(),
            Arc::new(self.state.event_sender.clone()),
            self.state.config.downloads.clone(),
        )
    }

    pub fn admin_service(&self) -> AdminTransactionService {
        AdminTransactionService::new(
            self.state.db.clone(),
            Arc::new(self.state.event_sender.clone()),
        )
    }

    pub async fn seed_book(&self, title: &str, price: Decimal, is_paid: bool) -> book::Model {
        let model = book::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            author: Set(Some("Test Author".to_string())),
            price: Set(price),
            currency: Set("INR".to_string()),
            is_paid: Set(is_paid),
            file_key: Set(format!("{}.pdf", title.to_lowercase().replace(' ', "-"))),
            download_count: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("book seeds")
    }

    pub async fn book(&self, id: Uuid) -> book::Model {
        use sea_orm::EntityTrait;
        book::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("book query")
            .expect("book exists")
    }

    /// Mints a bearer token the way the external auth issuer would.
    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            name: Some("Test User".to_string()),
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("token encodes")
    }

    /// Request-scoped principal for direct service calls.
    pub fn principal(&self, user_id: Uuid, roles: &[&str]) -> AuthUser {
        AuthUser {
            user_id,
            name: Some("Test User".to_string()),
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            token_id: Uuid::new_v4().to_string(),
        }
    }
}
