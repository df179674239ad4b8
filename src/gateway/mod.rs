use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Payment instrument selected by the client. The orchestrator's state
/// machine is method-agnostic; only request building consumes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Upi,
    Card,
    NetBanking,
    Wallet,
    Qr,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Qr => "qr",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed payment-initiation request handed back to the client as a
/// redirect/iframe handle.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub order_id: String,
    pub payment_url: String,
    pub body: Value,
    pub signature: String,
}

/// Canonical gateway verdict. Raw gateway payloads are normalized into this
/// immediately at the edge; nothing downstream branches on payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    Failure,
    Refunded,
    Pending,
}

#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub outcome: GatewayOutcome,
    pub gateway_transaction_id: Option<String>,
    pub reason: Option<String>,
    pub raw: Value,
}

/// Normalizes a raw gateway payload. Providers surface the verdict under
/// several keys ("status", "resultStatus", "state", "code"); anything
/// unrecognized is treated as still pending rather than guessed at.
pub fn normalize_status(raw: &Value) -> GatewayStatus {
    let status_text = ["status", "resultStatus", "state", "code"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_str))
        .or_else(|| {
            raw.pointer("/resultInfo/resultStatus")
                .and_then(Value::as_str)
        })
        .unwrap_or("");

    let outcome = match status_text.to_ascii_uppercase().as_str() {
        "TXN_SUCCESS" | "SUCCESS" | "PAYMENT_SUCCESS" | "COMPLETED" | "CHARGED" => {
            GatewayOutcome::Success
        }
        "TXN_FAILURE" | "FAILURE" | "FAILED" | "PAYMENT_ERROR" | "DECLINED" => {
            GatewayOutcome::Failure
        }
        "REFUNDED" | "REFUND_SUCCESS" | "TXN_REFUNDED" => GatewayOutcome::Refunded,
        _ => GatewayOutcome::Pending,
    };

    let gateway_transaction_id = ["txnId", "transactionId", "gatewayTransactionId"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_str))
        .map(str::to_string);

    let reason = ["respMsg", "message", "reason"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_str))
        .map(str::to_string);

    GatewayStatus {
        outcome,
        gateway_transaction_id,
        reason,
        raw: raw.clone(),
    }
}

/// HMAC-SHA256 checksum signer shared with the gateway. Signs the exact
/// serialized request body; verification is constant-time.
#[derive(Clone)]
pub struct ChecksumSigner {
    secret: String,
}

impl ChecksumSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, payload: &[u8]) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::SigningError(format!("checksum key rejected: {}", e)))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Re-derives the signature and compares. Any mismatch means the payload
    /// must be rejected regardless of what it claims.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        match self.sign(payload) {
            Ok(expected) => constant_time_eq(&expected, signature),
            Err(_) => false,
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Seam to the external payment provider. Builds signed initiation requests
/// and answers out-of-band status queries; it never alone decides
/// entitlement.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider tag recorded on transactions
    fn provider(&self) -> &str;

    async fn build_payment_request(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: PaymentMethod,
    ) -> Result<SignedRequest, ServiceError>;

    /// Verifies a callback payload's checksum
    fn verify_callback(&self, payload: &[u8], signature: &str) -> bool;

    /// Server-initiated status check, distinct from trusting an inbound
    /// callback
    async fn query_status(&self, order_id: &str) -> Result<GatewayStatus, ServiceError>;
}

/// Production gateway client speaking HTTPS to the provider with bounded
/// timeouts.
pub struct HttpPaymentGateway {
    config: GatewayConfig,
    signer: ChecksumSigner,
    http: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ServiceError> {
        if config.merchant_secret.is_empty() {
            return Err(ServiceError::SigningError(
                "gateway merchant secret is not configured".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let signer = ChecksumSigner::new(config.merchant_secret.clone());
        Ok(Self {
            config,
            signer,
            http,
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() || err.is_connect() {
            ServiceError::GatewayUnavailable(format!("gateway unreachable: {}", err))
        } else {
            ServiceError::GatewayUnavailable(format!("gateway request failed: {}", err))
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    #[instrument(skip(self))]
    async fn build_payment_request(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: PaymentMethod,
    ) -> Result<SignedRequest, ServiceError> {
        let body = json!({
            "mid": self.config.merchant_id,
            "orderId": order_id,
            "callbackUrl": self.config.callback_url,
            "amount": amount.round_dp(2).to_string(),
            "currency": currency,
            "custId": user_id.to_string(),
            "channel": method.as_str(),
        });

        let serialized = serde_json::to_string(&body)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let signature = self.signer.sign(serialized.as_bytes())?;

        let payment_url = format!(
            "{}/checkout?mid={}&orderId={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.merchant_id,
            order_id
        );

        Ok(SignedRequest {
            order_id: order_id.to_string(),
            payment_url,
            body,
            signature,
        })
    }

    fn verify_callback(&self, payload: &[u8], signature: &str) -> bool {
        self.signer.verify(payload, signature)
    }

    #[instrument(skip(self))]
    async fn query_status(&self, order_id: &str) -> Result<GatewayStatus, ServiceError> {
        let body = json!({
            "mid": self.config.merchant_id,
            "orderId": order_id,
        });
        let serialized = serde_json::to_string(&body)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let signature = self.signer.sign(serialized.as_bytes())?;

        let url = format!(
            "{}/order/status",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .header("x-verify", signature)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), %order_id, "gateway status query rejected");
            return Err(ServiceError::GatewayUnavailable(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        Ok(normalize_status(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_round_trip() {
        let signer = ChecksumSigner::new("test-secret-key");
        let payload = br#"{"orderId":"BV-1"}"#;
        let sig = signer.sign(payload).expect("signs");
        assert!(signer.verify(payload, &sig));
        assert!(!signer.verify(payload, "deadbeef"));
        assert!(!signer.verify(b"tampered", &sig));
    }

    #[test]
    fn tampered_signature_of_same_length_fails() {
        let signer = ChecksumSigner::new("test-secret-key");
        let payload = b"payload";
        let sig = signer.sign(payload).expect("signs");
        let mut flipped = sig.into_bytes();
        flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(flipped).expect("hex remains utf8");
        assert!(!signer.verify(payload, &flipped));
    }

    #[test]
    fn normalize_recognizes_provider_status_keys() {
        for (payload, expected) in [
            (json!({"status": "TXN_SUCCESS"}), GatewayOutcome::Success),
            (json!({"resultStatus": "SUCCESS"}), GatewayOutcome::Success),
            (json!({"state": "FAILED"}), GatewayOutcome::Failure),
            (json!({"code": "PAYMENT_ERROR"}), GatewayOutcome::Failure),
            (json!({"status": "REFUNDED"}), GatewayOutcome::Refunded),
            (
                json!({"resultInfo": {"resultStatus": "TXN_SUCCESS"}}),
                GatewayOutcome::Success,
            ),
            (json!({"status": "PENDING"}), GatewayOutcome::Pending),
        ] {
            assert_eq!(normalize_status(&payload).outcome, expected, "{payload}");
        }
    }

    #[test]
    fn normalize_treats_unknown_shapes_as_pending() {
        assert_eq!(
            normalize_status(&json!({"weird": true})).outcome,
            GatewayOutcome::Pending
        );
        assert_eq!(
            normalize_status(&json!({"status": "SOMETHING_NEW"})).outcome,
            GatewayOutcome::Pending
        );
    }

    #[test]
    fn normalize_extracts_transaction_id_and_reason() {
        let status = normalize_status(&json!({
            "status": "TXN_SUCCESS",
            "txnId": "GW-123",
            "respMsg": "Txn Success",
        }));
        assert_eq!(status.gateway_transaction_id.as_deref(), Some("GW-123"));
        assert_eq!(status.reason.as_deref(), Some("Txn Success"));
    }
}
