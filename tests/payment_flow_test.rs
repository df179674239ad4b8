mod common;

use assert_matches::assert_matches;
use bookvault_api::{
    entities::transaction::PaymentStatus,
    errors::ServiceError,
    gateway::GatewayOutcome,
    services::payments::ReconcileSource,
    services::status_poll::{PollOutcome, StatusPoller},
};
use common::TestApp;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn initiate_snapshots_price_and_creates_pending_transaction() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Systems Primer", dec!(199.00), true).await;
    let user_id = Uuid::new_v4();

    let response = service
        .initiate(user_id, book.id, None)
        .await
        .expect("initiate succeeds");

    assert!(response.order_id.starts_with("BV-"));
    assert!(!response.payment_url.is_empty());

    let txn = service
        .find_by_order_id(&response.order_id)
        .await
        .expect("transaction stored");
    assert_eq!(txn.status(), PaymentStatus::Pending);
    assert_eq!(txn.amount, dec!(199.00));
    assert_eq!(txn.user_id, user_id);
    assert_eq!(txn.book_id, book.id);
    assert!(txn.download_token.is_none());
    assert_eq!(txn.download_count, 0);
    assert_eq!(txn.max_downloads, 5);
    assert!(txn.purchased_at.is_none());
}

#[tokio::test]
async fn initiate_rejects_unknown_and_free_books() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let user_id = Uuid::new_v4();

    let missing = service.initiate(user_id, Uuid::new_v4(), None).await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));

    let free_book = app.seed_book("Free Sampler", dec!(0.00), false).await;
    let free = service.initiate(user_id, free_book.id, None).await;
    assert_matches!(free, Err(ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn reconcile_success_completes_and_mints_grant() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Rust in Depth", dec!(499.00), true).await;
    let user_id = Uuid::new_v4();

    let response = service
        .initiate(user_id, book.id, None)
        .await
        .expect("initiate succeeds");

    app.gateway.set_outcome(GatewayOutcome::Success);
    let txn = service
        .reconcile(&response.order_id, ReconcileSource::Poll)
        .await
        .expect("reconcile succeeds");

    assert_eq!(txn.status(), PaymentStatus::Completed);
    assert!(txn.download_token.is_some());
    assert_eq!(txn.download_count, 0);
    assert_eq!(txn.max_downloads, 5);
    assert!(txn.purchased_at.is_some());
    let expires = txn.download_expires_at.expect("expiry set");
    let days_out = (expires - chrono::Utc::now()).num_days();
    assert!((29..=30).contains(&days_out), "expiry ~30 days out, got {days_out}");
    assert_eq!(txn.gateway_transaction_id.as_deref(), Some("GW-STUB-1"));

    // Grant increments the book's aggregate counter
    assert_eq!(app.book(book.id).await.download_count, 1);
}

#[tokio::test]
async fn reconcile_is_idempotent_on_terminal_state() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Idempotency Tales", dec!(299.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    app.gateway.set_outcome(GatewayOutcome::Success);
    let first = service
        .reconcile(&response.order_id, ReconcileSource::Poll)
        .await
        .expect("first reconcile");

    for _ in 0..3 {
        let again = service
            .reconcile(&response.order_id, ReconcileSource::Poll)
            .await
            .expect("repeat reconcile");
        assert_eq!(again.status(), PaymentStatus::Completed);
        assert_eq!(again.download_token, first.download_token, "token minted once");
        assert_eq!(again.purchased_at, first.purchased_at);
    }

    // The counter increment happened exactly once
    assert_eq!(app.book(book.id).await.download_count, 1);
}

#[tokio::test]
async fn reconcile_failure_marks_failed_without_grant() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Declined Stories", dec!(149.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    app.gateway.set_outcome(GatewayOutcome::Failure);
    let txn = service
        .reconcile(&response.order_id, ReconcileSource::Poll)
        .await
        .expect("reconcile applies failure");

    assert_eq!(txn.status(), PaymentStatus::Failed);
    assert!(txn.download_token.is_none());
    assert_eq!(txn.failure_reason.as_deref(), Some("Insufficient funds"));
    assert_eq!(app.book(book.id).await.download_count, 0);

    // A late success report cannot flip a failed transaction
    app.gateway.set_outcome(GatewayOutcome::Success);
    let still_failed = service
        .reconcile(&response.order_id, ReconcileSource::Poll)
        .await
        .expect("reconcile is a no-op");
    assert_eq!(still_failed.status(), PaymentStatus::Failed);
}

#[tokio::test]
async fn forged_callback_never_changes_state() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Forgery Field Guide", dec!(99.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    // Payload claims success, but the signature is wrong: fail closed.
    let payload = format!(
        r#"{{"orderId":"{}","status":"TXN_SUCCESS"}}"#,
        response.order_id
    );
    let result = service
        .reconcile(
            &response.order_id,
            ReconcileSource::Callback {
                payload: payload.clone().into_bytes(),
                signature: "deadbeef".to_string(),
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::IntegrityError(_)));

    let txn = service
        .find_by_order_id(&response.order_id)
        .await
        .expect("transaction still present");
    assert_eq!(txn.status(), PaymentStatus::Pending);
    assert!(txn.download_token.is_none());
}

#[tokio::test]
async fn verified_callback_still_defers_to_status_query() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Trust but Verify", dec!(59.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    // Correctly signed payload claiming success, while the gateway's own
    // status endpoint still reports pending: no transition.
    let payload = format!(
        r#"{{"orderId":"{}","status":"TXN_SUCCESS"}}"#,
        response.order_id
    );
    let signature = app.gateway.sign(payload.as_bytes());
    app.gateway.set_outcome(GatewayOutcome::Pending);

    let txn = service
        .reconcile(
            &response.order_id,
            ReconcileSource::Callback {
                payload: payload.into_bytes(),
                signature,
            },
        )
        .await
        .expect("reconcile accepts callback");
    assert_eq!(txn.status(), PaymentStatus::Pending);
}

#[tokio::test]
async fn completed_transaction_can_be_refunded_by_gateway_report() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Returns and Refunds", dec!(89.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    app.gateway.set_outcome(GatewayOutcome::Success);
    service
        .reconcile(&response.order_id, ReconcileSource::Poll)
        .await
        .expect("completes");

    app.gateway.set_outcome(GatewayOutcome::Refunded);
    let txn = service
        .reconcile(&response.order_id, ReconcileSource::Poll)
        .await
        .expect("refund applies");
    assert_eq!(txn.status(), PaymentStatus::Refunded);
}

#[tokio::test]
async fn update_status_rejects_invalid_edges() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Edge Cases", dec!(39.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");
    let txn = service
        .find_by_order_id(&response.order_id)
        .await
        .expect("stored");

    let failed = service
        .update_status(txn.id, PaymentStatus::Failed)
        .await
        .expect("pending -> failed is valid");
    assert_eq!(failed.status(), PaymentStatus::Failed);

    let revive = service
        .update_status(txn.id, PaymentStatus::Completed)
        .await;
    assert_matches!(revive, Err(ServiceError::InvalidTransition(_)));

    let refund = service.update_status(txn.id, PaymentStatus::Refunded).await;
    assert_matches!(refund, Err(ServiceError::InvalidTransition(_)));
}

#[tokio::test]
async fn free_download_grants_without_payment() {
    let app = TestApp::new().await;
    let payments = app.payment_service();
    let downloads = app.download_service();
    let book = app.seed_book("Open Access Atlas", dec!(0.00), false).await;
    let user_id = Uuid::new_v4();

    let grant = payments
        .free_download(user_id, book.id)
        .await
        .expect("free grant issues");
    assert_eq!(grant.status(), PaymentStatus::Completed);
    assert_eq!(grant.amount, rust_decimal::Decimal::ZERO);
    assert_eq!(grant.payment_gateway, "free");
    assert_eq!(grant.max_downloads, 5);
    assert_eq!(app.book(book.id).await.download_count, 1);

    let token = grant.download_token.expect("token minted");
    let link = downloads
        .issue_download_link(&token)
        .await
        .expect("link issues");
    assert!(link.download_url.contains("open-access-atlas.pdf"));
    assert_eq!(link.remaining_downloads, 4);

    // Free grants refuse paid books
    let paid = app.seed_book("Paid Tome", dec!(999.00), true).await;
    let rejected = payments.free_download(user_id, paid.id).await;
    assert_matches!(rejected, Err(ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn status_poller_bounds_attempts_and_reports_outcomes() {
    let app = TestApp::new().await;
    let service = Arc::new(app.payment_service());
    let book = app.seed_book("Patience Manual", dec!(75.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    // Still pending after every attempt: bounded timeout, one status query
    // per attempt.
    let poller = StatusPoller::new(service.clone())
        .with_interval(Duration::from_millis(5))
        .with_max_attempts(3);
    let calls_before = app.gateway.status_calls();
    let outcome = poller.poll(&response.order_id).await.expect("poll runs");
    assert_eq!(outcome, PollOutcome::TimedOut);
    assert_eq!(app.gateway.status_calls() - calls_before, 3);

    // Gateway flips to success: the next poll terminates immediately.
    app.gateway.set_outcome(GatewayOutcome::Success);
    let outcome = poller.poll(&response.order_id).await.expect("poll runs");
    assert_eq!(outcome, PollOutcome::Completed);
}

#[tokio::test]
async fn status_poller_retries_through_gateway_blips() {
    let app = TestApp::new().await;
    let service = Arc::new(app.payment_service());
    let book = app.seed_book("Flaky Networks", dec!(45.00), true).await;

    let response = service
        .initiate(Uuid::new_v4(), book.id, None)
        .await
        .expect("initiate succeeds");

    app.gateway.set_unavailable(true);
    let poller = StatusPoller::new(service.clone())
        .with_interval(Duration::from_millis(5))
        .with_max_attempts(2);
    let outcome = poller.poll(&response.order_id).await.expect("poll survives blips");
    assert_eq!(outcome, PollOutcome::TimedOut);

    app.gateway.set_unavailable(false);
    app.gateway.set_outcome(GatewayOutcome::Failure);
    let outcome = poller.poll(&response.order_id).await.expect("poll runs");
    assert_eq!(outcome, PollOutcome::Failed);
}

#[tokio::test]
async fn my_purchases_lists_only_the_callers_transactions() {
    let app = TestApp::new().await;
    let service = app.payment_service();
    let book = app.seed_book("Ledger Lore", dec!(25.00), true).await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    service.initiate(alice, book.id, None).await.expect("alice 1");
    service.initiate(alice, book.id, None).await.expect("alice 2");
    service.initiate(bob, book.id, None).await.expect("bob 1");

    let (items, total) = service
        .my_purchases(alice, 1, 20)
        .await
        .expect("listing works");
    assert_eq!(total, 2);
    assert!(items.iter().all(|t| t.user_id == alice));
}
