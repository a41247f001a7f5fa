//! Integration tests for the webhook dispatcher (component H), exercised
//! against a real `wiremock` HTTP double — the teacher's own
//! `CallbackService` tests stub at the config/field level (no outbound
//! HTTP double), but `WebhookDispatcher`'s retry/backoff and HMAC signing
//! need one to verify what actually went out on the wire.

use async_trait::async_trait;
use business_verifier::models::{
    Allowance, Counters, Decision, RateLimitStatus, VerificationRecord, WebhookDeliveryLog,
    WebhookDeliveryStatus,
};
use business_verifier::store::Store;
use business_verifier::webhook::{sign, WebhookConfig, WebhookDispatcher, WebhookEnvelope};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingStore {
    deliveries: Mutex<Vec<WebhookDeliveryLog>>,
}

#[async_trait]
impl Store for RecordingStore {
    async fn upsert_verification(
        &self,
        _wallet_address: &str,
        _business_name: &str,
        _external_user_id: &str,
        _counters: Counters,
        _decision: Decision,
    ) -> Result<VerificationRecord, sqlx::Error> {
        unimplemented!("not exercised by webhook dispatcher tests")
    }

    async fn get_verification_by_wallet(
        &self,
        _wallet_address: &str,
    ) -> Result<Option<VerificationRecord>, sqlx::Error> {
        unimplemented!("not exercised by webhook dispatcher tests")
    }

    async fn rate_limit(
        &self,
        _wallet_address: &str,
        _max: u32,
        _window_secs: i64,
    ) -> Result<RateLimitStatus, sqlx::Error> {
        unimplemented!("not exercised by webhook dispatcher tests")
    }

    async fn check_allowance(&self, _external_user_id: &str) -> Result<Allowance, sqlx::Error> {
        unimplemented!("not exercised by webhook dispatcher tests")
    }

    async fn increment_usage(&self, _external_user_id: &str) -> Result<(), sqlx::Error> {
        unimplemented!("not exercised by webhook dispatcher tests")
    }

    async fn log_webhook_delivery(&self, entry: &WebhookDeliveryLog) -> Result<(), sqlx::Error> {
        self.deliveries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn update_webhook_delivery(
        &self,
        delivery_id: &str,
        status: WebhookDeliveryStatus,
        attempt: u32,
        http_status: Option<u16>,
        response_snippet: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let mut deliveries = self.deliveries.lock().await;
        let entry = deliveries
            .iter_mut()
            .find(|e| e.delivery_id == delivery_id)
            .expect("delivery logged before being updated");
        entry.status = status;
        entry.attempt = attempt;
        entry.http_status = http_status;
        entry.response_snippet = response_snippet.map(str::to_string);
        entry.error_message = error_message.map(str::to_string);
        entry.completed_at = Some(chrono::Utc::now());
        Ok(())
    }
}

// Short backoff so the test suite doesn't pay the real [0s, 1s, 5s] wall
// clock cost; the dispatcher only ever consults `WebhookConfig::backoff`
// verbatim so this exercises the exact same retry code path.
fn fast_backoff() -> Vec<Duration> {
    vec![
        Duration::from_millis(0),
        Duration::from_millis(5),
        Duration::from_millis(5),
    ]
}

async fn wait_for<F: Fn(&[WebhookDeliveryLog]) -> bool>(
    store: &RecordingStore,
    predicate: F,
) -> Vec<WebhookDeliveryLog> {
    for _ in 0..200 {
        let snapshot = store.deliveries.lock().await.clone();
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for webhook delivery to settle");
}

#[tokio::test]
async fn exhausts_three_attempts_and_marks_failed_on_repeated_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let dispatcher = WebhookDispatcher::new(store.clone());

    let config = WebhookConfig {
        url: format!("{}/hook", server.uri()),
        secret: None,
        attempts: 3,
        backoff: fast_backoff(),
        timeout: Duration::from_secs(5),
    };
    let envelope = WebhookEnvelope {
        event: "verification.completed",
        timestamp: chrono::Utc::now().to_rfc3339(),
        data: json!({ "walletAddress": "GAAAA" }),
    };
    dispatcher.enqueue(config, Some("verification-1".to_string()), envelope);
    dispatcher.drain().await;

    let deliveries = wait_for(&store, |d| {
        d.len() == 1 && d[0].status != WebhookDeliveryStatus::Pending
    })
    .await;

    assert_eq!(deliveries.len(), 1);
    let entry = &deliveries[0];
    assert_eq!(entry.status, WebhookDeliveryStatus::Failed);
    assert_eq!(entry.http_status, Some(500));
    assert_eq!(entry.verification_id.as_deref(), Some("verification-1"));
    assert!(entry.completed_at.is_some());

    // Scenario 7 (spec §8): the delivery log must show 3 attempts, not the
    // `attempt=0` the row was created with.
    assert_eq!(entry.attempt, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn stops_retrying_on_permanent_4xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let dispatcher = WebhookDispatcher::new(store.clone());

    let config = WebhookConfig {
        url: format!("{}/hook", server.uri()),
        secret: None,
        attempts: 3,
        backoff: fast_backoff(),
        timeout: Duration::from_secs(5),
    };
    let envelope = WebhookEnvelope {
        event: "verification.completed",
        timestamp: chrono::Utc::now().to_rfc3339(),
        data: json!({}),
    };
    dispatcher.enqueue(config, None, envelope);
    dispatcher.drain().await;

    let deliveries = wait_for(&store, |d| {
        d.len() == 1 && d[0].status != WebhookDeliveryStatus::Pending
    })
    .await;

    assert_eq!(deliveries[0].status, WebhookDeliveryStatus::Failed);
    assert_eq!(deliveries[0].http_status, Some(404));
    assert_eq!(deliveries[0].attempt, 1);
    // No retries after a non-429 4xx: exactly one request reached the server.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn succeeds_on_retry_after_initial_failure_and_signs_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let dispatcher = WebhookDispatcher::new(store.clone());

    let secret = "top-secret";
    let config = WebhookConfig {
        url: format!("{}/hook", server.uri()),
        secret: Some(secret.to_string()),
        attempts: 3,
        backoff: fast_backoff(),
        timeout: Duration::from_secs(5),
    };
    let data = json!({ "walletAddress": "GAAAA", "verificationStatus": "approved" });
    let envelope = WebhookEnvelope {
        event: "verification.completed",
        timestamp: "2026-07-28T00:00:00Z".to_string(),
        data: data.clone(),
    };
    let expected_body =
        serde_json::to_string(&envelope).expect("envelope serializes to the wire body");

    dispatcher.enqueue(config, Some("verification-2".to_string()), envelope);
    dispatcher.drain().await;

    let deliveries = wait_for(&store, |d| {
        d.len() == 1 && d[0].status != WebhookDeliveryStatus::Pending
    })
    .await;

    assert_eq!(deliveries[0].status, WebhookDeliveryStatus::Succeeded);
    assert_eq!(deliveries[0].http_status, Some(200));
    assert_eq!(deliveries[0].attempt, 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    // The signature sent on the wire must match HMAC-SHA256 over the exact
    // serialized body (spec §8 invariant 5), not some re-derived copy.
    let expected_signature = format!("sha256={}", sign(secret.as_bytes(), &expected_body));
    for request in &requests {
        let sig_header = request
            .headers
            .get("x-webhook-signature")
            .expect("signature header present")
            .to_str()
            .unwrap();
        assert_eq!(sig_header, expected_signature);
        assert_eq!(
            String::from_utf8(request.body.clone()).unwrap(),
            expected_body
        );
    }
}
