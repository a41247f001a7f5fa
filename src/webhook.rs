//! Component H: webhook dispatcher (spec §4.H).
//!
//! Grounded directly in the teacher's `daemon/src/rpc/callback.rs`
//! (`CallbackService`: a `reqwest::Client` built once with a timeout,
//! `tokio::spawn` fire-and-forget delivery, a fixed backoff table) and
//! `common/src/api/callback.rs` (HMAC-SHA256 signing of the exact wire
//! body). Unlike the teacher, delivery is decoupled from the inbound
//! request's lifetime but not from the *process*: `enqueue` hands back a
//! `JoinHandle` that `main.rs` collects so shutdown can drain in-flight
//! deliveries (spec §5).

use crate::models::{WebhookDeliveryLog, WebhookDeliveryStatus};
use crate::store::Store;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type HmacSha256 = Hmac<Sha256>;

/// Accept only `http://`/`https://` webhook URLs (spec §4.H "URL policy").
/// Checked at request-parse time by the HTTP surface; re-exposed here so
/// the dispatcher itself never sends to a non-HTTP scheme even if a
/// caller bypasses the parse-time check.
pub fn is_valid_webhook_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope<T: Serialize> {
    pub event: &'static str,
    pub timestamp: String,
    pub data: T,
}

pub struct WebhookConfig {
    pub url: String,
    pub secret: Option<String>,
    pub attempts: u32,
    pub backoff: Vec<Duration>,
    pub timeout: Duration,
}

/// Tracks in-flight delivery tasks so the process can drain them at
/// shutdown (spec §5: "already enqueued webhook tasks run to completion").
/// This is infrastructure bookkeeping for the dispatcher's own contract,
/// the same kind of internal `RwLock` state the teacher's `CallbackService`
/// keeps for idempotency keys — not the business-state cache/decision
/// memory the "configuration is the only shared state" rule (spec §5)
/// rules out.
pub struct WebhookDispatcher {
    http: reqwest::Client,
    store: Arc<dyn Store>,
    pending: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            pending: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a delivery and return immediately; the actual send runs as
    /// a detached background task (spec §4.H "returns immediately").
    pub fn enqueue<T: Serialize + Send + 'static>(
        &self,
        config: WebhookConfig,
        verification_id: Option<String>,
        payload: WebhookEnvelope<T>,
    ) {
        let http = self.http.clone();
        let store = self.store.clone();

        let handle = tokio::spawn(async move {
            deliver(http, store, config, verification_id, payload).await;
        });

        if let Ok(mut pending) = self.pending.try_lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Await every still-outstanding delivery task. Called from `main.rs`
    /// during graceful shutdown, after the HTTP listener has stopped
    /// accepting new connections.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn deliver<T: Serialize>(
    http: reqwest::Client,
    store: Arc<dyn Store>,
    config: WebhookConfig,
    verification_id: Option<String>,
    payload: WebhookEnvelope<T>,
) {
    let body = match serde_json::to_string(&payload) {
        Ok(body) => body,
        Err(err) => {
            log::error!("failed to serialize webhook payload: {err}");
            return;
        }
    };

    let delivery_id = uuid::Uuid::new_v4().to_string();
    let log_entry = WebhookDeliveryLog {
        delivery_id: delivery_id.clone(),
        verification_id,
        webhook_url: config.url.clone(),
        payload: body.clone(),
        status: WebhookDeliveryStatus::Pending,
        http_status: None,
        response_snippet: None,
        error_message: None,
        attempt: 0,
        created_at: chrono::Utc::now(),
        completed_at: None,
    };
    if let Err(err) = store.log_webhook_delivery(&log_entry).await {
        log::warn!("failed to write webhook delivery log entry: {err}");
    }

    let signature = config
        .secret
        .as_ref()
        .map(|secret| sign(secret.as_bytes(), &body));

    let max_attempts = config.attempts.max(1) as usize;
    let mut last_status: Option<u16> = None;
    let mut last_snippet: Option<String> = None;
    let mut last_error: Option<String> = None;
    let mut succeeded = false;
    let mut attempts_made = 0u32;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = config
                .backoff
                .get(attempt)
                .copied()
                .unwrap_or_else(|| Duration::from_secs(5));
            tokio::time::sleep(delay).await;
        }
        attempts_made = (attempt + 1) as u32;

        match send_once(&http, &config, &payload.event, &body, signature.as_deref()).await {
            AttemptOutcome::Success(status, snippet) => {
                last_status = Some(status);
                last_snippet = Some(snippet);
                succeeded = true;
                break;
            }
            AttemptOutcome::PermanentFailure(status, snippet) => {
                last_status = Some(status);
                last_snippet = Some(snippet);
                break;
            }
            AttemptOutcome::Retryable(status, error) => {
                last_status = status;
                last_error = Some(error);
            }
        }
    }

    let final_status = if succeeded {
        WebhookDeliveryStatus::Succeeded
    } else {
        WebhookDeliveryStatus::Failed
    };

    if let Err(err) = store
        .update_webhook_delivery(
            &delivery_id,
            final_status,
            attempts_made,
            last_status,
            last_snippet.as_deref(),
            last_error.as_deref(),
        )
        .await
    {
        log::warn!("failed to update webhook delivery log entry: {err}");
    }

    if succeeded {
        log::debug!(
            "webhook delivered to {} after {} attempt(s)",
            config.url,
            attempts_made
        );
    } else {
        log::warn!(
            "webhook delivery to {} failed after {} attempt(s)",
            config.url,
            attempts_made
        );
    }
}

enum AttemptOutcome {
    Success(u16, String),
    PermanentFailure(u16, String),
    Retryable(Option<u16>, String),
}

async fn send_once(
    http: &reqwest::Client,
    config: &WebhookConfig,
    event: &str,
    body: &str,
    signature: Option<&str>,
) -> AttemptOutcome {
    let mut request = http
        .post(&config.url)
        .timeout(config.timeout)
        .header("Content-Type", "application/json")
        .header("X-Webhook-Event", event)
        .header("X-Webhook-Timestamp", chrono::Utc::now().to_rfc3339())
        .body(body.to_string());

    if let Some(signature) = signature {
        request = request.header("X-Webhook-Signature", format!("sha256={signature}"));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return AttemptOutcome::Retryable(None, err.to_string()),
    };

    let status = response.status();
    let snippet = response_snippet(response).await;

    if status.is_success() {
        return AttemptOutcome::Success(status.as_u16(), snippet);
    }

    if status.as_u16() == 429 || status.is_server_error() {
        return AttemptOutcome::Retryable(Some(status.as_u16()), snippet);
    }

    // Any other 4xx is a permanent failure: no retry (spec §4.H).
    AttemptOutcome::PermanentFailure(status.as_u16(), snippet)
}

const SNIPPET_MAX_LEN: usize = 500;

async fn response_snippet(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(text) => text.chars().take(SNIPPET_MAX_LEN).collect(),
        Err(_) => String::new(),
    }
}

/// HMAC-SHA256 over the exact serialized body sent on the wire, hex
/// encoded. `body` must be byte-identical to what is later POSTed (spec
/// §8 invariant 5).
pub fn sign(secret: &[u8], body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(is_valid_webhook_url("https://example.com/hook"));
        assert!(is_valid_webhook_url("http://example.com/hook"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(!is_valid_webhook_url("ftp://example.com/hook"));
        assert!(!is_valid_webhook_url("javascript:alert(1)"));
        assert!(!is_valid_webhook_url("example.com/hook"));
    }

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let body = r#"{"event":"verification.completed"}"#;
        let sig_a = sign(b"secret-a", body);
        let sig_b = sign(b"secret-a", body);
        let sig_c = sign(b"secret-b", body);
        assert_eq!(sig_a, sig_b);
        assert_ne!(sig_a, sig_c);
        assert_eq!(sig_a.len(), 64);
        assert!(sig_a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_changes_if_body_changes() {
        let sig_a = sign(b"secret", r#"{"a":1}"#);
        let sig_b = sign(b"secret", r#"{"a":2}"#);
        assert_ne!(sig_a, sig_b);
    }
}
