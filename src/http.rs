//! Component K: HTTP surface (spec §4.K, §6).
//!
//! Grounded on the teacher's `daemon/src/a2a/auth.rs` (header-based auth
//! tried in a fixed order, constant-time key comparison) and the CORS
//! reflect-origin pattern common to its HTTP-facing daemons. Request
//! validation happens entirely in this module; everything downstream of it
//! only ever sees an already-validated [`VerifyRequest`].

use crate::config::Config;
use crate::error::ApiError;
use crate::models::{Thresholds, VerificationRecord, VerificationStatus};
use crate::orchestrator::{Engine, VerifyOutcome, VerifyRequest};
use crate::webhook::{is_valid_webhook_url, WebhookConfig, WebhookDispatcher, WebhookEnvelope};
use actix_cors::Cors;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Header set the CORS layer reflects back on preflight (spec §4.K).
const ALLOWED_HEADERS: [&str; 5] = [
    "authorization",
    "x-client-info",
    "apikey",
    "content-type",
    "x-api-key",
];

/// Builds the CORS middleware for the service (spec §4.K "CORS preflight
/// is allowed; the response reflects the Origin").
pub fn cors() -> Cors {
    // `allow_any_origin()` without `send_wildcard()` echoes the caller's
    // own `Origin` header back rather than a literal `*` (spec §4.K "the
    // response reflects the Origin").
    let mut cors = Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .max_age(3600);
    for header in ALLOWED_HEADERS {
        cors = cors.allowed_header(header);
    }
    cors
}

/// Constant-time comparison of a caller-supplied header value against a
/// configured secret. Length mismatch may short-circuit (spec §9: "length
/// mismatch may return early"); equal-length slices are compared without
/// branching on the first mismatch.
fn header_matches(candidate: &str, expected: &str) -> bool {
    if candidate.len() != expected.len() {
        return false;
    }
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Either `x-api-key` or the internal trust header (`apikey`, the
/// Supabase-style anon-key header already present in the allowed CORS
/// header set) must match the configured secret (spec §6 "Authentication").
fn authenticate(req: &HttpRequest, config: &Config) -> Result<(), ApiError> {
    let header_value = |name: &str| -> Option<String> {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if let (Some(expected), Some(candidate)) = (config.api_key.as_ref(), header_value("x-api-key"))
    {
        if header_matches(&candidate, expected) {
            return Ok(());
        }
    }

    if let (Some(expected), Some(candidate)) =
        (config.internal_trust_key.as_ref(), header_value("apikey"))
    {
        if header_matches(&candidate, expected) {
            return Ok(());
        }
    }

    Err(ApiError::Unauthorized)
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequestBody {
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
    #[serde(rename = "businessName")]
    pub business_name: String,
    #[serde(rename = "externalUserId")]
    pub external_user_id: String,
    #[serde(rename = "forceRefresh", default)]
    pub force_refresh: bool,
    #[serde(rename = "webhookUrl", default)]
    pub webhook_url: Option<String>,
    #[serde(rename = "webhookSecret", default)]
    pub webhook_secret: Option<String>,
    #[serde(rename = "minTransactions", default)]
    pub min_transactions: Option<u64>,
    #[serde(rename = "minCreditedTransactions", default)]
    pub min_credited_transactions: Option<u64>,
    #[serde(rename = "minUniqueWallets", default)]
    pub min_unique_wallets: Option<u64>,
}

impl VerifyRequestBody {
    fn into_request(self, default: Thresholds) -> Result<VerifyRequest, ApiError> {
        if self.wallet_address.trim().is_empty() {
            return Err(ApiError::bad_request("walletAddress is required"));
        }
        if self.business_name.trim().is_empty() {
            return Err(ApiError::bad_request("businessName is required"));
        }
        if self.external_user_id.trim().is_empty() {
            return Err(ApiError::bad_request("externalUserId is required"));
        }
        if let Some(url) = self.webhook_url.as_ref() {
            if !is_valid_webhook_url(url) {
                return Err(ApiError::bad_request(format!(
                    "webhookUrl must be an http(s) URL: {url}"
                )));
            }
        }

        let thresholds = Thresholds {
            min_total: self.min_transactions.unwrap_or(default.min_total),
            min_credited: self
                .min_credited_transactions
                .unwrap_or(default.min_credited),
            min_unique: self.min_unique_wallets.unwrap_or(default.min_unique),
        };

        Ok(VerifyRequest {
            wallet_address: self.wallet_address,
            business_name: self.business_name,
            external_user_id: self.external_user_id,
            force_refresh: self.force_refresh,
            webhook_url: self.webhook_url,
            webhook_secret: self.webhook_secret,
            thresholds,
        })
    }
}

#[derive(Debug, Serialize)]
struct VerificationData {
    #[serde(rename = "verificationId")]
    verification_id: String,
    #[serde(rename = "walletAddress")]
    wallet_address: String,
    #[serde(rename = "businessName")]
    business_name: String,
    #[serde(rename = "totalTransactions")]
    total_transactions: u64,
    #[serde(rename = "uniqueWallets")]
    unique_wallets: u64,
    #[serde(rename = "meetsRequirements")]
    meets_requirements: bool,
    #[serde(rename = "failureReason")]
    failure_reason: Option<String>,
    #[serde(rename = "verificationStatus")]
    verification_status: VerificationStatus,
    #[serde(rename = "verifiedAt")]
    verified_at: chrono::DateTime<chrono::Utc>,
}

impl From<&VerificationRecord> for VerificationData {
    fn from(record: &VerificationRecord) -> Self {
        Self {
            verification_id: record.id.clone(),
            wallet_address: record.wallet_address.0.clone(),
            business_name: record.business_name.clone(),
            total_transactions: record.counters.total,
            unique_wallets: record.counters.unique_counterparties,
            meets_requirements: record.decision.meets_requirements(),
            failure_reason: record.decision.failure_reason.clone(),
            verification_status: record.decision.status,
            verified_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct VerifyResponseBody {
    success: bool,
    cached: bool,
    #[serde(rename = "cacheExpiresAt", skip_serializing_if = "Option::is_none")]
    cache_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "webhookQueued")]
    webhook_queued: bool,
    data: VerificationData,
}

fn verify_response(outcome: &VerifyOutcome) -> HttpResponse {
    let body = VerifyResponseBody {
        success: true,
        cached: outcome.cached,
        cache_expires_at: outcome.cache_expires_at,
        webhook_queued: outcome.webhook_queued,
        data: VerificationData::from(&outcome.record),
    };

    let mut builder = HttpResponse::Ok();
    builder.insert_header(("X-Cache", if outcome.cached { "HIT" } else { "MISS" }));
    if let Some(expires) = outcome.cache_expires_at {
        builder.insert_header(("X-Cache-Expires", expires.to_rfc3339()));
    }
    builder.json(body)
}

/// `POST /verify-business` (spec §6).
pub async fn verify_business(
    req: HttpRequest,
    engine: web::Data<Engine>,
    body: web::Json<VerifyRequestBody>,
) -> Result<HttpResponse, ApiError> {
    authenticate(&req, &engine.config)?;
    let request = body.into_inner().into_request(engine.config.default_thresholds)?;
    let outcome = engine.verify_single(request).await?;
    Ok(verify_response(&outcome))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequestBody {
    verifications: Vec<VerifyRequestBody>,
    #[serde(rename = "forceRefresh", default)]
    force_refresh: bool,
    #[serde(rename = "webhookUrl", default)]
    webhook_url: Option<String>,
    #[serde(rename = "webhookSecret", default)]
    webhook_secret: Option<String>,
    #[serde(rename = "minTransactions", default)]
    min_transactions: Option<u64>,
    #[serde(rename = "minCreditedTransactions", default)]
    min_credited_transactions: Option<u64>,
    #[serde(rename = "minUniqueWallets", default)]
    min_unique_wallets: Option<u64>,
}

#[derive(Debug, Serialize)]
struct BatchEntryResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<VerificationData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchResponseBody {
    success: bool,
    #[serde(rename = "batchId")]
    batch_id: String,
    #[serde(rename = "totalRequested")]
    total_requested: usize,
    #[serde(rename = "totalProcessed")]
    total_processed: usize,
    #[serde(rename = "totalSuccessful")]
    total_successful: usize,
    #[serde(rename = "totalFailed")]
    total_failed: usize,
    results: Vec<BatchEntryResult>,
}

/// `POST /verify-business-batch` (spec §4.J, §6).
pub async fn verify_business_batch(
    req: HttpRequest,
    engine: web::Data<Engine>,
    webhooks: web::Data<WebhookDispatcher>,
    body: web::Json<BatchRequestBody>,
) -> Result<HttpResponse, ApiError> {
    authenticate(&req, &engine.config)?;
    let body = body.into_inner();

    if body.verifications.is_empty() {
        return Err(ApiError::bad_request("verifications must not be empty"));
    }
    if body.verifications.len() > engine.config.batch_max {
        return Err(ApiError::bad_request(format!(
            "batch exceeds maximum of {} entries",
            engine.config.batch_max
        )));
    }
    if let Some(url) = body.webhook_url.as_ref() {
        if !is_valid_webhook_url(url) {
            return Err(ApiError::bad_request(format!(
                "webhookUrl must be an http(s) URL: {url}"
            )));
        }
    }

    let default = Thresholds {
        min_total: body
            .min_transactions
            .unwrap_or(engine.config.default_thresholds.min_total),
        min_credited: body
            .min_credited_transactions
            .unwrap_or(engine.config.default_thresholds.min_credited),
        min_unique: body
            .min_unique_wallets
            .unwrap_or(engine.config.default_thresholds.min_unique),
    };

    // Each entry is validated independently; a malformed entry becomes an
    // `Err` slot rather than aborting the batch (spec §4.J).
    let mut requests = Vec::with_capacity(body.verifications.len());
    for mut entry in body.verifications {
        entry.force_refresh = entry.force_refresh || body.force_refresh;
        requests.push(entry.into_request(default));
    }

    let total_requested = requests.len();
    let (ok_requests, mut slots): (Vec<_>, Vec<Option<Result<VerifyOutcome, ApiError>>>) = {
        let mut ok_requests = Vec::new();
        let mut slots = Vec::with_capacity(requests.len());
        for entry in requests {
            match entry {
                Ok(request) => {
                    ok_requests.push(request);
                    slots.push(None);
                }
                Err(err) => slots.push(Some(Err(err))),
            }
        }
        (ok_requests, slots)
    };

    let mut outcomes = engine
        .verify_batch(ok_requests, engine.config.batch_concurrency)
        .await
        .into_iter();

    for slot in slots.iter_mut() {
        if slot.is_none() {
            *slot = Some(outcomes.next().expect("one outcome per dispatched request"));
        }
    }

    let mut total_successful = 0usize;
    let mut total_failed = 0usize;
    let mut results = Vec::with_capacity(slots.len());
    let mut batch_records = Vec::new();

    for slot in slots {
        match slot.expect("every slot filled above") {
            Ok(outcome) => {
                total_successful += 1;
                batch_records.push(outcome.record.clone());
                results.push(BatchEntryResult {
                    success: true,
                    data: Some(VerificationData::from(&outcome.record)),
                    error: None,
                });
            }
            Err(err) => {
                total_failed += 1;
                results.push(BatchEntryResult {
                    success: false,
                    data: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let batch_id = uuid::Uuid::new_v4().to_string();

    if let Some(url) = body.webhook_url.as_ref() {
        let envelope = WebhookEnvelope {
            event: "batch.verification.completed",
            timestamp: chrono::Utc::now().to_rfc3339(),
            data: batch_records,
        };
        let config = WebhookConfig {
            url: url.clone(),
            secret: body.webhook_secret.clone(),
            attempts: engine.config.webhook_attempts,
            backoff: engine.config.webhook_backoff.clone(),
            timeout: engine.config.webhook_timeout,
        };
        webhooks.enqueue(config, None, envelope);
    }

    let response = BatchResponseBody {
        success: true,
        batch_id,
        total_requested,
        total_processed: total_successful + total_failed,
        total_successful,
        total_failed,
        results,
    };

    Ok(HttpResponse::Ok().json(response))
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// `GET /health` (SPEC_FULL §6.1): unconditional liveness probe, no auth,
/// no rate limit.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthBody { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_requires_equal_length() {
        assert!(!header_matches("short", "muchlongersecret"));
        assert!(header_matches("secret-123", "secret-123"));
        assert!(!header_matches("secret-124", "secret-123"));
    }

    #[test]
    fn rejects_body_with_blank_wallet() {
        let body = VerifyRequestBody {
            wallet_address: "".to_string(),
            business_name: "Acme".to_string(),
            external_user_id: "user-1".to_string(),
            force_refresh: false,
            webhook_url: None,
            webhook_secret: None,
            min_transactions: None,
            min_credited_transactions: None,
            min_unique_wallets: None,
        };
        let err = body.into_request(Thresholds::default()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn rejects_non_http_webhook_url() {
        let body = VerifyRequestBody {
            wallet_address: format!("G{}", "A".repeat(55)),
            business_name: "Acme".to_string(),
            external_user_id: "user-1".to_string(),
            force_refresh: false,
            webhook_url: Some("javascript:alert(1)".to_string()),
            webhook_secret: None,
            min_transactions: None,
            min_credited_transactions: None,
            min_unique_wallets: None,
        };
        let err = body.into_request(Thresholds::default()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn applies_threshold_overrides() {
        let body = VerifyRequestBody {
            wallet_address: format!("G{}", "A".repeat(55)),
            business_name: "Acme".to_string(),
            external_user_id: "user-1".to_string(),
            force_refresh: true,
            webhook_url: None,
            webhook_secret: None,
            min_transactions: Some(10),
            min_credited_transactions: None,
            min_unique_wallets: None,
        };
        let request = body.into_request(Thresholds::default()).unwrap();
        assert_eq!(request.thresholds.min_total, 10);
        assert_eq!(request.thresholds.min_credited, 50);
        assert!(request.force_refresh);
    }
}
