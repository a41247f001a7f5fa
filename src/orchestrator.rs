//! Components I and J: single-verify and batch orchestrators (spec §4.I, §4.J).

use crate::allowance::AllowanceGate;
use crate::cache::VerificationCache;
use crate::config::Config;
use crate::decision::decide;
use crate::error::ApiError;
use crate::ledger::LedgerClient;
use crate::models::{Thresholds, VerificationRecord, WalletAddress};
use crate::ratelimit::RateLimiter;
use crate::store::Store;
use crate::webhook::{is_valid_webhook_url, WebhookConfig, WebhookDispatcher, WebhookEnvelope};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// One verification request, already parsed and field-validated by the
/// HTTP surface (spec §4.I step 2).
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub wallet_address: String,
    pub business_name: String,
    pub external_user_id: String,
    pub force_refresh: bool,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub thresholds: Thresholds,
}

/// Outcome of a single verification pipeline run.
pub struct VerifyOutcome {
    pub cached: bool,
    pub cache_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub webhook_queued: bool,
    pub record: VerificationRecord,
}

pub struct Engine {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub ledger: Arc<dyn LedgerClient>,
    pub webhooks: Arc<WebhookDispatcher>,
}

impl Engine {
    /// Drives components A through H for one request, in the order
    /// spec §4.I specifies. Any step's refusal short-circuits with the
    /// matching [`ApiError`].
    pub async fn verify_single(&self, request: VerifyRequest) -> Result<VerifyOutcome, ApiError> {
        // 3. Rate limit
        let limiter = RateLimiter::new(
            self.store.as_ref(),
            self.config.rate_max,
            self.config.rate_window,
        );
        let rate_status = limiter.check(&request.wallet_address).await?;
        if !rate_status.allowed {
            return Err(ApiError::RateLimited {
                limit: self.config.rate_max,
                reset_at: rate_status.reset_at,
            });
        }

        // 4. Address validation
        if !crate::address::is_valid_wallet_address(&request.wallet_address) {
            return Err(ApiError::bad_request(format!(
                "Invalid wallet address format: {}",
                request.wallet_address
            )));
        }
        let wallet = WalletAddress(request.wallet_address.clone());

        // 5. Cache read (unless forceRefresh)
        if !request.force_refresh {
            let cache = VerificationCache::new(self.store.as_ref(), self.config.cache_ttl);
            if let Some(hit) = cache.lookup(&request.wallet_address).await? {
                return Ok(VerifyOutcome {
                    cached: true,
                    cache_expires_at: Some(hit.expires_at),
                    webhook_queued: false,
                    record: hit.record,
                });
            }
        }

        // 6. Allowance
        let allowance_gate = AllowanceGate::new(self.store.as_ref());
        allowance_gate.check(&request.external_user_id).await?;

        // 7. Ledger scan
        let counters = self.ledger.fetch_payments(&wallet).await?;

        // 8. Decision
        let decision = decide(counters, request.thresholds);

        // 9. Persist
        let record = self
            .store
            .upsert_verification(
                &request.wallet_address,
                &request.business_name,
                &request.external_user_id,
                counters,
                decision,
            )
            .await?;

        // 10. Increment usage, best-effort
        allowance_gate.increment(&request.external_user_id).await;

        // 11. Enqueue webhook
        let webhook_queued = if let Some(url) = request.webhook_url.as_ref() {
            if is_valid_webhook_url(url) {
                let envelope = WebhookEnvelope {
                    event: "verification.completed",
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    data: record.clone(),
                };
                let config = WebhookConfig {
                    url: url.clone(),
                    secret: request.webhook_secret.clone(),
                    attempts: self.config.webhook_attempts,
                    backoff: self.config.webhook_backoff.clone(),
                    timeout: self.config.webhook_timeout,
                };
                self.webhooks
                    .enqueue(config, Some(record.id.clone()), envelope);
                true
            } else {
                log::warn!("dropping webhook enqueue with invalid URL scheme: {url}");
                false
            }
        } else {
            false
        };

        Ok(VerifyOutcome {
            cached: false,
            cache_expires_at: None,
            webhook_queued,
            record,
        })
    }

    /// Component J: bounded-concurrency fan-out over `verify_single`.
    /// An entry's failure never aborts siblings; results come back in
    /// input order (spec §4.J) even though the workers that produce them
    /// complete out of order.
    pub async fn verify_batch(
        &self,
        requests: Vec<VerifyRequest>,
        concurrency: usize,
    ) -> Vec<Result<VerifyOutcome, ApiError>> {
        let mut indexed: Vec<(usize, Result<VerifyOutcome, ApiError>)> = stream::iter(
            requests.into_iter().enumerate(),
        )
        .map(|(index, request)| async move { (index, self.verify_single(request).await) })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}
