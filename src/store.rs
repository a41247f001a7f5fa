//! The persistence port (spec §6 "Persistence (consumed)").
//!
//! The core depends only on this trait; the relational store and its
//! migrations are out of scope (spec §1). `PgStore` is the one concrete
//! adapter, built over `sqlx::PgPool` the way the pack's
//! `TransactionRepository`/`WebhookRepository` wrap a pool per table.
//!
//! Queries use sqlx's runtime `query`/`query_as` API rather than the
//! `query!`/`query_as!` compile-time macros: the macros need either a live
//! database connection or a committed offline query cache at build time,
//! neither of which this crate ships.

use crate::models::{
    Allowance, Counters, Decision, RateLimitStatus, VerificationRecord, WebhookDeliveryLog,
    WebhookDeliveryStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert on `wallet_address`: insert if absent, else replace the
    /// mutable fields and bump `updated_at` (spec §4.G).
    async fn upsert_verification(
        &self,
        wallet_address: &str,
        business_name: &str,
        external_user_id: &str,
        counters: Counters,
        decision: Decision,
    ) -> Result<VerificationRecord, sqlx::Error>;

    async fn get_verification_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<Option<VerificationRecord>, sqlx::Error>;

    /// Atomic check-and-increment sliding window (spec §4.C). Returns the
    /// status *after* the attempted increment.
    async fn rate_limit(
        &self,
        wallet_address: &str,
        max: u32,
        window_secs: i64,
    ) -> Result<RateLimitStatus, sqlx::Error>;

    async fn check_allowance(&self, external_user_id: &str) -> Result<Allowance, sqlx::Error>;

    async fn increment_usage(&self, external_user_id: &str) -> Result<(), sqlx::Error>;

    async fn log_webhook_delivery(&self, entry: &WebhookDeliveryLog) -> Result<(), sqlx::Error>;

    async fn update_webhook_delivery(
        &self,
        delivery_id: &str,
        status: WebhookDeliveryStatus,
        attempt: u32,
        http_status: Option<u16>,
        response_snippet: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error>;
}

/// `sqlx::PgPool`-backed implementation of [`Store`].
///
/// Expected schema (created by migrations owned outside this core, per
/// spec §1):
///
/// ```sql
/// CREATE TABLE verifications (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     wallet_address TEXT UNIQUE NOT NULL,
///     business_name TEXT NOT NULL,
///     external_user_id TEXT NOT NULL,
///     total_transactions BIGINT NOT NULL,
///     credited_transactions BIGINT NOT NULL,
///     unique_wallets BIGINT NOT NULL,
///     status TEXT NOT NULL,
///     failure_reason TEXT,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
///
/// CREATE TABLE rate_buckets (
///     wallet_address TEXT PRIMARY KEY,
///     count INT NOT NULL,
///     window_start TIMESTAMPTZ NOT NULL
/// );
///
/// CREATE TABLE subscription_allowances (
///     external_user_id TEXT PRIMARY KEY,
///     allowed BOOLEAN NOT NULL,
///     remaining BIGINT NOT NULL,
///     tier TEXT NOT NULL,
///     expires_at TIMESTAMPTZ
/// );
///
/// CREATE TABLE webhook_deliveries (
///     delivery_id UUID PRIMARY KEY,
///     verification_id UUID,
///     webhook_url TEXT NOT NULL,
///     payload TEXT NOT NULL,
///     status TEXT NOT NULL,
///     http_status INT,
///     response_snippet TEXT,
///     error_message TEXT,
///     attempt INT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     completed_at TIMESTAMPTZ
/// );
/// ```
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct VerificationRow {
    id: uuid::Uuid,
    wallet_address: String,
    business_name: String,
    external_user_id: String,
    total_transactions: i64,
    credited_transactions: i64,
    unique_wallets: i64,
    status: String,
    failure_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<VerificationRow> for VerificationRecord {
    fn from(row: VerificationRow) -> Self {
        use crate::models::{VerificationStatus, WalletAddress};

        let status = match row.status.as_str() {
            "approved" => VerificationStatus::Approved,
            "under_review" => VerificationStatus::UnderReview,
            _ => VerificationStatus::Rejected,
        };

        VerificationRecord {
            id: row.id.to_string(),
            wallet_address: WalletAddress(row.wallet_address),
            business_name: row.business_name,
            external_user_id: row.external_user_id,
            counters: Counters {
                total: row.total_transactions as u64,
                credited: row.credited_transactions as u64,
                unique_counterparties: row.unique_wallets as u64,
            },
            decision: Decision {
                status,
                failure_reason: row.failure_reason,
            },
            updated_at: row.updated_at,
        }
    }
}

const VERIFICATION_COLUMNS: &str = "id, wallet_address, business_name, external_user_id, \
     total_transactions, credited_transactions, unique_wallets, status, failure_reason, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn upsert_verification(
        &self,
        wallet_address: &str,
        business_name: &str,
        external_user_id: &str,
        counters: Counters,
        decision: Decision,
    ) -> Result<VerificationRecord, sqlx::Error> {
        let status = decision.status.to_string();
        let sql = format!(
            "INSERT INTO verifications \
                (wallet_address, business_name, external_user_id, \
                 total_transactions, credited_transactions, unique_wallets, \
                 status, failure_reason, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
             ON CONFLICT (wallet_address) DO UPDATE SET \
                business_name = EXCLUDED.business_name, \
                external_user_id = EXCLUDED.external_user_id, \
                total_transactions = EXCLUDED.total_transactions, \
                credited_transactions = EXCLUDED.credited_transactions, \
                unique_wallets = EXCLUDED.unique_wallets, \
                status = EXCLUDED.status, \
                failure_reason = EXCLUDED.failure_reason, \
                updated_at = now() \
             RETURNING {VERIFICATION_COLUMNS}"
        );

        let row: VerificationRow = sqlx::query_as(&sql)
            .bind(wallet_address)
            .bind(business_name)
            .bind(external_user_id)
            .bind(counters.total as i64)
            .bind(counters.credited as i64)
            .bind(counters.unique_counterparties as i64)
            .bind(status)
            .bind(decision.failure_reason)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn get_verification_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<Option<VerificationRecord>, sqlx::Error> {
        let sql =
            format!("SELECT {VERIFICATION_COLUMNS} FROM verifications WHERE wallet_address = $1");

        let row: Option<VerificationRow> = sqlx::query_as(&sql)
            .bind(wallet_address)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn rate_limit(
        &self,
        wallet_address: &str,
        max: u32,
        window_secs: i64,
    ) -> Result<RateLimitStatus, sqlx::Error> {
        // Single UPSERT under a row lock: reset the window if it has
        // elapsed, otherwise unconditionally increment. The CASE
        // expressions make the whole read-modify-write atomic against
        // concurrent callers for the same wallet (spec §4.C). The counter
        // is never capped at `max`: it keeps counting attempts past the
        // limit, so `count <= max` stays a correct test for every request
        // in the window, not just the one that first reached it.
        let row = sqlx::query(
            "INSERT INTO rate_buckets (wallet_address, count, window_start) \
             VALUES ($1, 1, now()) \
             ON CONFLICT (wallet_address) DO UPDATE SET \
                count = CASE \
                    WHEN now() - rate_buckets.window_start >= make_interval(secs => $2) \
                        THEN 1 \
                    ELSE rate_buckets.count + 1 \
                END, \
                window_start = CASE \
                    WHEN now() - rate_buckets.window_start >= make_interval(secs => $2) \
                        THEN now() \
                    ELSE rate_buckets.window_start \
                END \
             RETURNING count, window_start",
        )
        .bind(wallet_address)
        .bind(window_secs as f64)
        .fetch_one(&self.pool)
        .await?;

        let count: i32 = row.try_get("count")?;
        let window_start: DateTime<Utc> = row.try_get("window_start")?;

        let allowed = count <= max as i32;
        let reset_at = window_start + chrono::Duration::seconds(window_secs);

        Ok(RateLimitStatus {
            allowed,
            current_count: count as u32,
            reset_at,
        })
    }

    async fn check_allowance(&self, external_user_id: &str) -> Result<Allowance, sqlx::Error> {
        // The subscription store itself is out of scope (spec §1); this
        // adapter consults a table maintained by that external system and
        // surfaces it as the opaque `Allowance` value.
        let row = sqlx::query(
            "SELECT allowed, remaining, tier, expires_at \
             FROM subscription_allowances WHERE external_user_id = $1",
        )
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Allowance {
                allowed: row.try_get("allowed")?,
                remaining: row.try_get("remaining")?,
                tier: row.try_get("tier")?,
                expires_at: row.try_get("expires_at")?,
            },
            // No subscription row: treat as the default free tier with no
            // usage recorded yet, rather than failing the request.
            None => Allowance {
                allowed: true,
                remaining: -1,
                tier: "free".to_string(),
                expires_at: None,
            },
        })
    }

    async fn increment_usage(&self, external_user_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE subscription_allowances SET remaining = GREATEST(remaining - 1, 0) \
             WHERE external_user_id = $1 AND remaining > 0",
        )
        .bind(external_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_webhook_delivery(&self, entry: &WebhookDeliveryLog) -> Result<(), sqlx::Error> {
        let status = delivery_status_str(entry.status);

        sqlx::query(
            "INSERT INTO webhook_deliveries \
                (delivery_id, verification_id, webhook_url, payload, status, \
                 http_status, response_snippet, error_message, attempt, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&entry.delivery_id)
        .bind(&entry.verification_id)
        .bind(&entry.webhook_url)
        .bind(&entry.payload)
        .bind(status)
        .bind(entry.http_status.map(|v| v as i32))
        .bind(&entry.response_snippet)
        .bind(&entry.error_message)
        .bind(entry.attempt as i32)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = $2, attempt = $3, http_status = $4, response_snippet = $5, \
                 error_message = $6, completed_at = now() \
             WHERE delivery_id = $1",
        )
        .bind(delivery_id)
        .bind(delivery_status_str(status))
        .bind(attempt as i32)
        .bind(http_status.map(|v| v as i32))
        .bind(response_snippet)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn delivery_status_str(status: WebhookDeliveryStatus) -> &'static str {
    match status {
        WebhookDeliveryStatus::Pending => "pending",
        WebhookDeliveryStatus::Succeeded => "succeeded",
        WebhookDeliveryStatus::Failed => "failed",
    }
}
