//! Data model for the business verification engine (see spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 56-character Stellar/Pi-style wallet address: `G` followed by 55
/// Base32 characters (`A-Z`, `2-7`). Validity is enforced by
/// [`crate::address::is_valid_wallet_address`]; this type does not
/// re-validate on construction, it is a thin newtype for API clarity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(pub String);

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Threshold tuple a decision is evaluated against. Defaults come from
/// process configuration; callers may override per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_total: u64,
    pub min_credited: u64,
    pub min_unique: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_total: 100,
            min_credited: 50,
            min_unique: 10,
        }
    }
}

/// Raw payment counters computed by the ledger scan. Always internally
/// consistent with the payments scanned: `credited <= total` and
/// `unique_counterparties <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    pub total: u64,
    pub credited: u64,
    pub unique_counterparties: u64,
}

/// Verification outcome. `under_review` is reserved and never produced by
/// this engine (spec glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Approved,
    Rejected,
    UnderReview,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::UnderReview => "under_review",
        };
        write!(f, "{s}")
    }
}

/// The result of applying the threshold rule to a set of counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub status: VerificationStatus,
    pub failure_reason: Option<String>,
}

impl Decision {
    pub fn meets_requirements(&self) -> bool {
        self.status == VerificationStatus::Approved
    }
}

/// A persisted verification record, keyed by wallet address (unique).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: String,
    pub wallet_address: WalletAddress,
    pub business_name: String,
    pub external_user_id: String,
    pub counters: Counters,
    pub decision: Decision,
    pub updated_at: DateTime<Utc>,
}

/// Per-wallet sliding-hour rate-limit bucket (spec §3, §4.C).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub current_count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Subscription allowance as reported by the external subscription store
/// (spec §4.E). The core does not model the subscription itself.
#[derive(Debug, Clone)]
pub struct Allowance {
    pub allowed: bool,
    pub remaining: i64,
    pub tier: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Delivery status of a single webhook attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One row per `enqueue()`, updated as the delivery progresses (spec §3
/// "Webhook delivery log entry").
#[derive(Debug, Clone)]
pub struct WebhookDeliveryLog {
    pub delivery_id: String,
    pub verification_id: Option<String>,
    pub webhook_url: String,
    pub payload: String,
    pub status: WebhookDeliveryStatus,
    pub http_status: Option<u16>,
    pub response_snippet: Option<String>,
    pub error_message: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
