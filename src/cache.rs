//! Component D: read-through verification cache (spec §4.D).
//!
//! A cache entry is "logically equivalent to the persisted
//! `VerificationRecord`" per spec §3 — there is no second cache store;
//! this is a thin read path over [`crate::store::Store`] with a TTL check.

use crate::models::VerificationRecord;
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub struct CacheHit {
    pub record: VerificationRecord,
    pub expires_at: DateTime<Utc>,
}

pub struct VerificationCache<'a> {
    store: &'a dyn Store,
    ttl: Duration,
}

impl<'a> VerificationCache<'a> {
    pub fn new(store: &'a dyn Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns `Some` iff a record exists for `wallet_address` and is
    /// younger than the configured TTL. `force_refresh=true` skips the
    /// lookup entirely at the call site (this method is simply not
    /// called in that case, per spec §4.D).
    pub async fn lookup(&self, wallet_address: &str) -> Result<Option<CacheHit>, sqlx::Error> {
        let Some(record) = self.store.get_verification_by_wallet(wallet_address).await? else {
            return Ok(None);
        };

        let age = Utc::now().signed_duration_since(record.updated_at);
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());

        if age >= ttl {
            return Ok(None);
        }

        let expires_at = record.updated_at + ttl;
        Ok(Some(CacheHit {
            record,
            expires_at,
        }))
    }
}
