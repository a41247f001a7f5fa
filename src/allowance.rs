//! Component E: allowance gate (spec §4.E).
//!
//! Wraps the subscription store's two operations behind the `Store` port;
//! the subscription tiering/payment-capture system itself is out of scope
//! (spec §1), the core only consumes `check_allowance`/`increment_usage`.

use crate::error::ApiError;
use crate::models::Allowance;
use crate::store::Store;

pub struct AllowanceGate<'a> {
    store: &'a dyn Store,
}

impl<'a> AllowanceGate<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Consult the subscription store before the ledger scan runs.
    /// Refuses with [`ApiError::QuotaExceeded`] when `allowed=false`.
    pub async fn check(&self, external_user_id: &str) -> Result<Allowance, ApiError> {
        let allowance = self.store.check_allowance(external_user_id).await?;
        if !allowance.allowed {
            return Err(ApiError::QuotaExceeded);
        }
        Ok(allowance)
    }

    /// Best-effort usage bump after a successful persist. Failure is
    /// logged and never fails the request (spec §4.E).
    pub async fn increment(&self, external_user_id: &str) {
        if let Err(err) = self.store.increment_usage(external_user_id).await {
            log::warn!("failed to increment usage for {external_user_id}: {err}");
        }
    }
}
