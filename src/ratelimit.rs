//! Component C: per-wallet sliding-hour rate limiter (spec §4.C).
//!
//! The atomicity guarantee lives in [`crate::store::Store::rate_limit`]
//! (a single upsert under a row lock); this module is the thin wrapper
//! that turns the result into the `X-RateLimit-*` response headers, the
//! same separation of concerns the teacher draws between
//! `WebSocketSecurity`'s counters and the headers/errors its callers emit.

use crate::models::RateLimitStatus;
use crate::store::Store;

pub struct RateLimiter<'a> {
    store: &'a dyn Store,
    max: u32,
    window_secs: i64,
}

impl<'a> RateLimiter<'a> {
    pub fn new(store: &'a dyn Store, max: u32, window: std::time::Duration) -> Self {
        Self {
            store,
            max,
            window_secs: window.as_secs() as i64,
        }
    }

    pub async fn check(&self, wallet_address: &str) -> Result<RateLimitStatus, sqlx::Error> {
        self.store
            .rate_limit(wallet_address, self.max, self.window_secs)
            .await
    }
}
