//! KV-backed rate limiting for the public endpoints (`preauthorize`,
//! `sign/init`, `sign/finalize`, `create_account_and_register_user`).
//! Grounded on this codebase's former Redis sorted-set sliding window, but
//! expressed against the narrower [`KvBackend`] trait instead of a
//! Redis-specific connection type so it works whether the backend is
//! in-memory, remote REST KV, or TCP KV — none of which expose a sorted-set
//! primitive. This trades an exact sliding window for a fixed-window
//! counter keyed by `(ip, endpoint, window bucket)`, incremented via
//! [`KvBackend::incrby`] with a TTL set on the key's first use in each
//! bucket.

use crate::error::AppResult;
use crate::kv::KvBackend;
use std::sync::Arc;

pub fn rate_limit_key(ip: &str, endpoint: &str, window_secs: u64, now_ms: i64) -> String {
    let bucket = now_ms / (window_secs as i64 * 1000).max(1);
    format!("ratelimit:{endpoint}:{ip}:{bucket}")
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvBackend>,
    pub default_limit: u32,
    pub default_window_secs: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvBackend>, default_limit: u32, default_window_secs: u64) -> Self {
        Self {
            kv,
            default_limit,
            default_window_secs,
        }
    }

    /// Checks the rate limit using the configured defaults. Returns `true`
    /// when the request is allowed, `false` when it should be rejected.
    pub async fn is_allowed(&self, ip: &str, endpoint: &str) -> AppResult<bool> {
        self.is_allowed_with(ip, endpoint, self.default_limit, self.default_window_secs)
            .await
    }

    pub async fn is_allowed_with(
        &self,
        ip: &str,
        endpoint: &str,
        limit: u32,
        window_secs: u64,
    ) -> AppResult<bool> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let key = rate_limit_key(ip, endpoint, window_secs, now_ms);
        let count = self.kv.incrby(&key, 1).await?;
        if count == 1 {
            // First hit in this window bucket: set a TTL so the key is
            // reclaimed once the bucket rolls over, even if the caller
            // never sends another request.
            let value = count.to_string();
            self.kv.set(&key, &value, Some((window_secs as i64 + 1) * 1000)).await?;
        }
        Ok(count <= limit as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mem::InMemoryKv;

    #[tokio::test]
    async fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(Arc::new(InMemoryKv::new()), 2, 60);
        assert!(limiter.is_allowed("1.2.3.4", "preauthorize").await.unwrap());
        assert!(limiter.is_allowed("1.2.3.4", "preauthorize").await.unwrap());
        assert!(!limiter.is_allowed("1.2.3.4", "preauthorize").await.unwrap());
    }

    #[tokio::test]
    async fn distinct_ips_and_endpoints_are_independent() {
        let limiter = RateLimiter::new(Arc::new(InMemoryKv::new()), 1, 60);
        assert!(limiter.is_allowed("1.2.3.4", "preauthorize").await.unwrap());
        assert!(limiter.is_allowed("5.6.7.8", "preauthorize").await.unwrap());
        assert!(limiter.is_allowed("1.2.3.4", "sign_init").await.unwrap());
    }
}
