//! Uniform key-value capability shared by every store in this service.
//!
//! Three backends implement [`KvBackend`]: an in-memory map for local
//! development, a bearer-auth REST KV (Upstash-style) for serverless
//! deployments, and a TCP-connected Redis-protocol client for a dedicated KV
//! process. Callers never branch on which one is active.

pub mod mem;
pub mod remote_rest;
pub mod tcp;

use crate::error::{AppError, AppResult};
use async_trait::async_trait;

/// Narrow capability interface a session/key store is built on top of.
///
/// All values are opaque JSON strings; the backend never inspects them.
/// TTLs are milliseconds at the call site and rounded up to whole seconds by
/// backends that are only seconds-resolution.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_ms: Option<i64>) -> AppResult<()>;

    async fn del(&self, key: &str) -> AppResult<()>;

    /// Atomic get-then-delete when the backend supports it. Backends that
    /// cannot do this atomically fall back to `get` followed by `del` and
    /// log a downgrade warning.
    async fn getdel(&self, key: &str) -> AppResult<Option<String>>;

    /// Atomically increments `key` by `delta` and returns the new value.
    async fn incrby(&self, key: &str, delta: i64) -> AppResult<i64>;
}

pub(crate) fn ttl_secs(ttl_ms: Option<i64>) -> Option<i64> {
    ttl_ms.map(|ms| ((ms + 999) / 1000).max(1))
}

pub(crate) fn backend_unavailable(context: &str, err: impl std::fmt::Display) -> AppError {
    AppError::BackendUnavailable(format!("{context}: {err}"))
}
