//! Thin typed wrappers over [`crate::kv::KvBackend`] with prefix isolation
//! per store, matching the persisted-state layout: JSON documents at
//! prefixed keys, TTLs applied by the backend where supported.

pub mod auth_session;
pub mod key;
pub mod session;

pub use auth_session::AuthSessionStore;
pub use key::KeyStore;
pub use session::SessionStore;

use crate::error::AppResult;
use crate::kv::KvBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Writes serialize with `serde_json::to_string`, which preserves struct
/// field declaration order — the "fixed field order" the design calls for.
pub(crate) async fn write_json<T: Serialize>(
    kv: &Arc<dyn KvBackend>,
    key: &str,
    value: &T,
    ttl_ms: Option<i64>,
) -> AppResult<()> {
    let body = serde_json::to_string(value)?;
    kv.set(key, &body, ttl_ms).await
}

/// Reads validate the stored JSON against `T`; any decode failure (missing
/// field, wrong type) is treated as an absent record rather than surfaced
/// as an error, per the "validated on read" rule.
pub(crate) async fn read_json<T: DeserializeOwned>(
    kv: &Arc<dyn KvBackend>,
    key: &str,
) -> AppResult<Option<T>> {
    match kv.get(key).await? {
        None => Ok(None),
        Some(raw) => Ok(serde_json::from_str(&raw).ok()),
    }
}

/// Same as [`read_json`] but atomically deletes the record too, for
/// take-once semantics.
pub(crate) async fn take_json<T: DeserializeOwned>(
    kv: &Arc<dyn KvBackend>,
    key: &str,
) -> AppResult<Option<T>> {
    match kv.getdel(key).await? {
        None => Ok(None),
        Some(raw) => Ok(serde_json::from_str(&raw).ok()),
    }
}
