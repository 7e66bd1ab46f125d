use super::{take_json, write_json};
use crate::error::AppResult;
use crate::kv::KvBackend;
use crate::models::{MpcSession, SigningSession};
use std::sync::Arc;

/// Persists `MpcSession` and `SigningSession` records under a shared
/// prefix, both consumed exactly once via atomic get-then-delete.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvBackend>,
    prefix: String,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    fn mpc_key(&self, id: &str) -> String {
        format!("{}mpc:{}", self.prefix, id)
    }

    fn signing_key(&self, id: &str) -> String {
        format!("{}signing:{}", self.prefix, id)
    }

    pub async fn put_mpc_session(
        &self,
        id: &str,
        session: &MpcSession,
        ttl_ms: i64,
    ) -> AppResult<()> {
        write_json(&self.kv, &self.mpc_key(id), session, Some(ttl_ms)).await
    }

    /// Take-once read: returns `None` both when the session never existed
    /// and when it was already consumed by a concurrent caller. Callers
    /// distinguish "never existed" from "consumed" only by the absence of
    /// any prior success on their side, which is exactly the race the spec
    /// calls for.
    pub async fn take_mpc_session(&self, id: &str) -> AppResult<Option<MpcSession>> {
        take_json(&self.kv, &self.mpc_key(id)).await
    }

    pub async fn put_signing_session(
        &self,
        id: &str,
        session: &SigningSession,
        ttl_ms: i64,
    ) -> AppResult<()> {
        write_json(&self.kv, &self.signing_key(id), session, Some(ttl_ms)).await
    }

    pub async fn take_signing_session(&self, id: &str) -> AppResult<Option<SigningSession>> {
        take_json(&self.kv, &self.signing_key(id)).await
    }
}
