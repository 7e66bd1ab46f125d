use super::{read_json, write_json};
use crate::error::{AppError, AppResult};
use crate::kv::KvBackend;
use crate::models::AuthSessionRecord;
use std::sync::Arc;

/// Persists warm `AuthSessionRecord`s and decrements `usesRemaining` on
/// every consumption, returning `unauthorized` once exhausted or expired.
#[derive(Clone)]
pub struct AuthSessionStore {
    kv: Arc<dyn KvBackend>,
    prefix: String,
}

impl AuthSessionStore {
    pub fn new(kv: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    fn key(&self, token_id: &str) -> String {
        format!("{}{}", self.prefix, token_id)
    }

    pub async fn put(&self, record: &AuthSessionRecord, ttl_ms: i64) -> AppResult<()> {
        write_json(&self.kv, &self.key(&record.token_id), record, Some(ttl_ms)).await
    }

    /// Consumes one use of the session identified by `token_id`. Returns
    /// the record as it stood before this consumption so callers can read
    /// its bound identity/intent, plus whether this consumption was the
    /// last one available. Rewrites the decremented record unless
    /// exhausted, in which case it is deleted.
    pub async fn consume_use(&self, token_id: &str, now_ms: i64) -> AppResult<ConsumedAuthSession> {
        let key = self.key(token_id);
        let record: Option<AuthSessionRecord> = read_json(&self.kv, &key).await?;
        let mut record = record.ok_or_else(|| AppError::Unauthorized("auth session not found".into()))?;

        if !record.is_usable(now_ms) {
            self.kv.del(&key).await?;
            return Err(AppError::Unauthorized("auth session exhausted or expired".into()));
        }

        let remaining_ttl_ms = (record.expires_at_ms - now_ms).max(1);
        let uses_before = record.uses_remaining;
        record.uses_remaining -= 1;
        let exhausted = record.uses_remaining == 0;

        if exhausted {
            self.kv.del(&key).await?;
        } else {
            write_json(&self.kv, &key, &record, Some(remaining_ttl_ms)).await?;
        }

        record.uses_remaining = uses_before;
        Ok(ConsumedAuthSession { record, exhausted })
    }
}

/// Result of a single `consume_use` call: the session record as it stood
/// before this consumption, and whether it was the last use (the record
/// has since been deleted).
pub struct ConsumedAuthSession {
    pub record: AuthSessionRecord,
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mem::InMemoryKv;

    fn sample(uses: u32) -> AuthSessionRecord {
        AuthSessionRecord {
            token_id: "tok-1".into(),
            relayer_key_id: "k".into(),
            user_id: "alice.near".into(),
            rp_id: "example.com".into(),
            intent_digest_b64u: "ZGln".into(),
            uses_remaining: uses,
            expires_at_ms: i64::MAX,
        }
    }

    #[tokio::test]
    async fn decrements_until_exhausted() {
        let store = AuthSessionStore::new(Arc::new(InMemoryKv::new()), "threshold-ed25519:auth:");
        store.put(&sample(2), 60_000).await.unwrap();

        let first = store.consume_use("tok-1", 0).await.unwrap();
        assert_eq!(first.record.uses_remaining, 2);
        assert!(!first.exhausted);

        let second = store.consume_use("tok-1", 0).await.unwrap();
        assert_eq!(second.record.uses_remaining, 1);
        assert!(second.exhausted);

        let result = store.consume_use("tok-1", 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expired_session_is_unauthorized() {
        let store = AuthSessionStore::new(Arc::new(InMemoryKv::new()), "threshold-ed25519:auth:");
        let mut record = sample(5);
        record.expires_at_ms = 100;
        store.put(&record, 60_000).await.unwrap();

        let result = store.consume_use("tok-1", 200).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}
