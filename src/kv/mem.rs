//! Process-local in-memory KV backend. Suitable for single-instance
//! deployments and tests; state does not survive a restart.

use super::KvBackend;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

struct Entry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map(|exp| now_ms >= exp).unwrap_or(false)
    }
}

/// In-memory map guarded by a single mutex. Expired entries are swept lazily
/// on access rather than via a background task, matching the "monotonic
/// expiry sweep on access" behavior spec'd for this backend.
pub struct InMemoryKv {
    map: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for InMemoryKv {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let mut map = self.map.lock().unwrap();
        match map.get(key) {
            Some(entry) if entry.is_expired(now) => {
                map.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: Option<i64>) -> AppResult<()> {
        let now = Utc::now().timestamp_millis();
        let expires_at_ms = ttl_ms.map(|ttl| now + ttl);
        self.map.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    async fn getdel(&self, key: &str) -> AppResult<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let mut map = self.map.lock().unwrap();
        match map.remove(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn incrby(&self, key: &str, delta: i64) -> AppResult<i64> {
        let now = Utc::now().timestamp_millis();
        let mut map = self.map.lock().unwrap();
        let current = match map.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + delta;
        let expires_at_ms = map.get(key).and_then(|e| e.expires_at_ms);
        map.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at_ms,
            },
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv = InMemoryKv::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn getdel_is_atomic_and_one_shot() {
        let kv = InMemoryKv::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.getdel("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(kv.getdel("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expiry_sweeps_on_access() {
        let kv = InMemoryKv::new();
        kv.set("a", "1", Some(-1)).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incrby_accumulates() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.incrby("c", 1).await.unwrap(), 1);
        assert_eq!(kv.incrby("c", 4).await.unwrap(), 5);
    }
}
