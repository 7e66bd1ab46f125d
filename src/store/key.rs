use super::{read_json, write_json};
use crate::error::AppResult;
use crate::kv::KvBackend;
use crate::models::RelayerKeyRecord;
use std::sync::Arc;

/// Persists `RelayerKeyRecord`s, one per `relayerKeyId`. Records are
/// immutable once written except via explicit rotation — this store never
/// overwrites an existing key unless the caller calls `put` directly.
#[derive(Clone)]
pub struct KeyStore {
    kv: Arc<dyn KvBackend>,
    prefix: String,
}

impl KeyStore {
    pub fn new(kv: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    fn key(&self, relayer_key_id: &str) -> String {
        format!("{}{}", self.prefix, relayer_key_id)
    }

    pub async fn get(&self, relayer_key_id: &str) -> AppResult<Option<RelayerKeyRecord>> {
        read_json(&self.kv, &self.key(relayer_key_id)).await
    }

    pub async fn put(&self, relayer_key_id: &str, record: &RelayerKeyRecord) -> AppResult<()> {
        write_json(&self.kv, &self.key(relayer_key_id), record, None).await
    }
}
