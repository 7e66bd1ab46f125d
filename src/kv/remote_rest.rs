//! Bearer-auth REST KV client (Upstash-style): each operation is a single
//! `POST` of a command array to the configured URL, authenticated with a
//! bearer token. Grounded on the JSON-RPC request/response plumbing of the
//! EVM chain client in this codebase's `blockchain` module — same
//! `reqwest::Client` + typed envelope shape, different wire command set.

use super::{backend_unavailable, ttl_secs, KvBackend};
use crate::error::AppResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct RemoteRestKv {
    client: Client,
    url: String,
    token: String,
}

#[derive(Deserialize)]
struct CommandResponse {
    result: Value,
}

impl RemoteRestKv {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token: token.into(),
        }
    }

    async fn command(&self, parts: Vec<Value>) -> AppResult<Value> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&parts)
            .send()
            .await
            .map_err(|e| backend_unavailable("remote kv request", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(backend_unavailable(
                "remote kv http error",
                format!("{status}: {body}"),
            ));
        }

        let parsed: CommandResponse = resp
            .json()
            .await
            .map_err(|e| backend_unavailable("remote kv response decode", e))?;
        Ok(parsed.result)
    }
}

#[async_trait]
impl KvBackend for RemoteRestKv {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let result = self.command(vec![json!("GET"), json!(key)]).await?;
        Ok(result.as_str().map(|s| s.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: Option<i64>) -> AppResult<()> {
        let mut parts = vec![json!("SET"), json!(key), json!(value)];
        if let Some(secs) = ttl_secs(ttl_ms) {
            parts.push(json!("EX"));
            parts.push(json!(secs));
        }
        self.command(parts).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        self.command(vec![json!("DEL"), json!(key)]).await?;
        Ok(())
    }

    async fn getdel(&self, key: &str) -> AppResult<Option<String>> {
        // Upstash supports GETDEL directly; if the deployed KV doesn't, the
        // command returns an error and we downgrade to get+del.
        match self.command(vec![json!("GETDEL"), json!(key)]).await {
            Ok(result) => Ok(result.as_str().map(|s| s.to_string())),
            Err(_) => {
                tracing::warn!(key, "remote kv lacks GETDEL, downgrading to get+del");
                let value = self.get(key).await?;
                self.del(key).await?;
                Ok(value)
            }
        }
    }

    async fn incrby(&self, key: &str, delta: i64) -> AppResult<i64> {
        let result = self
            .command(vec![json!("INCRBY"), json!(key), json!(delta)])
            .await?;
        Ok(result.as_i64().unwrap_or(0))
    }
}
