//! Hosted vector index client (Pinecone data-plane HTTP API).
//!
//! # Endpoints
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | `POST` | `/vectors/upsert` | `{vectors: [{id, values, metadata}], namespace?}` |
//! | `POST` | `/query` | `{vector, topK, includeMetadata, namespace?}` |
//! | `POST` | `/vectors/delete` | `{deleteAll: true, namespace?}` |
//! | `POST` | `/describe_index_stats` | `{}` |
//!
//! All requests carry the `Api-Key` header. When no `index.host` is
//! configured, the data-plane host is resolved once at startup from the index
//! name, the environment, and the project name returned by the controller's
//! `whoami` action.
//!
//! Errors keep the provider's kind: 401/403 → auth, 404 → index not found,
//! 429 → rate limited. Upserts and deletes are not retried beyond the shared
//! policy; there is no local fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::error::{ChatError, ChatResult};
use crate::http::{build_client, send_json, RetryPolicy};
use crate::models::{EmbeddedRecord, IndexStats, Match, RecordMetadata};

use super::VectorIndex;

pub struct PineconeIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    name: String,
    namespace: Option<String>,
    upsert_batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct WireVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a RecordMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpsertRequest<'a> {
    vectors: Vec<WireVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

#[derive(Deserialize)]
struct WhoAmI {
    project_name: String,
}

impl PineconeIndex {
    /// Client for a known data-plane base URL (e.g. `https://idx-abc.svc.env.pinecone.io`).
    pub fn new(base_url: &str, api_key: &str, config: &IndexConfig) -> ChatResult<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            name: config.name.clone().unwrap_or_else(|| base_url.to_string()),
            namespace: config.namespace.clone().filter(|n| !n.is_empty()),
            upsert_batch_size: config.upsert_batch_size.max(1),
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve the data-plane host if needed and build the client.
    pub async fn connect(config: &IndexConfig, api_key: &str) -> ChatResult<Self> {
        if let Some(host) = &config.host {
            return Self::new(&normalize_host(host), api_key, config);
        }

        let (name, env) = match (config.name.as_deref(), config.environment.as_deref()) {
            (Some(n), Some(e)) => (n, e),
            _ => {
                return Err(ChatError::Config(
                    "index.name and index.environment are required".to_string(),
                ))
            }
        };

        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        let url = format!("https://controller.{}.pinecone.io/actions/whoami", env);
        let who: WhoAmI = send_json(RetryPolicy::new(config.max_retries), || {
            client.get(&url).header("Api-Key", api_key)
        })
        .await?;

        let host = format!("https://{}-{}.svc.{}.pinecone.io", name, who.project_name, env);
        tracing::info!(index = name, host = %host, "resolved vector index host");
        Self::new(&host, api_key, config)
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> ChatResult<T> {
        let url = format!("{}{}", self.base_url, path);
        send_json(self.retry, || {
            self.client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .json(body)
        })
        .await
        .map_err(|e| match e {
            ChatError::Provider { status: 404, .. } => ChatError::IndexNotFound(self.name.clone()),
            other => other,
        })
    }
}

fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Rebuild metadata leniently: unknown or missing fields become defaults.
fn metadata_from_value(value: Value) -> RecordMetadata {
    let text = value
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let source = value
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let kind = value
        .get("kind")
        .cloned()
        .and_then(|k| serde_json::from_value(k).ok());
    RecordMetadata { text, source, kind }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[EmbeddedRecord]) -> ChatResult<()> {
        for batch in records.chunks(self.upsert_batch_size) {
            let request = UpsertRequest {
                vectors: batch
                    .iter()
                    .map(|r| WireVector {
                        id: &r.id,
                        values: &r.vector,
                        metadata: &r.metadata,
                    })
                    .collect(),
                namespace: self.namespace.as_deref(),
            };
            let body = serde_json::to_value(&request).map_err(|e| ChatError::Provider {
                status: 0,
                message: format!("failed to encode upsert: {}", e),
            })?;
            let _: Value = self.post("/vectors/upsert", &body).await?;
            tracing::debug!(count = batch.len(), "upserted vectors");
        }
        Ok(())
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> ChatResult<Vec<Match>> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata,
            include_values: false,
            namespace: self.namespace.as_deref(),
        };
        let body = serde_json::to_value(&request).map_err(|e| ChatError::Provider {
            status: 0,
            message: format!("failed to encode query: {}", e),
        })?;
        let response: QueryResponse = self.post("/query", &body).await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| Match {
                id: m.id,
                score: m.score,
                metadata: m.metadata.map(metadata_from_value),
            })
            .collect())
    }

    async fn delete_all(&self) -> ChatResult<()> {
        let mut body = serde_json::json!({ "deleteAll": true });
        if let Some(ns) = &self.namespace {
            body["namespace"] = Value::String(ns.clone());
        }
        let _: Value = self.post("/vectors/delete", &body).await?;
        Ok(())
    }

    async fn stats(&self) -> ChatResult<IndexStats> {
        let response: StatsResponse = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .await?;

        let count = match &self.namespace {
            Some(ns) => response
                .namespaces
                .get(ns)
                .map(|n| n.vector_count)
                .unwrap_or(0),
            None => response.total_vector_count,
        };

        Ok(IndexStats {
            count,
            dimension: response.dimension,
        })
    }
}
