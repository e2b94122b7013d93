//! Embedding provider abstraction and the deduplicating embedder.
//!
//! - [`EmbeddingProvider`]: trait for anything that turns text into vectors.
//! - [`OpenAIEmbedder`]: calls `POST {api_base}/embeddings` with batching and retry.
//! - [`Embedder`]: assigns each [`Document`] its content-addressed id and
//!   attaches a vector, producing [`EmbeddedRecord`]s.
//!
//! The same provider instance must be used for ingestion and for queries;
//! mixing models silently degrades relevance with no error.
//!
//! # Record ids
//!
//! ```rust
//! use site_chat::embedding::record_id;
//!
//! let a = record_id("blog/hello.md", "Hello");
//! assert_eq!(a.len(), 8);
//! assert_eq!(a, record_id("blog/hello.md", "Hello"));
//! assert_ne!(a, record_id("blog/hello.md", "Hello, world"));
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{ChatError, ChatResult};
use crate::http::{build_client, send_json, RetryPolicy};
use crate::models::{Document, EmbeddedRecord, RecordMetadata};

/// Length of the hex id prefix kept from the content hash.
pub const RECORD_ID_LEN: usize = 8;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: &[String]) -> ChatResult<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> ChatResult<Vec<f32>> {
    let results = provider.embed_texts(&[text.to_string()]).await?;
    results.into_iter().next().ok_or_else(|| ChatError::Provider {
        status: 200,
        message: "empty embedding response".to_string(),
    })
}

/// Content-addressed record id: the first eight hex chars of
/// `SHA-256(source ":" content)`.
///
/// This is a dedup key, not a security boundary; truncation makes collisions
/// possible in principle but irrelevant at personal-site corpus sizes.
pub fn record_id(source: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(RECORD_ID_LEN);
    id
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI embeddings API.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(config: &ProviderConfig, api_key: &str) -> ChatResult<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.embedding_model.clone(),
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> ChatResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response: EmbeddingResponse = send_json(self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let mut items = response.data;
        // Sort by index so output order matches input order.
        items.sort_by_key(|item| item.index);

        if items.len() != texts.len() {
            return Err(ChatError::Provider {
                status: 200,
                message: format!(
                    "expected {} embeddings, provider returned {}",
                    texts.len(),
                    items.len()
                ),
            });
        }

        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

// ============ Deduplicating embedder ============

/// Turns documents into [`EmbeddedRecord`]s.
pub struct Embedder<'a> {
    provider: &'a dyn EmbeddingProvider,
    batch_size: usize,
}

impl<'a> Embedder<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed one document.
    pub async fn embed(&self, doc: &Document) -> ChatResult<EmbeddedRecord> {
        let vector = embed_query(self.provider, &doc.content).await?;
        Ok(to_record(doc, vector))
    }

    /// Embed every document, `batch_size` documents per provider call.
    /// The first provider error aborts the whole run.
    pub async fn embed_all(&self, docs: &[Document]) -> ChatResult<Vec<EmbeddedRecord>> {
        let mut records = Vec::with_capacity(docs.len());

        for batch in docs.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.provider.embed_texts(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(ChatError::Provider {
                    status: 200,
                    message: format!(
                        "expected {} embeddings, provider returned {}",
                        batch.len(),
                        vectors.len()
                    ),
                });
            }
            records.extend(batch.iter().zip(vectors).map(|(d, v)| to_record(d, v)));
            tracing::debug!(embedded = records.len(), total = docs.len(), "embedding batch done");
        }

        Ok(records)
    }
}

fn to_record(doc: &Document, vector: Vec<f32>) -> EmbeddedRecord {
    EmbeddedRecord {
        id: record_id(&doc.source, &doc.content),
        vector,
        metadata: RecordMetadata {
            text: doc.content.clone(),
            source: doc.source.clone(),
            kind: Some(doc.kind),
        },
    }
}

/// Deterministic bag-of-bytes embedder for tests: no network, stable output.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct HashEmbedder {
        pub dims: usize,
        pub calls: AtomicUsize,
    }

    impl HashEmbedder {
        pub fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }
    }

    pub fn embed_text(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for word in text.to_lowercase().split_whitespace() {
            let h = word.bytes().fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            v[h % dims] += 1.0;
        }
        v
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash"
        }

        async fn embed_texts(&self, texts: &[String]) -> ChatResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| embed_text(t, self.dims)).collect())
        }
    }
}
