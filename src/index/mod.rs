//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait covers the four operations the pipeline needs
//! from a hosted nearest-neighbor index. The index is the sole source of truth
//! for semantic retrieval: there is no local cache and no fallback.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorIndex::upsert) | Insert or overwrite records by id |
//! | [`query_nearest`](VectorIndex::query_nearest) | Top-K matches by descending score |
//! | [`delete_all`](VectorIndex::delete_all) | Wipe every vector |
//! | [`stats`](VectorIndex::stats) | Record count and dimension |
//!
//! Backends: [`pinecone::PineconeIndex`] (hosted) and [`memory::InMemoryIndex`]
//! (brute-force, for tests and local development).

pub mod memory;
pub mod pinecone;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, Secrets};
use crate::error::{ChatError, ChatResult};
use crate::models::{EmbeddedRecord, IndexStats, Match};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records. Idempotent by `id`.
    async fn upsert(&self, records: &[EmbeddedRecord]) -> ChatResult<()>;

    /// Nearest neighbors ordered by descending similarity. Ties are in
    /// backend order, which callers must not rely on.
    async fn query_nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> ChatResult<Vec<Match>>;

    /// Remove every vector from the index (or namespace).
    async fn delete_all(&self) -> ChatResult<()>;

    async fn stats(&self) -> ChatResult<IndexStats>;
}

/// Construct the configured index backend.
pub async fn connect(config: &Config, secrets: &Secrets) -> ChatResult<Arc<dyn VectorIndex>> {
    if config.index.is_memory() {
        return Ok(Arc::new(memory::InMemoryIndex::new()));
    }

    let api_key = secrets
        .pinecone_api_key
        .as_deref()
        .ok_or_else(|| ChatError::Config("vector index API key not set".to_string()))?;
    let index = pinecone::PineconeIndex::connect(&config.index, api_key).await?;
    Ok(Arc::new(index))
}
