//! Ingestion pipeline orchestration.
//!
//! Coordinates the offline flow: collect → (chunk) → embed → clear → upsert.
//! Every run rebuilds the index from the full corpus. Embedding happens
//! before the index is cleared, so a provider failure leaves the previous
//! index untouched; only the clear-then-upsert window is non-atomic.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::catalog::{CatalogSource, JsonFileCatalog};
use crate::chunk::chunk_document;
use crate::collect::ContentCollector;
use crate::config::{Config, Secrets};
use crate::embedding::{Embedder, EmbeddingProvider, OpenAIEmbedder};
use crate::error::{log_stage_failure, ChatResult, Stage};
use crate::index::{self, VectorIndex};
use crate::models::{Document, EmbeddedRecord};

/// Outcome of one reindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub records: usize,
    /// Records dropped because another record in this run had the same id.
    pub duplicates: usize,
    /// Index size after the run, as reported by the index.
    pub indexed: u64,
    pub completed_at: DateTime<Utc>,
}

/// Collect the configured corpus and apply chunking.
pub async fn collect_documents(config: &Config) -> Result<Vec<Document>> {
    let catalog = config.catalog.path.as_ref().map(JsonFileCatalog::new);
    let mut collector = ContentCollector::new(&config.content);
    if let Some(c) = &catalog {
        collector = collector.with_catalog(c as &dyn CatalogSource);
    }

    let docs = collector.collect().await?;
    Ok(docs
        .iter()
        .flat_map(|d| chunk_document(d, &config.chunking))
        .collect())
}

/// Embed `docs` and replace the index contents with them.
pub async fn reindex(
    docs: &[Document],
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    batch_size: usize,
) -> ChatResult<IngestReport> {
    let records = Embedder::new(embedder, batch_size)
        .embed_all(docs)
        .await
        .inspect_err(|e| log_stage_failure(Stage::Embed, e))?;

    let total = records.len();
    let records = dedup_records(records);

    index.delete_all().await?;
    index.upsert(&records).await?;
    let stats = index.stats().await?;

    tracing::info!(
        documents = docs.len(),
        records = records.len(),
        indexed = stats.count,
        "reindex complete"
    );

    Ok(IngestReport {
        documents: docs.len(),
        records: records.len(),
        duplicates: total - records.len(),
        indexed: stats.count,
        completed_at: Utc::now(),
    })
}

/// Keep the first record for each id.
fn dedup_records(records: Vec<EmbeddedRecord>) -> Vec<EmbeddedRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}

/// `site-chat ingest`.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let docs = collect_documents(config).await?;

    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for d in &docs {
        *by_kind.entry(d.kind.as_str()).or_default() += 1;
    }

    if dry_run {
        println!("ingest (dry-run)");
        println!("  documents: {}", docs.len());
        for (kind, n) in &by_kind {
            println!("    {}: {}", kind, n);
        }
        return Ok(());
    }

    let secrets = Secrets::from_env(config)?;
    if config.index.is_memory() {
        tracing::warn!("memory index does not outlive this process; use `serve` for local runs");
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        OpenAIEmbedder::new(&config.provider, &secrets.openai_api_key)
            .context("Failed to create embedding client")?,
    );
    let index = index::connect(config, &secrets)
        .await
        .context("Failed to connect to vector index")?;

    let report = reindex(
        &docs,
        embedder.as_ref(),
        index.as_ref(),
        config.provider.batch_size,
    )
    .await
    .context("Ingestion failed")?;

    println!("ingest");
    println!("  documents: {}", report.documents);
    for (kind, n) in &by_kind {
        println!("    {}: {}", kind, n);
    }
    println!("  records upserted: {}", report.records);
    if report.duplicates > 0 {
        println!("  duplicate records skipped: {}", report.duplicates);
    }
    println!("  index count: {}", report.indexed);
    println!("  completed: {}", report.completed_at.to_rfc3339());
    println!("ok");
    Ok(())
}

/// `site-chat stats`.
pub async fn run_stats(config: &Config) -> Result<()> {
    let secrets = Secrets::from_env(config)?;
    let index = index::connect(config, &secrets)
        .await
        .context("Failed to connect to vector index")?;
    let stats = index.stats().await.context("Failed to read index stats")?;

    println!("index");
    println!("  provider: {}", config.index.provider);
    if let Some(name) = &config.index.name {
        println!("  name: {}", name);
    }
    println!("  count: {}", stats.count);
    println!("  dimension: {}", stats.dimension);
    Ok(())
}
