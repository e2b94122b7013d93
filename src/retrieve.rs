//! Query-time retrieval: question → embedding → nearest matches → context.
//!
//! The context block is the retrieved passages in rank order, each prefixed
//! with its source, joined by blank lines and bounded by a character budget.
//! When over budget the lowest-ranked passages are dropped first. Zero
//! matches yield an empty block, never an error. Failures are logged with
//! their stage before being returned.
//!
//! The query embedding and the index lookup each run under their own
//! timeout. The HTTP clients time out per attempt, but retries and backoff
//! can add up to more than the whole request budget.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{log_stage_failure, ChatError, ChatResult, Stage};
use crate::index::VectorIndex;
use crate::models::Match;

const PASSAGE_SEPARATOR: &str = "\n\n";

const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub id: String,
    pub source: String,
    pub score: f32,
    pub text: String,
}

/// Retrieved context for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBlock {
    pub text: String,
    pub passages: Vec<Passage>,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Sources of the included passages in rank order, deduplicated.
    pub fn sources(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.passages {
            if !out.contains(&p.source) {
                out.push(p.source.clone());
            }
        }
        out
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    max_context_chars: usize,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        max_context_chars: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            max_context_chars,
            timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Bound each retrieval call, typically to `provider.timeout_secs`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> ChatResult<ContextBlock> {
        let vector = self
            .within(Stage::Embed, embed_query(self.embedder.as_ref(), query))
            .await?;
        let matches = self
            .within(Stage::Retrieve, self.index.query_nearest(&vector, top_k, true))
            .await?;
        let block = assemble_context(matches, self.max_context_chars);
        tracing::debug!(
            passages = block.passages.len(),
            chars = block.text.chars().count(),
            "retrieved context"
        );
        Ok(block)
    }

    async fn within<T>(
        &self,
        stage: Stage,
        call: impl Future<Output = ChatResult<T>>,
    ) -> ChatResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| Err(ChatError::ProviderTimeout))
            .inspect_err(|e| log_stage_failure(stage, e))
    }
}

/// Build a context block from ranked matches.
pub fn assemble_context(matches: Vec<Match>, max_chars: usize) -> ContextBlock {
    let mut block = ContextBlock::default();
    let mut used = 0usize;

    for m in matches {
        let Some(meta) = m.metadata else { continue };
        let text = meta.text.trim();
        if text.is_empty() {
            continue;
        }

        let rendered = format!("[{}] {}", meta.source, text);
        let sep = if block.text.is_empty() {
            0
        } else {
            PASSAGE_SEPARATOR.len()
        };
        let len = rendered.chars().count();

        if used + sep + len > max_chars {
            if block.passages.is_empty() && max_chars > 0 {
                // The top passage alone is over budget: keep its head.
                let head: String = rendered.chars().take(max_chars).collect();
                block.text = head;
                block.passages.push(Passage {
                    id: m.id,
                    source: meta.source,
                    score: m.score,
                    text: text.to_string(),
                });
            }
            break;
        }

        if sep > 0 {
            block.text.push_str(PASSAGE_SEPARATOR);
        }
        block.text.push_str(&rendered);
        used += sep + len;
        block.passages.push(Passage {
            id: m.id,
            source: meta.source,
            score: m.score,
            text: text.to_string(),
        });
    }

    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::fake::HashEmbedder;
    use crate::embedding::Embedder;
    use crate::index::memory::InMemoryIndex;
    use crate::models::{Document, DocumentKind, RecordMetadata};
    use async_trait::async_trait;

    /// Never answers in time.
    struct StalledEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StalledEmbedder {
        fn model_name(&self) -> &str {
            "stalled"
        }

        async fn embed_texts(&self, _texts: &[String]) -> ChatResult<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn m(id: &str, score: f32, source: &str, text: Option<&str>) -> Match {
        Match {
            id: id.to_string(),
            score,
            metadata: text.map(|t| RecordMetadata {
                text: t.to_string(),
                source: source.to_string(),
                kind: None,
            }),
        }
    }

    #[test]
    fn test_assemble_tags_sources_in_rank_order() {
        let block = assemble_context(
            vec![
                m("1", 0.9, "blog/a.md", Some("Alpha")),
                m("2", 0.8, "about", Some("Beta")),
            ],
            1000,
        );
        assert_eq!(block.text, "[blog/a.md] Alpha\n\n[about] Beta");
        assert_eq!(block.sources(), vec!["blog/a.md", "about"]);
    }

    #[test]
    fn test_assemble_skips_missing_and_empty_text() {
        let block = assemble_context(
            vec![
                m("1", 0.9, "x", None),
                m("2", 0.8, "y", Some("   ")),
                m("3", 0.7, "z", Some("kept")),
            ],
            1000,
        );
        assert_eq!(block.passages.len(), 1);
        assert_eq!(block.passages[0].id, "3");
    }

    #[test]
    fn test_assemble_drops_lowest_ranked_over_budget() {
        let block = assemble_context(
            vec![
                m("1", 0.9, "a", Some("0123456789")),
                m("2", 0.8, "b", Some("0123456789")),
                m("3", 0.7, "c", Some("0123456789")),
            ],
            // "[a] 0123456789" is 14 chars; two passages + separator is 30.
            31,
        );
        let ids: Vec<&str> = block.passages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(block.text.chars().count() <= 31);
    }

    #[test]
    fn test_assemble_truncates_oversized_top_passage() {
        let block = assemble_context(vec![m("1", 0.9, "a", Some(&"é".repeat(50)))], 10);
        assert_eq!(block.passages.len(), 1);
        assert_eq!(block.text.chars().count(), 10);
    }

    #[test]
    fn test_assemble_empty() {
        let block = assemble_context(Vec::new(), 100);
        assert!(block.is_empty());
        assert_eq!(block.text, "");
    }

    #[tokio::test]
    async fn test_retrieve_from_empty_index_is_not_an_error() {
        let retriever = Retriever::new(
            Arc::new(HashEmbedder::new(32)),
            Arc::new(InMemoryIndex::new()),
            1000,
        );
        let block = retriever.retrieve("anything at all", 5).await.unwrap();
        assert!(block.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_finds_relevant_document() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(InMemoryIndex::new());
        let docs = vec![
            Document::new("blog/rust.md", DocumentKind::Blog, "rust ownership borrowing lifetimes"),
            Document::new("blog/bread.md", DocumentKind::Blog, "sourdough starter flour water"),
        ];
        let records = Embedder::new(embedder.as_ref(), 8)
            .embed_all(&docs)
            .await
            .unwrap();
        index.upsert(&records).await.unwrap();

        let retriever = Retriever::new(embedder, index, 1000);
        let block = retriever.retrieve("sourdough flour", 1).await.unwrap();
        assert_eq!(block.sources(), vec!["blog/bread.md"]);
    }

    #[tokio::test]
    async fn test_stalled_embedding_times_out() {
        let retriever = Retriever::new(
            Arc::new(StalledEmbedder),
            Arc::new(InMemoryIndex::new()),
            1000,
        )
        .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let result = retriever.retrieve("hello", 3).await;
        assert!(matches!(result, Err(ChatError::ProviderTimeout)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
