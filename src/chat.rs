//! Request-path orchestration for both chat variants.
//!
//! [`ChatService`] holds the long-lived clients (retriever, generator,
//! catalog) and runs one question through grounding and generation. It is
//! built once at startup and shared behind an `Arc` by the CLI and server.
//!
//! Failures before generation (query embedding, index lookup, catalog fetch)
//! degrade to the fallback answer like generation failures do. Only an empty
//! question and an exhausted overall budget are reported as errors.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::catalog::{CatalogSource, JsonFileCatalog, StaticCatalog};
use crate::completion::{CompletionProvider, OpenAICompletion};
use crate::config::{Config, Secrets};
use crate::embedding::{EmbeddingProvider, OpenAIEmbedder};
use crate::error::{ChatError, ChatResult, Stage};
use crate::generate::{fallback_answer, Generator};
use crate::index::{self, VectorIndex};
use crate::models::{AnnotatedAnswer, ConversationTurn};
use crate::prompt::{Grounding, Variant};
use crate::retrieve::Retriever;
use crate::stream::ChatChunk;

/// Chunks buffered between the generator and a slow client.
const STREAM_BUFFER: usize = 32;

pub struct ChatService {
    retriever: Retriever,
    generator: Generator,
    catalog: Arc<dyn CatalogSource>,
    top_k: usize,
    request_timeout: Duration,
}

impl ChatService {
    pub fn new(
        retriever: Retriever,
        generator: Generator,
        catalog: Arc<dyn CatalogSource>,
        top_k: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            generator,
            catalog,
            top_k,
            request_timeout,
        }
    }

    /// Wire up the configured providers. Called once per process.
    pub async fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let index = index::connect(config, secrets)
            .await
            .context("Failed to connect to vector index")?;
        Self::from_index(config, secrets, index)
    }

    /// Like [`from_config`](Self::from_config), with an index that is
    /// already connected.
    pub fn from_index(
        config: &Config,
        secrets: &Secrets,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAIEmbedder::new(&config.provider, &secrets.openai_api_key)
                .context("Failed to create embedding client")?,
        );
        let completion: Arc<dyn CompletionProvider> = Arc::new(
            OpenAICompletion::new(&config.provider, &config.generation, &secrets.openai_api_key)
                .context("Failed to create completion client")?,
        );
        let provider_timeout = Duration::from_secs(config.provider.timeout_secs);
        let catalog: Arc<dyn CatalogSource> = match &config.catalog.path {
            Some(path) => Arc::new(JsonFileCatalog::new(path)),
            None => Arc::new(StaticCatalog::default()),
        };

        Ok(Self::new(
            Retriever::new(embedder, index, config.retrieval.max_context_chars)
                .with_timeout(provider_timeout),
            Generator::new(completion, &config.generation, provider_timeout),
            catalog,
            config.retrieval.top_k,
            Duration::from_secs(config.server.request_timeout_secs),
        ))
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Answer in one piece.
    ///
    /// Returns `EmptyInput` for a blank question and `ProviderTimeout` when
    /// the whole request outlives its budget.
    pub async fn ask(
        &self,
        variant: Variant,
        question: &str,
        history: &[ConversationTurn],
    ) -> ChatResult<AnnotatedAnswer> {
        let question = validate_question(question)?;
        tracing::info!(variant = variant.as_str(), "chat request");

        let run = async {
            let Some(grounding) = self.ground(variant, question).await else {
                return fallback_answer();
            };
            self.generator.generate(question, &grounding, history).await
        };

        tokio::time::timeout(self.request_timeout, run)
            .await
            .map_err(|_| {
                tracing::error!(variant = variant.as_str(), "chat request exceeded its budget");
                ChatError::ProviderTimeout
            })
    }

    /// Answer incrementally.
    ///
    /// Validation happens up front so the caller can still reply with a
    /// status code. After that the returned receiver always ends with a
    /// `done` chunk unless the caller drops it first.
    pub fn ask_stream(
        self: &Arc<Self>,
        variant: Variant,
        question: &str,
        history: Vec<ConversationTurn>,
    ) -> ChatResult<mpsc::Receiver<ChatChunk>> {
        let question = validate_question(question)?.to_string();
        tracing::info!(variant = variant.as_str(), "streaming chat request");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let run = async {
                match service.ground(variant, &question).await {
                    Some(grounding) => {
                        service
                            .generator
                            .generate_stream(&question, &grounding, &history, &tx)
                            .await;
                    }
                    None => {
                        let _ = tx.send(ChatChunk::final_chunk(&fallback_answer())).await;
                    }
                }
            };

            if tokio::time::timeout(service.request_timeout, run).await.is_err() {
                tracing::error!(variant = variant.as_str(), "chat stream exceeded its budget");
                let _ = tx.send(ChatChunk::final_chunk(&fallback_answer())).await;
            }
        });

        Ok(rx)
    }

    /// Fetch grounding material. `None` means the stage failed and was logged.
    async fn ground(&self, variant: Variant, question: &str) -> Option<Grounding> {
        match variant {
            Variant::Site => self
                .retriever
                .retrieve(question, self.top_k)
                .await
                .ok()
                .map(Grounding::Context),
            Variant::Librarian => match self.catalog.get_catalog().await {
                Ok(entries) => Some(Grounding::Catalog(entries)),
                Err(e) => {
                    tracing::error!(stage = %Stage::Retrieve, error = %format!("{:#}", e), "catalog fetch failed");
                    None
                }
            },
        }
    }
}

/// Trimmed question, or `EmptyInput` if nothing is left.
pub fn validate_question(question: &str) -> ChatResult<&str> {
    let q = question.trim();
    if q.is_empty() {
        return Err(ChatError::EmptyInput);
    }
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_entry;
    use crate::completion::fake::ScriptedCompletion;
    use crate::config::GenerationConfig;
    use crate::embedding::fake::HashEmbedder;
    use crate::embedding::Embedder;
    use crate::generate::FALLBACK_MESSAGE;
    use crate::index::memory::InMemoryIndex;
    use crate::models::{Document, DocumentKind, IndexStats, Match, EmbeddedRecord};
    use async_trait::async_trait;

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn upsert(&self, _records: &[EmbeddedRecord]) -> ChatResult<()> {
            Err(ChatError::IndexNotFound("gone".into()))
        }
        async fn query_nearest(&self, _v: &[f32], _k: usize, _m: bool) -> ChatResult<Vec<Match>> {
            Err(ChatError::IndexNotFound("gone".into()))
        }
        async fn delete_all(&self) -> ChatResult<()> {
            Err(ChatError::IndexNotFound("gone".into()))
        }
        async fn stats(&self) -> ChatResult<IndexStats> {
            Err(ChatError::IndexNotFound("gone".into()))
        }
    }

    fn service(
        index: Arc<dyn VectorIndex>,
        completion: ScriptedCompletion,
        request_timeout: Duration,
    ) -> Arc<ChatService> {
        Arc::new(ChatService::new(
            Retriever::new(Arc::new(HashEmbedder::new(32)), index, 2000),
            Generator::new(
                Arc::new(completion),
                &GenerationConfig::default(),
                Duration::from_secs(5),
            ),
            Arc::new(StaticCatalog::new(vec![sample_entry("b1", "Dune")])),
            3,
            request_timeout,
        ))
    }

    #[test]
    fn test_validate_question() {
        assert_eq!(validate_question("  hi ").unwrap(), "hi");
        assert!(matches!(validate_question(" \n"), Err(ChatError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_site_answer_grounded_in_index() {
        let embedder = HashEmbedder::new(32);
        let index = Arc::new(InMemoryIndex::new());
        let docs = vec![Document::new("about", DocumentKind::Profile, "I bake bread")];
        let records = Embedder::new(&embedder, 4).embed_all(&docs).await.unwrap();
        index.upsert(&records).await.unwrap();

        let svc = service(index, ScriptedCompletion::new(&["You bake."]), Duration::from_secs(5));
        let a = svc.ask(Variant::Site, "do you bake bread", &[]).await.unwrap();
        assert_eq!(a.content, "You bake.");
        assert_eq!(a.source_refs, Some(vec!["about".to_string()]));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let svc = service(
            Arc::new(InMemoryIndex::new()),
            ScriptedCompletion::new(&["x"]),
            Duration::from_secs(5),
        );
        assert!(matches!(
            svc.ask(Variant::Site, "   ", &[]).await,
            Err(ChatError::EmptyInput)
        ));
        assert!(matches!(
            svc.ask_stream(Variant::Librarian, "", Vec::new()),
            Err(ChatError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_fallback() {
        let svc = service(
            Arc::new(BrokenIndex),
            ScriptedCompletion::new(&["unused"]),
            Duration::from_secs(5),
        );
        let a = svc.ask(Variant::Site, "hello", &[]).await.unwrap();
        assert_eq!(a.content, FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn test_overall_budget_exceeded() {
        let svc = service(
            Arc::new(InMemoryIndex::new()),
            ScriptedCompletion::slow("late", Duration::from_secs(2)),
            Duration::from_millis(50),
        );
        assert!(matches!(
            svc.ask(Variant::Librarian, "hi", &[]).await,
            Err(ChatError::ProviderTimeout)
        ));
    }

    #[tokio::test]
    async fn test_stream_budget_exceeded_ends_with_fallback() {
        let svc = service(
            Arc::new(InMemoryIndex::new()),
            ScriptedCompletion::slow("late", Duration::from_secs(2)),
            Duration::from_millis(50),
        );
        let mut rx = svc.ask_stream(Variant::Librarian, "hi", Vec::new()).unwrap();
        let mut last = None;
        while let Some(c) = rx.recv().await {
            last = Some(c);
        }
        let last = last.unwrap();
        assert!(last.done);
        assert_eq!(last.content.as_deref(), Some(FALLBACK_MESSAGE));
    }

    #[tokio::test]
    async fn test_librarian_stream_highlights() {
        let svc = service(
            Arc::new(InMemoryIndex::new()),
            ScriptedCompletion::new(&["[THINKING:one]Read Dune", "[HIGHLIGHT:b1]"]),
            Duration::from_secs(5),
        );
        let mut rx = svc.ask_stream(Variant::Librarian, "what?", Vec::new()).unwrap();
        let mut chunks = Vec::new();
        while let Some(c) = rx.recv().await {
            chunks.push(c);
        }
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.highlight_book_id.as_deref(), Some("b1"));
        assert_eq!(last.thinking.as_deref(), Some(&["one".to_string()][..]));
    }

    #[tokio::test]
    async fn test_stalled_embedding_falls_back_within_budget() {
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

        let svc = ChatService::new(
            Retriever::new(Arc::new(StalledEmbedder), Arc::new(InMemoryIndex::new()), 2000)
                .with_timeout(Duration::from_millis(50)),
            Generator::new(
                Arc::new(ScriptedCompletion::new(&["unused"])),
                &GenerationConfig::default(),
                Duration::from_millis(50),
            ),
            Arc::new(StaticCatalog::default()),
            3,
            Duration::from_millis(300),
        );
        let a = svc.ask(Variant::Site, "hello", &[]).await.unwrap();
        assert_eq!(a.content, FALLBACK_MESSAGE);
    }
}
