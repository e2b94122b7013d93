//! Answer generation with the annotation side channel.
//!
//! [`Generator`] owns the completion client and turns a question plus its
//! grounding into an [`AnnotatedAnswer`]. It never fails: provider errors and
//! timeouts are logged with their stage and replaced by [`fallback_answer`].
//!
//! Highlights are checked against the catalog snapshot the answer was
//! grounded in. An id that is not in the snapshot is dropped, and every
//! outcome is counted in [`HighlightStats`] so prompt drift shows up in logs.

use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::annotate;
use crate::completion::{ChatMessage, CompletionProvider};
use crate::config::GenerationConfig;
use crate::error::{log_stage_failure, ChatError, ChatResult, Stage};
use crate::models::{AnnotatedAnswer, ConversationTurn};
use crate::prompt::{build_messages, Grounding};
use crate::stream::ChatChunk;

pub const FALLBACK_MESSAGE: &str =
    "Sorry, I can't answer that right now. Please try again in a moment.";

/// The degraded answer shown when any pipeline stage fails.
pub fn fallback_answer() -> AnnotatedAnswer {
    AnnotatedAnswer {
        content: FALLBACK_MESSAGE.to_string(),
        ..AnnotatedAnswer::default()
    }
}

/// Highlight outcome counters.
#[derive(Debug, Default)]
pub struct HighlightStats {
    answers: AtomicU64,
    highlighted: AtomicU64,
    unknown_dropped: AtomicU64,
    expected_missing: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HighlightCounts {
    pub answers: u64,
    pub highlighted: u64,
    pub unknown_dropped: u64,
    pub expected_missing: u64,
}

impl HighlightStats {
    pub fn snapshot(&self) -> HighlightCounts {
        HighlightCounts {
            answers: self.answers.load(Ordering::Relaxed),
            highlighted: self.highlighted.load(Ordering::Relaxed),
            unknown_dropped: self.unknown_dropped.load(Ordering::Relaxed),
            expected_missing: self.expected_missing.load(Ordering::Relaxed),
        }
    }
}

pub struct Generator {
    completion: Arc<dyn CompletionProvider>,
    owner: Option<String>,
    max_history_turns: usize,
    timeout: Duration,
    stats: HighlightStats,
}

impl Generator {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        config: &GenerationConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            completion,
            owner: config.owner.clone(),
            max_history_turns: config.max_history_turns,
            timeout,
            stats: HighlightStats::default(),
        }
    }

    pub fn stats(&self) -> &HighlightStats {
        &self.stats
    }

    fn messages(
        &self,
        question: &str,
        grounding: &Grounding,
        history: &[ConversationTurn],
    ) -> Vec<ChatMessage> {
        build_messages(
            grounding,
            self.owner.as_deref(),
            history,
            question,
            self.max_history_turns,
        )
    }

    /// Generate a complete answer, degrading to the fallback on failure.
    pub async fn generate(
        &self,
        question: &str,
        grounding: &Grounding,
        history: &[ConversationTurn],
    ) -> AnnotatedAnswer {
        match self.try_generate(question, grounding, history).await {
            Ok(answer) => answer,
            Err(e) => {
                log_stage_failure(Stage::Generate, &e);
                fallback_answer()
            }
        }
    }

    /// Generate a complete answer, surfacing provider errors and timeouts.
    pub async fn try_generate(
        &self,
        question: &str,
        grounding: &Grounding,
        history: &[ConversationTurn],
    ) -> ChatResult<AnnotatedAnswer> {
        let messages = self.messages(question, grounding, history);
        let raw = tokio::time::timeout(self.timeout, self.completion.complete(&messages))
            .await
            .map_err(|_| ChatError::ProviderTimeout)??;
        Ok(self.finalize(annotate::parse(&raw), grounding))
    }

    /// Generate while sending [`ChatChunk`]s to `tx` whenever the visible
    /// answer changes, then a final `done` chunk.
    ///
    /// If the receiver goes away the provider stream is dropped and no final
    /// chunk is sent. Returns the final answer either way.
    pub async fn generate_stream(
        &self,
        question: &str,
        grounding: &Grounding,
        history: &[ConversationTurn],
        tx: &mpsc::Sender<ChatChunk>,
    ) -> AnnotatedAnswer {
        let messages = self.messages(question, grounding, history);
        let pumped = tokio::time::timeout(self.timeout, self.pump(&messages, grounding, tx)).await;

        let answer = match pumped {
            Ok(Ok(Pumped::Complete(raw))) => self.finalize(annotate::parse(&raw), grounding),
            Ok(Ok(Pumped::Disconnected(raw))) => {
                tracing::debug!("chat client disconnected mid-stream");
                return annotate::parse_partial(&raw);
            }
            Ok(Err(e)) => {
                log_stage_failure(Stage::Generate, &e);
                fallback_answer()
            }
            Err(_) => {
                log_stage_failure(Stage::Generate, &ChatError::ProviderTimeout);
                fallback_answer()
            }
        };

        if tx.send(ChatChunk::final_chunk(&answer)).await.is_err() {
            tracing::debug!("chat client disconnected before final chunk");
        }
        answer
    }

    async fn pump(
        &self,
        messages: &[ChatMessage],
        grounding: &Grounding,
        tx: &mpsc::Sender<ChatChunk>,
    ) -> ChatResult<Pumped> {
        let mut deltas = self.completion.complete_stream(messages).await?;
        let mut raw = String::new();
        let mut shown = AnnotatedAnswer::default();

        while let Some(delta) = deltas.next().await {
            raw.push_str(&delta?);

            let mut partial = annotate::parse_partial(&raw);
            partial.highlight_id = partial
                .highlight_id
                .filter(|id| highlight_is_known(id, grounding));

            let Some(chunk) = progress_chunk(&shown, &partial) else {
                continue;
            };
            shown = partial;
            if tx.send(chunk).await.is_err() {
                return Ok(Pumped::Disconnected(raw));
            }
        }
        Ok(Pumped::Complete(raw))
    }

    /// Validate the highlight, attach sources and update counters.
    fn finalize(&self, mut answer: AnnotatedAnswer, grounding: &Grounding) -> AnnotatedAnswer {
        self.stats.answers.fetch_add(1, Ordering::Relaxed);

        if let Some(id) = answer.highlight_id.take() {
            if highlight_is_known(&id, grounding) {
                self.stats.highlighted.fetch_add(1, Ordering::Relaxed);
                answer.highlight_id = Some(id);
            } else {
                self.stats.unknown_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(highlight = %id, variant = grounding.variant().as_str(), "dropping unknown highlight id");
            }
        }

        match grounding {
            Grounding::Context(block) => {
                let sources = block.sources();
                answer.source_refs = (!sources.is_empty()).then_some(sources);
            }
            Grounding::Catalog(entries) => {
                if answer.highlight_id.is_none() {
                    let content = answer.content.to_lowercase();
                    if let Some(entry) = entries
                        .iter()
                        .find(|e| !e.title.is_empty() && content.contains(&e.title.to_lowercase()))
                    {
                        self.stats.expected_missing.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(title = %entry.title, id = %entry.id, "highlight expected but missing");
                    }
                }
            }
        }

        answer
    }
}

enum Pumped {
    Complete(String),
    Disconnected(String),
}

fn highlight_is_known(id: &str, grounding: &Grounding) -> bool {
    match grounding {
        Grounding::Catalog(entries) => entries.iter().any(|e| e.id == id),
        // Nothing to highlight on the site assistant.
        Grounding::Context(_) => false,
    }
}

/// The chunk announcing what changed between two visible states, if anything.
fn progress_chunk(shown: &AnnotatedAnswer, next: &AnnotatedAnswer) -> Option<ChatChunk> {
    let thinking_grew = next.thinking_steps.len() > shown.thinking_steps.len();
    let highlight_changed = next.highlight_id.is_some() && next.highlight_id != shown.highlight_id;
    let content_changed = next.content != shown.content;

    if !(thinking_grew || highlight_changed || content_changed) {
        return None;
    }
    Some(ChatChunk {
        thinking: thinking_grew.then(|| next.thinking_steps.clone()),
        highlight_book_id: if highlight_changed {
            next.highlight_id.clone()
        } else {
            None
        },
        content: content_changed.then(|| next.content.clone()),
        ..ChatChunk::default()
    })
}
