//! In-memory [`VectorIndex`] for tests and local development.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Queries are brute-force
//! cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ChatError, ChatResult};
use crate::models::{EmbeddedRecord, IndexStats, Match};

use super::VectorIndex;

pub struct InMemoryIndex {
    records: RwLock<HashMap<String, EmbeddedRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.records.read() {
            Ok(records) => records.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ChatError {
    ChatError::Provider {
        status: 500,
        message: "in-memory index lock poisoned".to_string(),
    }
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: &[EmbeddedRecord]) -> ChatResult<()> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        for r in records {
            stored.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> ChatResult<Vec<Match>> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let mut matches: Vec<Match> = stored
            .values()
            .map(|r| Match {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                metadata: include_metadata.then(|| r.metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_all(&self) -> ChatResult<()> {
        self.records.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    async fn stats(&self) -> ChatResult<IndexStats> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let dimension = stored.values().next().map(|r| r.vector.len()).unwrap_or(0);
        Ok(IndexStats {
            count: stored.len() as u64,
            dimension,
        })
    }
}
