//! Core data models used throughout the chat pipeline.
//!
//! These types represent the documents, embedded records, catalog entries and
//! parsed answers that flow through ingestion and request handling.

use serde::{Deserialize, Serialize};

/// What kind of content a [`Document`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    Blog,
    Profile,
    CatalogItem,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Blog => "blog",
            DocumentKind::Profile => "profile",
            DocumentKind::CatalogItem => "catalog-item",
        }
    }
}

/// A unit of ingestible knowledge.
///
/// `source` is the stable logical origin (`"blog/<file>"`, `"about"`,
/// `"catalog/<id>"`). Documents are rebuilt wholesale on every ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub source: String,
    pub kind: DocumentKind,
}

impl Document {
    pub fn new(source: impl Into<String>, kind: DocumentKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            kind,
        }
    }
}

/// Metadata stored next to each vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentKind>,
}

/// A document after embedding, keyed by its content-addressed id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// One nearest-neighbor hit from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: String,
    pub score: f32,
    pub metadata: Option<RecordMetadata>,
}

/// Index size summary returned by `describe_index_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub count: u64,
    pub dimension: usize,
}

/// A book in the reading catalog. Owned by the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub year_read: Option<i32>,
    pub rating: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a caller-held conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Parsed generation output with control tokens moved into their own fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedAnswer {
    pub content: String,
    pub thinking_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_refs: Option<Vec<String>>,
}
