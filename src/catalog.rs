//! Read-only access to the book catalog.
//!
//! The catalog is owned by an external store; this crate only reads a
//! snapshot of it, once per librarian request. [`JsonFileCatalog`] reads a
//! JSON array exported from that store; [`StaticCatalog`] wraps an in-memory
//! list.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::models::CatalogEntry;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the current catalog snapshot.
    async fn get_catalog(&self) -> Result<Vec<CatalogEntry>>;
}

/// Catalog backed by a JSON file containing an array of entries.
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for JsonFileCatalog {
    async fn get_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read catalog: {}", self.path.display()))?;
        parse_catalog(&raw)
            .with_context(|| format!("Failed to parse catalog: {}", self.path.display()))
    }
}

/// A fixed, in-memory catalog.
#[derive(Default)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn get_catalog(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.entries.clone())
    }
}

/// Parse a JSON array of catalog entries, rejecting out-of-range ratings.
pub fn parse_catalog(raw: &str) -> Result<Vec<CatalogEntry>> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(raw)?;
    for e in &entries {
        if !(1..=5).contains(&e.rating) {
            anyhow::bail!("catalog entry '{}' has rating {} (expected 1..=5)", e.id, e.rating);
        }
    }
    Ok(entries)
}

/// Render one entry as a single prompt line.
///
/// ```rust
/// use site_chat::catalog::render_entry;
/// use site_chat::models::CatalogEntry;
///
/// let e = CatalogEntry {
///     id: "b1".into(),
///     title: "Dune".into(),
///     author: "Frank Herbert".into(),
///     year_read: Some(2021),
///     rating: 5,
///     tags: vec!["sci-fi".into()],
///     review: None,
///     color: None,
/// };
/// assert_eq!(
///     render_entry(&e),
///     "[id:b1] \"Dune\" by Frank Herbert (read 2021, rated 5/5) tags: sci-fi"
/// );
/// ```
pub fn render_entry(entry: &CatalogEntry) -> String {
    let mut line = format!("[id:{}] \"{}\" by {}", entry.id, entry.title, entry.author);

    match entry.year_read {
        Some(year) => line.push_str(&format!(" (read {}, rated {}/5)", year, entry.rating)),
        None => line.push_str(&format!(" (rated {}/5)", entry.rating)),
    }
    if !entry.tags.is_empty() {
        line.push_str(&format!(" tags: {}", entry.tags.join(", ")));
    }
    if let Some(review) = entry.review.as_deref().filter(|r| !r.trim().is_empty()) {
        line.push_str(&format!(" review: {}", review.trim().replace('\n', " ")));
    }
    line
}

/// Render a whole snapshot, one entry per line.
pub fn render_catalog(entries: &[CatalogEntry]) -> String {
    entries
        .iter()
        .map(render_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) fn sample_entry(id: &str, title: &str) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        title: title.to_string(),
        author: "Ursula K. Le Guin".to_string(),
        year_read: Some(2023),
        rating: 4,
        tags: vec!["fiction".to_string()],
        review: None,
        color: Some("#223344".to_string()),
    }
}
