//! Corpus collection for ingestion.
//!
//! Gathers blog files, profile text, and (optionally) catalog rows into
//! uniform [`Document`]s. The whole corpus is read on every call; there is no
//! delta detection. Any unreadable source aborts collection so that a partial
//! corpus never silently becomes a partial index.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::catalog::{render_entry, CatalogSource};
use crate::config::ContentConfig;
use crate::models::{Document, DocumentKind};

pub const PROFILE_SOURCE: &str = "about";

/// Collects documents from the configured content sources.
pub struct ContentCollector<'a> {
    config: &'a ContentConfig,
    catalog: Option<&'a dyn CatalogSource>,
}

impl<'a> ContentCollector<'a> {
    pub fn new(config: &'a ContentConfig) -> Self {
        Self {
            config,
            catalog: None,
        }
    }

    /// Attach a catalog; rows are only collected when `include_catalog` is set.
    pub fn with_catalog(mut self, catalog: &'a dyn CatalogSource) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn collect(&self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();

        if let Some(dir) = &self.config.blog_dir {
            docs.extend(scan_blog(
                dir,
                &self.config.include_globs,
                &self.config.exclude_globs,
            )?);
        }

        if let Some(profile) = self.profile_text()? {
            docs.push(Document::new(PROFILE_SOURCE, DocumentKind::Profile, profile));
        }

        if self.config.include_catalog {
            let catalog = self
                .catalog
                .ok_or_else(|| anyhow::anyhow!("content.include_catalog set but no catalog configured"))?;
            let entries = catalog.get_catalog().await.context("Failed to read catalog")?;
            docs.extend(entries.iter().map(|e| {
                Document::new(
                    format!("catalog/{}", e.id),
                    DocumentKind::CatalogItem,
                    render_entry(e),
                )
            }));
        }

        let before = docs.len();
        docs.retain(|d| !d.content.trim().is_empty());
        if docs.len() < before {
            tracing::warn!(skipped = before - docs.len(), "skipped empty documents");
        }

        tracing::info!(documents = docs.len(), "collected corpus");
        Ok(docs)
    }

    fn profile_text(&self) -> Result<Option<String>> {
        let mut parts = Vec::new();
        if let Some(text) = &self.config.profile_text {
            parts.push(text.trim().to_string());
        }
        if let Some(path) = &self.config.profile_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read profile file: {}", path.display()))?;
            parts.push(text.trim().to_string());
        }
        parts.retain(|p| !p.is_empty());
        Ok((!parts.is_empty()).then(|| parts.join("\n\n")))
    }
}

/// Walk the blog directory and read every matching file.
pub fn scan_blog(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<Document>> {
    if !root.exists() {
        bail!("Blog directory does not exist: {}", root.display());
    }

    let include_set = build_globset(include)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        docs.push(Document::new(
            format!("blog/{}", rel_str),
            DocumentKind::Blog,
            body,
        ));
    }

    docs.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(docs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{sample_entry, StaticCatalog};
    use std::fs;

    fn blog_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2024")).unwrap();
        fs::write(dir.path().join("hello.md"), "# Hello\n\nFirst post.").unwrap();
        fs::write(dir.path().join("2024/rust.mdx"), "Notes on Rust.").unwrap();
        fs::write(dir.path().join("draft.md"), "   \n").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        dir
    }

    fn content_config(dir: &Path) -> ContentConfig {
        ContentConfig {
            blog_dir: Some(dir.to_path_buf()),
            profile_text: Some("I write about software and books.".to_string()),
            ..ContentConfig::default()
        }
    }

    #[tokio::test]
    async fn test_collect_blog_and_profile() {
        let dir = blog_fixture();
        let cfg = content_config(dir.path());
        let docs = ContentCollector::new(&cfg).collect().await.unwrap();

        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["blog/2024/rust.mdx", "blog/hello.md", "about"]);
        assert_eq!(docs[2].kind, DocumentKind::Profile);
    }

    #[tokio::test]
    async fn test_exclude_globs() {
        let dir = blog_fixture();
        let mut cfg = content_config(dir.path());
        cfg.exclude_globs = vec!["2024/**".to_string()];
        let docs = ContentCollector::new(&cfg).collect().await.unwrap();
        assert!(docs.iter().all(|d| !d.source.contains("2024")));
    }

    #[tokio::test]
    async fn test_missing_blog_dir_fails() {
        let cfg = ContentConfig {
            blog_dir: Some("/definitely/not/here".into()),
            ..ContentConfig::default()
        };
        assert!(ContentCollector::new(&cfg).collect().await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_file_aborts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.md"), [0xff, 0xfe, 0xfd]).unwrap();
        let cfg = content_config(dir.path());
        let err = ContentCollector::new(&cfg).collect().await.unwrap_err();
        assert!(format!("{:#}", err).contains("bad.md"));
    }

    #[tokio::test]
    async fn test_catalog_rows_included_when_enabled() {
        let catalog = StaticCatalog::new(vec![sample_entry("b7", "The Lathe of Heaven")]);
        let cfg = ContentConfig {
            include_catalog: true,
            ..ContentConfig::default()
        };
        let docs = ContentCollector::new(&cfg)
            .with_catalog(&catalog)
            .collect()
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "catalog/b7");
        assert_eq!(docs[0].kind, DocumentKind::CatalogItem);
        assert!(docs[0].content.contains("The Lathe of Heaven"));
    }

    #[tokio::test]
    async fn test_catalog_flag_without_catalog_fails() {
        let cfg = ContentConfig {
            include_catalog: true,
            ..ContentConfig::default()
        };
        assert!(ContentCollector::new(&cfg).collect().await.is_err());
    }
}
