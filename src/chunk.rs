//! Fixed-window text chunker with overlap.
//!
//! Disabled by default: each document is embedded whole. When
//! `chunking.enabled` is set, documents longer than `max_chars` are split into
//! overlapping windows before embedding. Each window becomes its own
//! [`Document`] whose source carries a `#<n>` suffix, so window ids stay
//! content-addressed like everything else.
//!
//! Windows prefer to end on a newline or space boundary. Lengths are counted
//! in chars, never bytes, so multi-byte text is never split mid-codepoint.

use crate::config::ChunkingConfig;
use crate::models::Document;

/// Split a document according to the chunking config.
pub fn chunk_document(doc: &Document, config: &ChunkingConfig) -> Vec<Document> {
    if !config.enabled || doc.content.chars().count() <= config.max_chars {
        return vec![doc.clone()];
    }

    split_windows(&doc.content, config.max_chars, config.overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Document::new(format!("{}#{}", doc.source, i), doc.kind, text))
        .collect()
}

/// Split text into windows of at most `max_chars` chars, each starting
/// `overlap` chars before the end of the previous one.
pub fn split_windows(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars - 1);

    if chars.len() <= max_chars {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut windows = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + max_chars).min(chars.len());

        if end < chars.len() {
            // Back off to the last whitespace that still leaves room past the overlap.
            let floor = start + overlap + 1;
            if let Some(pos) = (floor..end)
                .rev()
                .find(|&i| chars[i] == '\n' || chars[i] == ' ')
            {
                end = pos + 1;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            windows.push(piece.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    windows
}
