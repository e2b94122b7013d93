//! Chat response wire format and the incremental client-side decoder.
//!
//! # Shapes
//!
//! **Single-shot**: one JSON object once generation is complete:
//!
//! ```json
//! {"message": "…", "sources": ["blog/a.md"], "thinking": ["…"], "highlightBookId": "b7"}
//! ```
//!
//! **Incremental**: newline-delimited JSON chunks (`application/x-ndjson`).
//! Each chunk may carry the growing `thinking` array, a `highlightBookId`,
//! and/or a full `content` snapshot that replaces whatever was displayed
//! before. The final chunk has `"done": true`.
//!
//! # Decoder contract
//!
//! [`StreamDecoder`] is fed raw bytes as they arrive, in slices of any size.
//! It updates [`ChatState`] after every complete line, skips (and logs)
//! malformed lines without aborting, keeps thinking steps append-only, and
//! clears `is_typing` only on a `done` chunk or on [`StreamDecoder::finish`]
//! (connection close).

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::AnnotatedAnswer;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One chunk of the incremental stream, or the whole single-shot response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChunk {
    /// Single-shot answer text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Incremental content snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_book_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

impl ChatChunk {
    /// Single-shot response body for a finished answer.
    pub fn single_shot(answer: &AnnotatedAnswer) -> Self {
        Self {
            message: Some(answer.content.clone()),
            sources: answer.source_refs.clone(),
            thinking: (!answer.thinking_steps.is_empty()).then(|| answer.thinking_steps.clone()),
            highlight_book_id: answer.highlight_id.clone(),
            ..Self::default()
        }
    }

    /// Final incremental chunk for a finished answer.
    pub fn final_chunk(answer: &AnnotatedAnswer) -> Self {
        Self {
            content: Some(answer.content.clone()),
            sources: answer.source_refs.clone(),
            thinking: Some(answer.thinking_steps.clone()),
            highlight_book_id: answer.highlight_id.clone(),
            done: true,
            ..Self::default()
        }
    }

    /// Serialize as one NDJSON line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }
}

/// Splits an arbitrary byte stream into complete UTF-8 lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters and
/// JSON objects split across network reads are reassembled intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line completed by them (without `\n`,
    /// with any trailing `\r` removed).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush whatever is left after the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// What the chat UI displays, rebuilt from decoded chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub thinking: Vec<String>,
    pub highlight_id: Option<String>,
    pub content: String,
    pub sources: Vec<String>,
    pub is_typing: bool,
}

/// Incremental NDJSON decoder.
#[derive(Debug)]
pub struct StreamDecoder {
    lines: LineBuffer,
    state: ChatState,
    malformed: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            lines: LineBuffer::new(),
            state: ChatState {
                is_typing: true,
                ..ChatState::default()
            },
            malformed: 0,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Number of lines skipped because they could not be decoded.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Feed bytes as they arrive. Returns how many chunks were applied.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let lines = self.lines.push(bytes);
        lines.iter().filter(|line| self.apply_line(line)).count()
    }

    /// The stream has closed: apply any unterminated last line and stop typing.
    pub fn finish(mut self) -> ChatState {
        if let Some(rest) = self.lines.finish() {
            self.apply_line(&rest);
        }
        self.state.is_typing = false;
        self.state
    }

    fn apply_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        match decode_chunk(line) {
            Ok(chunk) => {
                apply_chunk(&mut self.state, chunk);
                true
            }
            Err(e) => {
                self.malformed += 1;
                tracing::warn!(error = %e, "skipping malformed stream chunk");
                false
            }
        }
    }
}

pub fn decode_chunk(line: &str) -> Result<ChatChunk, ChatError> {
    serde_json::from_str(line.trim()).map_err(|e| ChatError::MalformedChunk(e.to_string()))
}

/// Decode a whole single-shot response body into a finished state.
pub fn decode_single_shot(body: &str) -> Result<ChatState, ChatError> {
    let chunk = decode_chunk(body)?;
    let mut state = ChatState::default();
    apply_chunk(&mut state, chunk);
    state.is_typing = false;
    Ok(state)
}

fn apply_chunk(state: &mut ChatState, chunk: ChatChunk) {
    if let Some(thinking) = chunk.thinking {
        // Append-only: only entries beyond what is already shown are added.
        if thinking.len() > state.thinking.len() {
            let start = state.thinking.len();
            state.thinking.extend(thinking.into_iter().skip(start));
        }
    }
    if let Some(id) = chunk.highlight_book_id {
        state.highlight_id = Some(id);
    }
    if let Some(text) = chunk.content.or(chunk.message) {
        state.content = text;
    }
    if let Some(sources) = chunk.sources {
        state.sources = sources;
    }
    if chunk.done {
        state.is_typing = false;
    }
}
