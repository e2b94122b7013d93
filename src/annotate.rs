//! In-band annotation protocol carried in model output.
//!
//! The model is asked to emit `[THINKING:<step>]` tokens describing its
//! reasoning and at most one `[HIGHLIGHT:<entityId>]` token naming a catalog
//! entry. This is a convention the model usually follows, not a structured
//! output mode, so the parser accepts any number of thinking tokens in any
//! position, zero highlights, and tags interleaved in any order.
//!
//! All knowledge of the tag grammar lives in this module.
//!
//! ```rust
//! use site_chat::annotate::parse;
//!
//! let answer = parse("[THINKING:a][THINKING:b]Hello [HIGHLIGHT:x42] world");
//! assert_eq!(answer.thinking_steps, vec!["a", "b"]);
//! assert_eq!(answer.highlight_id.as_deref(), Some("x42"));
//! assert_eq!(answer.content, "Hello world");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::AnnotatedAnswer;

const THINKING_TAG: &str = "THINKING";
const HIGHLIGHT_TAG: &str = "HIGHLIGHT";

static CONTROL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(THINKING|HIGHLIGHT):([^\]]+)\]").expect("control token pattern is valid")
});

/// Parse raw model text into an [`AnnotatedAnswer`].
///
/// - every `[THINKING:..]` in left-to-right order becomes a thinking step;
/// - the first `[HIGHLIGHT:..]` becomes the highlight id;
/// - all tokens of both kinds are removed from the content, which is trimmed.
///
/// Removing a token can join its neighbours into a new one
/// (`"[THINK[THINKING:a]ING:b]"`), so stripping repeats until nothing
/// matches. Steps found on later passes follow those found earlier.
///
/// Where removing a token would leave two spaces side by side, one of them
/// is dropped as well.
pub fn parse(raw: &str) -> AnnotatedAnswer {
    let mut thinking_steps = Vec::new();
    let mut highlight_id = None;
    let mut content = strip_pass(raw, &mut thinking_steps, &mut highlight_id);
    while CONTROL_TOKEN.is_match(&content) {
        content = strip_pass(&content, &mut thinking_steps, &mut highlight_id);
    }

    AnnotatedAnswer {
        content: content.trim().to_string(),
        thinking_steps,
        highlight_id,
        source_refs: None,
    }
}

/// One left-to-right extraction. Each pass removes at least one token, so
/// repeating it terminates.
fn strip_pass(
    raw: &str,
    thinking_steps: &mut Vec<String>,
    highlight_id: &mut Option<String>,
) -> String {
    let mut content = String::with_capacity(raw.len());
    let mut last = 0usize;

    for caps in CONTROL_TOKEN.captures_iter(raw) {
        let (Some(whole), Some(tag), Some(value)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();

        match tag.as_str() {
            THINKING_TAG if !value.is_empty() => thinking_steps.push(value.to_string()),
            HIGHLIGHT_TAG if highlight_id.is_none() && !value.is_empty() => {
                *highlight_id = Some(value.to_string())
            }
            _ => {}
        }

        content.push_str(&raw[last..whole.start()]);
        last = whole.end();
        if content.ends_with(is_blank) && raw[last..].starts_with(is_blank) {
            last += 1;
        }
    }
    content.push_str(&raw[last..]);
    content
}

/// Parse text that may still be arriving.
///
/// A trailing, unterminated control token (e.g. `"...[THINK"` or
/// `"[HIGHLIGHT:b1"`) is held back so that partial tag syntax never reaches
/// the visible content.
pub fn parse_partial(raw: &str) -> AnnotatedAnswer {
    let mut answer = parse(complete_prefix(raw));
    // Stripping can expose a new unterminated token: "[THINK[THINKING:a]".
    let held = complete_prefix(&answer.content).trim_end().to_string();
    answer.content = held;
    answer
}

/// The longest prefix of `raw` that does not end inside a control token.
///
/// A token value may itself contain `[`, so every unterminated `[` is a
/// candidate, not just the last one.
pub fn complete_prefix(raw: &str) -> &str {
    let from = raw.rfind(']').map_or(0, |i| i + 1);
    raw[from..]
        .match_indices('[')
        .map(|(i, _)| from + i)
        .find(|&open| could_be_token(&raw[open..]))
        .map_or(raw, |open| &raw[..open])
}

fn could_be_token(tail: &str) -> bool {
    let body = &tail[1..];
    [THINKING_TAG, HIGHLIGHT_TAG].iter().any(|tag| {
        let with_colon = format!("{}:", tag);
        with_colon.starts_with(body) || body.starts_with(&with_colon)
    })
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Whether `text` still contains anything that looks like control syntax.
pub fn has_control_syntax(text: &str) -> bool {
    CONTROL_TOKEN.is_match(text)
}
