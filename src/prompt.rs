//! Prompt assembly for the two chat variants.
//!
//! Both variants share the same message layout: one system message holding
//! the preamble plus grounding material, then the bounded conversation
//! history, then the current question as the last user message.

use crate::catalog::render_catalog;
use crate::completion::ChatMessage;
use crate::models::{CatalogEntry, ConversationTurn, Role};
use crate::retrieve::ContextBlock;

/// Which assistant is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Site,
    Librarian,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Site => "site",
            Variant::Librarian => "librarian",
        }
    }
}

/// Material the answer must be grounded in.
#[derive(Debug, Clone)]
pub enum Grounding {
    Context(ContextBlock),
    Catalog(Vec<CatalogEntry>),
}

impl Grounding {
    pub fn variant(&self) -> Variant {
        match self {
            Grounding::Context(_) => Variant::Site,
            Grounding::Catalog(_) => Variant::Librarian,
        }
    }
}

const THINKING_RULES: &str = "\
Before answering you may emit short reasoning steps, each written as \
[THINKING:<step>] on its own. They are shown to the reader separately, so keep \
each one under a sentence.";

const SITE_RULES: &str = "\
Answer using only the context below. Each passage starts with its source in \
square brackets. If the context does not contain the answer, say you don't \
know rather than guessing. Keep answers short and conversational.";

const LIBRARIAN_RULES: &str = "\
Answer using only the catalog below. Each line is one book and starts with \
[id:<id>]. When your answer is mainly about one book, emit exactly one \
[HIGHLIGHT:<id>] token with that book's id. Never emit more than one \
HIGHLIGHT token and never invent ids. Do not mention ids in the prose.";

fn persona(variant: Variant, owner: Option<&str>) -> String {
    let whose = match owner {
        Some(name) if !name.trim().is_empty() => format!("{}'s", name.trim()),
        _ => "this".to_string(),
    };
    match variant {
        Variant::Site => format!("You are the assistant on {} personal website.", whose),
        Variant::Librarian => format!("You are the librarian for {} reading collection.", whose),
    }
}

/// The system message: persona, rules, then grounding material.
pub fn system_prompt(grounding: &Grounding, owner: Option<&str>) -> String {
    let variant = grounding.variant();
    let mut prompt = persona(variant, owner);
    prompt.push_str("\n\n");

    match grounding {
        Grounding::Context(block) => {
            prompt.push_str(SITE_RULES);
            prompt.push_str("\n\n");
            prompt.push_str(THINKING_RULES);
            prompt.push_str("\n\nContext:\n");
            if block.is_empty() {
                prompt.push_str("(no relevant content found)");
            } else {
                prompt.push_str(&block.text);
            }
        }
        Grounding::Catalog(entries) => {
            prompt.push_str(LIBRARIAN_RULES);
            prompt.push_str("\n\n");
            prompt.push_str(THINKING_RULES);
            prompt.push_str("\n\nCatalog:\n");
            if entries.is_empty() {
                prompt.push_str("(the catalog is empty)");
            } else {
                prompt.push_str(&render_catalog(entries));
            }
        }
    }
    prompt
}

/// Build the full message list for one completion call.
///
/// Only the last `max_history_turns` turns of `history` are kept. The
/// question always goes last, even if the caller's history already ends
/// with a user turn.
pub fn build_messages(
    grounding: &Grounding,
    owner: Option<&str>,
    history: &[ConversationTurn],
    question: &str,
    max_history_turns: usize,
) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(max_history_turns);
    let mut messages = Vec::with_capacity(history.len() - start + 2);

    messages.push(ChatMessage::system(system_prompt(grounding, owner)));
    for turn in &history[start..] {
        if turn.content.trim().is_empty() {
            continue;
        }
        messages.push(match turn.role {
            Role::User => ChatMessage::user(turn.content.clone()),
            Role::Assistant => ChatMessage::assistant(turn.content.clone()),
        });
    }
    messages.push(ChatMessage::user(question));
    messages
}
