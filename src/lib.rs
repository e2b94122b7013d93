//! # Site Chat
//!
//! Retrieval-augmented chat for a personal content site.
//!
//! Blog posts, profile text and (optionally) book catalog rows are embedded
//! into a hosted vector index. At question time the site assistant retrieves
//! the nearest passages and grounds a generated answer in them; the librarian
//! grounds its answer in a catalog snapshot instead and can point at one book.
//! Both stream their answers with an in-band annotation channel carrying
//! reasoning steps and the highlighted book.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │ Content  │──▶│ Embedder │──▶│ Vector index │      (ingest)
//! │ blog/... │   │ sha256 id│   │ Pinecone/mem │
//! └──────────┘   └──────────┘   └──────┬───────┘
//!                                      │
//!   question ──▶ Retriever ◀───────────┘
//!                    │
//!                    ▼
//!               Generator ──▶ annotate ──▶ NDJSON / JSON  (serve, ask)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`collect`] | Corpus collection |
//! | [`catalog`] | Read-only book catalog access |
//! | [`chunk`] | Optional fixed-window chunker |
//! | [`embedding`] | Embedding provider and content-addressed records |
//! | [`index`] | Vector index trait and backends |
//! | [`ingest`] | Offline reindex pipeline |
//! | [`retrieve`] | Query-time context assembly |
//! | [`completion`] | Chat completion provider |
//! | [`prompt`] | Prompt assembly per variant |
//! | [`annotate`] | `[THINKING:..]` / `[HIGHLIGHT:..]` parser |
//! | [`generate`] | Answer generation with fallback |
//! | [`chat`] | Request-path orchestration |
//! | [`stream`] | Wire chunks and the incremental decoder |
//! | [`server`] | HTTP chat server |

pub mod annotate;
pub mod catalog;
pub mod chat;
pub mod chunk;
pub mod collect;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod http;
pub mod index;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod server;
pub mod stream;
