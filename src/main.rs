//! # Site chat CLI (`site-chat`)
//!
//! Ingests the site's content into the vector index and serves the chat API.
//!
//! ## Usage
//!
//! ```bash
//! site-chat --config ./config/site-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `site-chat ingest` | Clear the index and reload it from the full corpus |
//! | `site-chat stats` | Print index record count and dimension |
//! | `site-chat ask "<question>"` | Answer one question from the terminal |
//! | `site-chat serve` | Start the HTTP chat server |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use site_chat::chat::ChatService;
use site_chat::config::{self, Config, Secrets};
use site_chat::embedding::OpenAIEmbedder;
use site_chat::prompt::Variant;
use site_chat::{index, ingest, server};

/// Retrieval-augmented chat for a personal site.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. API keys are read from `OPENAI_API_KEY` and `PINECONE_API_KEY`.
#[derive(Parser)]
#[command(
    name = "site-chat",
    about = "Retrieval-augmented chat for a personal site",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/site-chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the vector index from the configured content.
    ///
    /// Collects every blog post, the profile text, and optionally catalog
    /// rows, embeds them, then clears the index and upserts the result.
    Ingest {
        /// Report document counts without calling any provider.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show vector index statistics.
    Stats,

    /// Ask one question and print the annotated answer.
    Ask {
        question: String,

        /// Answer from the book catalog instead of the site index.
        #[arg(long)]
        librarian: bool,
    },

    /// Start the HTTP chat server.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Stats => {
            ingest::run_stats(&cfg).await?;
        }
        Commands::Ask {
            question,
            librarian,
        } => {
            let service = build_service(&cfg).await?;
            let variant = if librarian {
                Variant::Librarian
            } else {
                Variant::Site
            };
            let answer = service.ask(variant, &question, &[]).await?;

            for step in &answer.thinking_steps {
                println!("  thinking: {}", step);
            }
            if let Some(id) = &answer.highlight_id {
                println!("  highlight: {}", id);
            }
            if let Some(sources) = &answer.source_refs {
                println!("  sources: {}", sources.join(", "));
            }
            println!();
            println!("{}", answer.content);
        }
        Commands::Serve => {
            let service = build_service(&cfg).await?;
            server::run_server(&cfg, Arc::new(service)).await?;
        }
    }

    Ok(())
}

/// Validate secrets and construct every client once.
///
/// The in-memory index starts empty, so it is filled from the corpus here;
/// a hosted index is used as-is.
async fn build_service(cfg: &Config) -> anyhow::Result<ChatService> {
    let secrets = Secrets::from_env(cfg)?;

    if cfg.index.is_memory() {
        let docs = ingest::collect_documents(cfg).await?;
        let embedder = OpenAIEmbedder::new(&cfg.provider, &secrets.openai_api_key)
            .context("Failed to create embedding client")?;
        let index = index::connect(cfg, &secrets).await?;
        ingest::reindex(&docs, &embedder, index.as_ref(), cfg.provider.batch_size)
            .await
            .context("Failed to load memory index")?;
        return ChatService::from_index(cfg, &secrets, index);
    }

    ChatService::from_config(cfg, &secrets).await
}
