//! # docqa CLI
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the conversation database and the documents directory |
//! | `docqa index` | Build the passage index, or reuse it if the documents are unchanged |
//! | `docqa ask <id> <question>` | Run one conversational turn |
//! | `docqa history <id>` | Print a conversation's transcript |
//! | `docqa clear <id>` | Reset a conversation's transcript |
//! | `docqa serve` | Start the HTTP chat transport |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::config;
use docqa::embedding::create_embedder;
use docqa::index::IndexStore;
use docqa::migrate;
use docqa::pipeline::{AnswerError, Pipeline};
use docqa::server;

/// Conversational question answering over a folder of documents.
#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the conversation database and the documents directory.
    Init,

    /// Build the passage index for the current documents.
    Index {
        /// Ignore any persisted index and rebuild from the documents.
        #[arg(long)]
        force: bool,
    },

    /// Ask a question within a conversation.
    Ask {
        #[arg(allow_negative_numbers = true)]
        conversation: i64,

        /// Question text; multiple words are joined with spaces.
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },

    /// Print the stored transcript of a conversation.
    History {
        #[arg(allow_negative_numbers = true)]
        conversation: i64,
    },

    /// Reset a conversation's transcript.
    Clear {
        #[arg(allow_negative_numbers = true)]
        conversation: i64,
    },

    /// Start the HTTP chat server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.documents.dir)?;
            println!("Database initialized successfully.");
            println!("Documents directory: {}", cfg.documents.dir.display());
        }
        Commands::Index { force } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let store = IndexStore::new(&cfg, embedder).with_reuse_persisted(!force);
            let index = store.get_or_rebuild().await?;
            println!("Index ready.");
            println!("  passages:    {}", index.len());
            println!("  model:       {}", index.model());
            println!(
                "  chunking:    {} chars, {} overlap",
                index.chunking().chunk_chars,
                index.chunking().overlap_chars
            );
            println!("  fingerprint: {}", index.fingerprint());
            println!(
                "  rebuilt:     {}",
                if store.rebuild_count() > 0 { "yes" } else { "no" }
            );
        }
        Commands::Ask {
            conversation,
            query,
        } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            match pipeline.answer(conversation, &query.join(" ")).await {
                Ok(answer) => println!("{}", answer),
                Err(AnswerError::EmptyQuery) => println!("{}", cfg.messages.empty_query),
                Err(e) => {
                    // the pipeline has logged the cause; the user sees only the message
                    println!("{}", e.user_message(&cfg.messages));
                    std::process::exit(1);
                }
            }
        }
        Commands::History { conversation } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let transcript = pipeline.transcript(conversation).await?;
            if transcript.is_empty() {
                println!("(no history)");
            } else {
                println!("{}", transcript);
            }
        }
        Commands::Clear { conversation } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            pipeline.clear(conversation).await?;
            println!("{}", cfg.messages.cleared);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
