//! # docqa
//!
//! A conversational question-answering service over a local folder of
//! documents.
//!
//! Each user message is answered by retrieving the most relevant passages
//! from the documents and asking a chat model to answer from those passages
//! and the conversation so far. Conversation transcripts persist per
//! conversation id. The passage index is rebuilt automatically whenever the
//! contents of the documents folder change.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ documents/  │──▶│ load + chunk │──▶│ vector index │
//! │ pdf/txt/md  │   │  + embed     │   │ (fingerprint)│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ top-k
//!   message ──▶ Pipeline ◀────────────────────┘
//!                  │  ▲
//!        prompt ──▶│  │◀── transcript (SQLite)
//!                  ▼  │
//!               chat model ──▶ reply
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                          # create database and documents dir
//! docqa index                         # build (or reuse) the index
//! docqa ask 42 "What are cats?"       # one turn in conversation 42
//! docqa history 42
//! docqa serve                         # HTTP chat transport
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF, plain-text and DOCX text extraction |
//! | [`loader`] | Documents directory loader |
//! | [`chunk`] | Recursive text chunking |
//! | [`fingerprint`] | Corpus change detection |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index and its rebuild-on-change store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`conversation`] | Transcript persistence |
//! | [`transcript`] | Transcript formatting |
//! | [`llm`] | Chat model client and prompt assembly |
//! | [`pipeline`] | Per-turn answer pipeline |
//! | [`server`] | HTTP chat transport |

pub mod chunk;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod transcript;
