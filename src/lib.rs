//! # ragline
//!
//! A small Retrieval-Augmented-Generation service: it watches a document
//! folder, chunks and embeds what it finds, stores the vectors in SQLite,
//! and answers natural-language questions from the retrieved chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ChangeEvent  ┌─────────────┐  chunks+vectors  ┌──────────┐
//! │ Watcher  │──────────────▶│ Message Bus │─────────────────▶│  SQLite  │
//! │ FS/Drive │               │  (pub/sub)  │    Processor     │  store   │
//! └──────────┘               └─────────────┘                  └────┬─────┘
//!                                                                  │
//!                                            ┌─────────────┐       │
//!                                 question──▶│ Query Agent │◀──────┘
//!                                            │ embed+rank  │──▶ LLM ──▶ answer
//!                                            └─────────────┘
//! ```
//!
//! The bus decouples the watcher from the processor: change events are
//! queued per topic and delivered FIFO to subscribers, and processing
//! failures come back as error events rather than crashed loops. The query
//! path reads the store directly; the bus is not involved.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`bus`] | Topic-keyed pub/sub router |
//! | [`watcher`] | Poll-and-diff change detection |
//! | [`processor`] | Fetch → parse → chunk → embed → store |
//! | [`agent`] | Retrieval + prompt assembly + generation |
//! | [`chunk`] | Sliding-window and record chunkers |
//! | [`parse`] | Mime-type dispatch (text, markdown, CSV, XLSX) |
//! | [`embedding`] | Embedding client + vector helpers |
//! | [`llm`] | Language model client |
//! | [`store`] | Vector store trait; SQLite and in-memory backends |
//! | [`source`] | Document source trait; filesystem and Drive backends |
//! | [`config`] | TOML configuration |
//! | [`errors`] | Transient/permanent/validation/consistency taxonomy |

pub mod agent;
pub mod bus;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod processor;
pub mod source;
pub mod source_drive;
pub mod source_fs;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod watcher;
