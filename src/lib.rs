//! # Page RAG
//!
//! A small page store with a retrieval-augmented chat endpoint.
//!
//! Pages are stored in SQLite. A background worker splits each page into
//! overlapping chunks and embeds them through Ollama. `POST /chat` embeds the
//! question, picks the nearest chunks by cosine distance, renders them into a
//! Handlebars prompt and asks the generation model for an answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────────────┐
//! │   HTTP   │──▶│   store   │──▶│ SQLite pages/users │
//! └────┬─────┘   └─────┬─────┘   └─────────┬──────────┘
//!      │               │ enqueue           │
//!      │               ▼                   ▼
//!      │         ┌───────────┐   ┌────────────────────┐
//!      │         │  indexer  │──▶│  pages_embeddings  │
//!      │         └───────────┘   └─────────┬──────────┘
//!      ▼                                   │
//! ┌──────────┐   ┌───────────┐   ┌─────────┴──┐   ┌────────────┐
//! │   rag    │──▶│ retrieve  │   │   prompt   │──▶│ generation │
//! └──────────┘   └───────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! page-rag init                 # create database
//! page-rag serve                # start HTTP server on BIND_ADDR
//! page-rag embed pending        # backfill embeddings
//! page-rag search "ownership" --limit 3
//! page-rag ask "What is Rust?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Flag / environment configuration |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Pipeline error type |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | User and page persistence |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding backend abstraction |
//! | [`indexer`] | Background embedding index maintenance |
//! | [`retrieve`] | Cosine similarity retrieval |
//! | [`prompt`] | Handlebars prompt templates |
//! | [`generation`] | Chat generation backend |
//! | [`rag`] | Retrieval-augmented answering |
//! | [`server`] | HTTP API server |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod indexer;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod retrieve;
pub mod server;
pub mod store;
