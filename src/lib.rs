//! # malcode-search
//!
//! Retrieval of previously catalogued malicious-code snippets that match an
//! input code sample. Three strategies share one corpus:
//!
//! - **containment** — a catalogued snippet appears literally inside the
//!   query once all whitespace is removed;
//! - **hash** — SHA-256 of the whitespace-free query equals a catalogued digest;
//! - **vector** — nearest neighbours of the query embedding in a Weaviate class.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   HTTP / CLI ──▶│  AppContext  │
//!                 └──────┬───────┘
//!          ┌─────────────┼─────────────────┐
//!          ▼             ▼                 ▼
//!   ┌────────────┐ ┌────────────┐  ┌───────────────┐
//!   │  matcher   │ │ simplify   │  │   semantic    │
//!   │ hash/contn │ │ (chat LLM) │─▶│ embed + k-NN  │
//!   └─────┬──────┘ └────────────┘  └──┬─────────┬──┘
//!         ▼                           ▼         ▼
//!   ┌────────────┐             ┌──────────┐ ┌──────────┐
//!   │  SQLite    │             │ Embedder │ │ Weaviate │
//!   │  corpus    │             └──────────┘ └──────────┘
//!   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mcs init                          # create the corpus table
//! mcs load samples.jsonl            # ingest extraction output
//! mcs search "import os" --mode hash
//! mcs serve                         # POST /search, POST /vector_search
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Samples, hits, and per-query outcomes |
//! | [`normalize`] | Whitespace removal and content hashing |
//! | [`corpus`] | Relational corpus store (SQLite, in-memory) |
//! | [`matcher`] | Hash and containment matchers |
//! | [`vector_store`] | Vector corpus (Weaviate, in-memory) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`chat`] | Chat-completion client |
//! | [`simplify`] | LLM reduction of oversized queries |
//! | [`semantic`] | Embedding matcher with bounded fan-out |
//! | [`context`] | Shared process resources |
//! | [`server`] | HTTP service |
//! | [`ingest`] | JSONL corpus loader |
//! | [`search`] | CLI search output |
//! | [`db`] | Database connection pool |
//! | [`migrate`] | Schema creation |
//! | [`error`] | Retrieval error taxonomy |

pub mod chat;
pub mod config;
pub mod context;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod search;
pub mod semantic;
pub mod server;
pub mod simplify;
pub mod vector_store;
