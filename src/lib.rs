//! Document intelligence retrieval and RAG core, exposed as a library so
//! both the `docintel-core` binary and the `tests/` integration suite can
//! build an `AppState` against real or stub providers.

pub mod cache;
pub mod chunker;
pub mod citations;
pub mod config;
pub mod error;
pub mod extractors;
pub mod ingestion;
pub mod lexical_index;
pub mod providers;
pub mod rag;
pub mod routes;
pub mod search;
pub mod server;
pub mod state;
pub mod store;
pub mod vector_index;
