//! External model provider boundary: embedding and generation.
//!
//! Both providers are out of scope to implement for real (per the purpose
//! and scope section) — this module only owns the trait boundary, a thin
//! `reqwest`-based HTTP client against an OpenAI-compatible wire shape, and
//! deterministic stub implementations for tests.

pub mod embedding;
pub mod generation;

pub use embedding::{EmbeddingError, Embedder, HttpEmbedder};
pub use generation::{GenerationError, GenerationParams, Generator, HttpGenerator, Prompt};

#[cfg(any(test, feature = "test-support"))]
pub use embedding::{FailingEmbedder, StubEmbedder};
#[cfg(any(test, feature = "test-support"))]
pub use generation::StubGenerator;
