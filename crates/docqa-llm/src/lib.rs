//! Embedding and text-generation collaborators used by the docqa pipeline.

pub mod error;
pub mod guard;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::LlmError;
pub use guard::guarded;
pub use provider::{EmbeddingProvider, GenerationOptions, LlmProvider};
