use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Sampling options forwarded to the language model on every completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.3,
        }
    }
}

/// Turns text into a fixed-length vector.
///
/// Implementations must return vectors of the same dimension for the same
/// `model_id`; the index relies on it when caching and ranking.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single piece of text.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding backend is unreachable or returns nothing.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Identifier of the embedding model, part of every cache key.
    fn model_id(&self) -> &str;
}

/// Text-completion collaborator used for answer synthesis.
pub trait LlmProvider: Send + Sync {
    /// Complete `prompt` and return the generated text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or produces no text.
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn name(&self) -> &str;
}
