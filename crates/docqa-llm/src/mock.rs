//! Test-only mock provider.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, GenerationOptions, LlmProvider};

const DEFAULT_DIMENSION: usize = 64;

/// Scripted provider with deterministic bag-of-words embeddings.
///
/// Texts sharing words get similar vectors, so similarity ranking behaves
/// sensibly in tests without a real model.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    embed_calls: Arc<AtomicUsize>,
    generate_calls: Arc<AtomicUsize>,
    pub default_response: String,
    pub dimension: usize,
    pub model_id: String,
    pub fail_generate: bool,
    pub fail_embed: bool,
    /// Embedding fails for any text containing one of these markers.
    pub fail_embed_on: Vec<String>,
    /// Milliseconds to sleep before answering.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            generate_calls: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            dimension: DEFAULT_DIMENSION,
            model_id: "mock-embed".into(),
            fail_generate: false,
            fail_embed: false,
            fail_embed_on: Vec::new(),
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_generate: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn fail_embedding_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_embed_on.push(marker.into());
        self
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Prompts received by `generate`, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

impl LlmProvider for MockProvider {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String, LlmError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_generate {
            return Err(LlmError::Unavailable("mock LLM error".into()));
        }
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_owned());
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_embed || self.fail_embed_on.iter().any(|m| text.contains(m.as_str())) {
            return Err(LlmError::Unavailable("mock embedding error".into()));
        }
        Ok(bag_of_words(text, self.dimension))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn bag_of_words(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    let len = vector.len();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let slot = (hasher.finish() % len as u64) as usize;
        vector[slot] += 1.0;
    }
    // Keep every vector non-zero so cosine similarity stays defined.
    vector[0] += 0.01;
    vector
}
