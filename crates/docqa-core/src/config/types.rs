use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

fn default_max_chunk_tokens() -> usize {
    1000
}

fn default_overlap_tokens() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_weight() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Unset keeps every indexed chunk as a semantic candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
    #[serde(default = "default_weight")]
    pub w_semantic: f32,
    #[serde(default = "default_weight")]
    pub w_lexical: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: None,
            w_semantic: default_weight(),
            w_lexical: default_weight(),
        }
    }
}

fn default_max_context_tokens() -> usize {
    2000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_response_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated answer tokens.
    #[serde(default = "default_response_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            temperature: default_temperature(),
            max_tokens: default_response_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "qwen3:1.7b".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_seconds: u64,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_seconds: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_seconds)
    }

    #[must_use]
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_seconds)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_seconds: default_llm_timeout(),
            embedding_seconds: default_embedding_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_max_file_size() -> u64 {
    docqa_index::loader::DEFAULT_MAX_FILE_SIZE
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Embedding calls in flight per document.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Where the embedding cache is persisted, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_file_size: default_max_file_size(),
            cache_path: None,
        }
    }
}
