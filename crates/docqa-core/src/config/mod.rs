mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use docqa_index::{ChunkerConfig, HybridWeights, IndexConfig};
use docqa_llm::GenerationOptions;

const WEIGHT_TOLERANCE: f32 = 1e-6;

/// `DOCQA_CONFIG` if set, else `config/default.toml`.
#[must_use]
pub fn resolve_config_path() -> PathBuf {
    std::env::var("DOCQA_CONFIG").map_or_else(|_| PathBuf::from("config/default.toml"), PathBuf::from)
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first inconsistent setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.overlap_tokens >= self.chunking.max_chunk_tokens {
            bail!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.max_chunk_tokens ({})",
                self.chunking.overlap_tokens,
                self.chunking.max_chunk_tokens
            );
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be at least 1");
        }
        if let Some(min) = self.retrieval.min_similarity
            && !(-1.0..=1.0).contains(&min)
        {
            bail!("retrieval.min_similarity must be within [-1, 1], got {min}");
        }
        let (ws, wl) = (self.retrieval.w_semantic, self.retrieval.w_lexical);
        if !(0.0..=1.0).contains(&ws) || !(0.0..=1.0).contains(&wl) {
            bail!("retrieval weights must be within [0, 1], got {ws} and {wl}");
        }
        if (ws + wl - 1.0).abs() > WEIGHT_TOLERANCE {
            bail!("retrieval.w_semantic + retrieval.w_lexical must equal 1, got {}", ws + wl);
        }
        if self.synthesis.max_context_tokens == 0 {
            bail!("synthesis.max_context_tokens must be at least 1");
        }
        if self.ingest.concurrency == 0 {
            bail!("ingest.concurrency must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.chunking.max_chunk_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
        }
    }

    #[must_use]
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            min_similarity: self.retrieval.min_similarity,
            embed_timeout: self.timeouts.embedding(),
            concurrency: self.ingest.concurrency,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the weights are out of range.
    pub fn hybrid_weights(&self) -> anyhow::Result<HybridWeights> {
        HybridWeights::new(self.retrieval.w_semantic, self.retrieval.w_lexical)
            .context("invalid retrieval weights")
    }

    #[must_use]
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.synthesis.max_tokens,
            temperature: self.synthesis.temperature,
        }
    }
}
