use std::str::FromStr;

use super::Config;

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(parsed) = v.parse::<T>() {
        Some(parsed)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_pipeline();
        self.apply_env_overrides_llm();
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Some(n) = parse_env("DOCQA_MAX_CHUNK_TOKENS") {
            self.chunking.max_chunk_tokens = n;
        }
        if let Some(n) = parse_env("DOCQA_OVERLAP_TOKENS") {
            self.chunking.overlap_tokens = n;
        }
        if let Some(n) = parse_env("DOCQA_TOP_K") {
            self.retrieval.top_k = n;
        }
        if let Some(v) = parse_env("DOCQA_MIN_SIMILARITY") {
            self.retrieval.min_similarity = Some(v);
        }
        if let Some(w) = parse_env("DOCQA_W_SEMANTIC") {
            self.retrieval.w_semantic = w;
        }
        if let Some(w) = parse_env("DOCQA_W_LEXICAL") {
            self.retrieval.w_lexical = w;
        }
        if let Some(n) = parse_env("DOCQA_MAX_CONTEXT_TOKENS") {
            self.synthesis.max_context_tokens = n;
        }
        if let Some(t) = parse_env("DOCQA_TEMPERATURE") {
            self.synthesis.temperature = t;
        }
        if let Some(n) = parse_env("DOCQA_RESPONSE_MAX_TOKENS") {
            self.synthesis.max_tokens = n;
        }
        if let Some(n) = parse_env("DOCQA_INGEST_CONCURRENCY") {
            self.ingest.concurrency = n;
        }
        if let Some(n) = parse_env("DOCQA_MAX_FILE_SIZE") {
            self.ingest.max_file_size = n;
        }
        if let Ok(v) = std::env::var("DOCQA_CACHE_PATH") {
            self.ingest.cache_path = (!v.is_empty()).then(|| v.into());
        }
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("DOCQA_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Some(secs) = parse_env("DOCQA_TIMEOUT_LLM") {
            self.timeouts.llm_seconds = secs;
        }
        if let Some(secs) = parse_env("DOCQA_TIMEOUT_EMBEDDING") {
            self.timeouts.embedding_seconds = secs;
        }
    }
}
