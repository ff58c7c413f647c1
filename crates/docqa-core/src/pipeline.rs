//! End-to-end question answering: ingest documents, then ask questions.

use std::path::Path;
use std::sync::Arc;

use docqa_index::{
    Chunk, Chunker, Document, EmbeddingIndex, HybridRetriever, IndexError, IngestReport,
    LoaderRegistry, RetrievalResult,
};
use docqa_llm::ollama::OllamaProvider;
use docqa_llm::{EmbeddingProvider, LlmProvider};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{QaError, Result};
use crate::synthesizer::{Answer, Synthesizer, SynthesizerConfig};

/// Wires chunker, loaders, embedding index, retriever and synthesizer around
/// one provider that both embeds and generates.
pub struct QaPipeline<P> {
    config: Config,
    chunker: Chunker,
    loaders: LoaderRegistry,
    index: Arc<EmbeddingIndex<P>>,
    retriever: HybridRetriever<P>,
    synthesizer: Synthesizer<P>,
}

impl<P> std::fmt::Debug for QaPipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaPipeline")
            .field("chunker", &self.chunker)
            .field("loaders", &self.loaders)
            .field("retriever", &self.retriever)
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}

impl QaPipeline<OllamaProvider> {
    /// Pipeline backed by the Ollama server named in `config.llm`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the configuration does not validate.
    pub fn ollama(config: Config) -> Result<Self> {
        let provider = OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        );
        Self::new(config, Arc::new(provider))
    }
}

impl<P: EmbeddingProvider + LlmProvider> QaPipeline<P> {
    /// # Errors
    ///
    /// Returns `InvalidInput` if the configuration does not validate.
    pub fn new(config: Config, provider: Arc<P>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| QaError::InvalidInput(format!("{e:#}")))?;
        let weights = config
            .hybrid_weights()
            .map_err(|e| QaError::InvalidInput(format!("{e:#}")))?;

        let chunker = Chunker::new(config.chunker_config())?;
        let index = Arc::new(EmbeddingIndex::new(
            Arc::clone(&provider),
            config.index_config(),
        ));
        let retriever = HybridRetriever::new(Arc::clone(&index), weights);
        let synthesizer = Synthesizer::new(
            provider,
            SynthesizerConfig {
                generation: config.generation_options(),
                llm_timeout: config.timeouts.llm(),
            },
        );

        Ok(Self {
            loaders: LoaderRegistry::with_defaults(config.ingest.max_file_size),
            config,
            chunker,
            index,
            retriever,
            synthesizer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &EmbeddingIndex<P> {
        &self.index
    }

    /// Mutable access to the loaders, e.g. to register another format.
    pub fn loaders_mut(&mut self) -> &mut LoaderRegistry {
        &mut self.loaders
    }

    /// Indexed chunks in insertion order.
    #[must_use]
    pub fn chunks(&self) -> Vec<Arc<Chunk>> {
        self.index.chunks()
    }

    /// Chunk and index an already extracted document, replacing any earlier
    /// version of it.
    ///
    /// Per-chunk embedding failures are reported, not raised.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the document has no text and `Cancelled` if
    /// `cancel` fired during indexing, in which case the earlier version stays
    /// indexed.
    pub async fn ingest_document(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let chunks: Vec<Arc<Chunk>> = self
            .chunker
            .chunk(document)?
            .into_iter()
            .map(Arc::new)
            .collect();

        Ok(self
            .index
            .replace_document(document.id(), &chunks, cancel)
            .await?)
    }

    /// Extract `path` with the matching loader, then ingest it.
    ///
    /// # Errors
    ///
    /// Returns `Extraction` for unreadable or unsupported files, otherwise as
    /// [`Self::ingest_document`].
    pub async fn ingest_path(&self, path: &Path, cancel: &CancellationToken) -> Result<IngestReport> {
        let document = self.loaders.load(path).await.map_err(|e| match e {
            IndexError::UnsupportedFormat(ext) => QaError::Extraction {
                path: path.to_path_buf(),
                reason: format!("unsupported format {ext}"),
            },
            IndexError::FileTooLarge(size) => QaError::Extraction {
                path: path.to_path_buf(),
                reason: format!(
                    "file is {size} bytes, limit is {}",
                    self.config.ingest.max_file_size
                ),
            },
            IndexError::Io(io) => QaError::Extraction {
                path: path.to_path_buf(),
                reason: io.to_string(),
            },
            other => other.into(),
        })?;
        tracing::info!(
            document_id = document.id(),
            format = %document.format(),
            "document extracted"
        );
        self.ingest_document(&document, cancel).await
    }

    /// Rank indexed chunks for `question` without answering.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingUnavailable` if the question cannot be embedded,
    /// `InvalidInput` for an empty question, `Cancelled` on cancellation.
    pub async fn retrieve(&self, question: &str, cancel: &CancellationToken) -> Result<RetrievalResult> {
        let candidates = self.index.chunks();
        Ok(self
            .retriever
            .retrieve(question, &candidates, self.config.retrieval.top_k, cancel)
            .await?)
    }

    /// Answer `question` from the indexed documents.
    ///
    /// # Errors
    ///
    /// See [`Self::ask_with_cancel`].
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.ask_with_cancel(question, &CancellationToken::new()).await
    }

    /// Answer `question`, aborting with `Cancelled` when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Any of the query-time errors: `InvalidInput`, `EmbeddingUnavailable`,
    /// `ContextOverflow`, `SynthesisUnavailable`, `Cancelled`.
    pub async fn ask_with_cancel(&self, question: &str, cancel: &CancellationToken) -> Result<Answer> {
        let result = self.retrieve(question, cancel).await?;
        self.synthesizer
            .synthesize(
                question,
                &result,
                self.config.synthesis.max_context_tokens,
                cancel,
            )
            .await
    }

    /// Write the embedding cache to `ingest.cache_path`.
    ///
    /// Returns the number of vectors written, 0 when no path is configured.
    ///
    /// # Errors
    ///
    /// Returns the index's persistence error.
    pub async fn save_cache(&self) -> Result<usize> {
        let Some(path) = &self.config.ingest.cache_path else {
            return Ok(0);
        };
        Ok(self.index.save_cache(path).await?)
    }

    /// Load vectors from `ingest.cache_path` if configured and present.
    ///
    /// # Errors
    ///
    /// Returns `CachePersistence` when the path cannot be checked, otherwise the
    /// index's persistence error for unreadable or malformed files.
    pub async fn load_cache(&self) -> Result<usize> {
        let Some(path) = &self.config.ingest.cache_path else {
            return Ok(0);
        };
        let exists = tokio::fs::try_exists(path).await.map_err(|e| {
            IndexError::CachePersistence(format!("cannot access {}: {e}", path.display()))
        })?;
        if !exists {
            tracing::debug!(path = %path.display(), "no embedding cache on disk yet");
            return Ok(0);
        }
        Ok(self.index.load_cache(path).await?)
    }
}
