//! In-memory embedding index over chunks, backed by the content-addressed cache.

use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use docqa_llm::{EmbeddingProvider, guarded};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{CacheOutcome, EmbeddingCache};
use crate::chunker::Chunk;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    /// Query results below this cosine similarity are dropped; `None` keeps all.
    pub min_similarity: Option<f32>,
    pub embed_timeout: Duration,
    /// Maximum embedding calls in flight during batch upserts.
    pub concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_similarity: None,
            embed_timeout: Duration::from_secs(30),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    /// The embedding collaborator was called.
    Embedded,
    /// The vector came from the cache.
    Cached,
}

pub type ChunkOutcome = (String, Result<UpsertStatus>);

/// Per-chunk results of indexing one document.
#[derive(Debug)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    /// One entry per chunk, in chunk order.
    pub outcomes: Vec<ChunkOutcome>,
}

impl IngestReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &IndexError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id.as_str(), e)))
    }

    #[must_use]
    pub fn embedded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, r)| matches!(r, Ok(UpsertStatus::Embedded)))
            .count()
    }
}

#[derive(Debug)]
struct IndexEntry {
    chunk: Arc<Chunk>,
    vector: Arc<[f32]>,
}

/// Chunks and their vectors, ranked by cosine similarity on query.
///
/// Entries keep insertion order; re-upserting a chunk id replaces it in place.
pub struct EmbeddingIndex<E> {
    provider: Arc<E>,
    cache: EmbeddingCache,
    entries: RwLock<Vec<IndexEntry>>,
    dimension: OnceLock<usize>,
    config: IndexConfig,
}

impl<E> std::fmt::Debug for EmbeddingIndex<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("model", &self.cache.model_id())
            .field("entries", &self.len())
            .field("dimension", &self.dimension.get())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E> EmbeddingIndex<E> {
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Vector length shared by every entry, once the first vector is known.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry of `document_id`; returns how many were removed.
    ///
    /// Cached vectors are kept, so re-indexing unchanged text is free.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.chunk.document_id != document_id);
        before - entries.len()
    }

    /// Indexed chunks in insertion order.
    #[must_use]
    pub fn chunks(&self) -> Vec<Arc<Chunk>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| Arc::clone(&e.chunk))
            .collect()
    }
}

impl<E: EmbeddingProvider> EmbeddingIndex<E> {
    pub fn new(provider: Arc<E>, config: IndexConfig) -> Self {
        let cache = EmbeddingCache::new(provider.model_id());
        Self {
            provider,
            cache,
            entries: RwLock::new(Vec::new()),
            dimension: OnceLock::new(),
            config,
        }
    }

    fn check_dimension(&self, subject: &str, actual: usize) -> Result<()> {
        let expected = *self.dimension.get_or_init(|| actual);
        if expected == actual {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                chunk_id: subject.to_owned(),
                expected,
                actual,
            })
        }
    }

    /// Embed `chunk` (or reuse its cached vector) and add it to the index.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingUnavailable` when the collaborator fails or times out,
    /// `Cancelled` when `cancel` fires, `DimensionMismatch` for a vector of the
    /// wrong length. The index is unchanged on error.
    pub async fn upsert(&self, chunk: Arc<Chunk>, cancel: &CancellationToken) -> Result<UpsertStatus> {
        let (vector, status) = self.embed_chunk(&chunk, cancel).await?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = IndexEntry { chunk, vector };
        if let Some(existing) = entries.iter_mut().find(|e| e.chunk.id == entry.chunk.id) {
            *existing = entry;
        } else {
            entries.push(entry);
        }
        Ok(status)
    }

    async fn embed_chunk(
        &self,
        chunk: &Chunk,
        cancel: &CancellationToken,
    ) -> Result<(Arc<[f32]>, UpsertStatus)> {
        let key = self.cache.key_for(&chunk.text);
        let (vector, outcome) = self
            .cache
            .get_or_compute(&key, || async {
                let vector = guarded(
                    self.provider.embed(&chunk.text),
                    self.config.embed_timeout,
                    cancel,
                )
                .await
                .map_err(|e| IndexError::from_llm(&chunk.id, e))?;
                if vector.is_empty() {
                    return Err(IndexError::EmbeddingUnavailable {
                        chunk_id: chunk.id.clone(),
                        reason: "empty embedding".into(),
                    });
                }
                self.check_dimension(&chunk.id, vector.len())?;
                Ok(vector)
            })
            .instrument(tracing::info_span!("embed", chunk_id = %chunk.id))
            .await?;

        let status = match outcome {
            CacheOutcome::Hit => {
                self.check_dimension(&chunk.id, vector.len())?;
                tracing::debug!(chunk_id = %chunk.id, "embedding cache hit");
                UpsertStatus::Cached
            }
            CacheOutcome::Miss => UpsertStatus::Embedded,
        };
        Ok((vector, status))
    }

    /// Embed `chunks` with bounded concurrency; results come back in chunk order.
    async fn embed_batch(
        &self,
        chunks: &[Arc<Chunk>],
        cancel: &CancellationToken,
    ) -> Vec<(usize, Result<(Arc<[f32]>, UpsertStatus)>)> {
        let mut staged: Vec<_> = futures::stream::iter(chunks.iter().enumerate())
            .map(|(i, chunk)| async move {
                let result = self.embed_chunk(chunk, cancel).await;
                if let Err(e) = &result {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "chunk not indexed");
                }
                (i, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        staged.sort_by_key(|(i, _)| *i);
        staged
    }

    /// Upsert every chunk of one document with bounded concurrency.
    ///
    /// Per-chunk failures are collected in the report and never abort the batch.
    /// Successful chunks are added in chunk order once the batch completes.
    pub async fn upsert_batch(
        &self,
        document_id: &str,
        chunks: &[Arc<Chunk>],
        cancel: &CancellationToken,
    ) -> IngestReport {
        let span = tracing::info_span!("ingest", document_id, chunks = chunks.len());
        async {
            let staged = self.embed_batch(chunks, cancel).await;
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let outcomes = settle(chunks, staged, |entry| {
                if let Some(existing) = entries.iter_mut().find(|e| e.chunk.id == entry.chunk.id) {
                    *existing = entry;
                } else {
                    entries.push(entry);
                }
            });
            drop(entries);
            report(document_id, chunks.len(), outcomes)
        }
        .instrument(span)
        .await
    }

    /// Index a new version of `document_id`, replacing all of its earlier entries.
    ///
    /// Every chunk is embedded first; the swap happens in one step afterwards, at
    /// the position of the document's first earlier entry. Chunks that fail are
    /// reported and left out of the new version.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancel` fired before the batch completed. The
    /// earlier version stays indexed in that case.
    pub async fn replace_document(
        &self,
        document_id: &str,
        chunks: &[Arc<Chunk>],
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let span = tracing::info_span!("ingest", document_id, chunks = chunks.len());
        async {
            let staged = self.embed_batch(chunks, cancel).await;
            if cancel.is_cancelled() {
                tracing::info!("ingestion cancelled, earlier version kept");
                return Err(IndexError::Cancelled);
            }

            let mut fresh = Vec::with_capacity(chunks.len());
            let outcomes = settle(chunks, staged, |entry| fresh.push(entry));

            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let at = entries
                .iter()
                .position(|e| e.chunk.document_id == document_id)
                .unwrap_or(entries.len());
            let before = entries.len();
            entries.retain(|e| e.chunk.document_id != document_id);
            let removed = before - entries.len();
            let tail = entries.split_off(at);
            entries.extend(fresh);
            entries.extend(tail);
            drop(entries);

            if removed > 0 {
                tracing::debug!(removed, "replaced earlier version");
            }
            Ok(report(document_id, chunks.len(), outcomes))
        }
        .instrument(span)
        .await
    }

    /// Rank indexed chunks by cosine similarity to `text`.
    ///
    /// Descending by score; equal scores keep insertion order. At most `top_k`
    /// results, all at or above `min_similarity` when one is set.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingUnavailable` (subject `"query"`) if the query cannot be
    /// embedded, `Cancelled` on cancellation, `DimensionMismatch` if the query
    /// vector does not match the index.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Arc<Chunk>, f32)>> {
        if text.trim().is_empty() {
            return Err(IndexError::InvalidInput("query text is empty".into()));
        }

        let query_vector = guarded(self.provider.embed(text), self.config.embed_timeout, cancel)
            .instrument(tracing::info_span!("embed", chunk_id = "query"))
            .await
            .map_err(|e| IndexError::from_llm("query", e))?;
        if let Some(&expected) = self.dimension.get()
            && expected != query_vector.len()
        {
            return Err(IndexError::DimensionMismatch {
                chunk_id: "query".into(),
                expected,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(Arc<Chunk>, f32)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| (Arc::clone(&e.chunk), cosine_similarity(&query_vector, &e.vector)))
            .filter(|(_, score)| self.config.min_similarity.is_none_or(|min| *score >= min))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        tracing::debug!(results = scored.len(), "similarity query complete");
        Ok(scored)
    }

    /// Persist the embedding cache to `path`.
    ///
    /// # Errors
    ///
    /// See [`EmbeddingCache::save`].
    pub async fn save_cache(&self, path: &Path) -> Result<usize> {
        self.cache.save(path).await
    }

    /// Load cached vectors from `path`; indexed entries are not affected.
    ///
    /// # Errors
    ///
    /// See [`EmbeddingCache::load`].
    pub async fn load_cache(&self, path: &Path) -> Result<usize> {
        self.cache.load(path, self.dimension()).await
    }
}

/// Turn staged embeddings into outcomes, handing each successful entry to `keep`.
fn settle(
    chunks: &[Arc<Chunk>],
    staged: Vec<(usize, Result<(Arc<[f32]>, UpsertStatus)>)>,
    mut keep: impl FnMut(IndexEntry),
) -> Vec<ChunkOutcome> {
    staged
        .into_iter()
        .map(|(i, result)| {
            let chunk = &chunks[i];
            let status = result.map(|(vector, status)| {
                keep(IndexEntry {
                    chunk: Arc::clone(chunk),
                    vector,
                });
                status
            });
            (chunk.id.clone(), status)
        })
        .collect()
}

fn report(document_id: &str, chunks: usize, outcomes: Vec<ChunkOutcome>) -> IngestReport {
    let report = IngestReport {
        document_id: document_id.to_owned(),
        chunks,
        outcomes,
    };
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        embedded = report.embedded(),
        "document indexed"
    );
    report
}

/// Cosine similarity; zero when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
