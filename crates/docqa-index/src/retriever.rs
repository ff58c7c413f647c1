//! Hybrid retrieval: semantic and lexical rankings merged by weighted sum.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use docqa_llm::EmbeddingProvider;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};
use crate::index::EmbeddingIndex;
use crate::lexical::{TermStats, query_terms};

const WEIGHT_TOLERANCE: f32 = 1e-6;

/// Signal weights; both in `[0, 1]` and summing to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    semantic: f32,
    lexical: f32,
}

impl HybridWeights {
    /// # Errors
    ///
    /// Returns `InvalidInput` if a weight is outside `[0, 1]` or the sum is not 1.
    pub fn new(semantic: f32, lexical: f32) -> Result<Self> {
        let in_range = |w: f32| (0.0..=1.0).contains(&w);
        if !in_range(semantic) || !in_range(lexical) {
            return Err(IndexError::InvalidInput(format!(
                "hybrid weights must be within [0, 1], got {semantic} and {lexical}"
            )));
        }
        if (semantic + lexical - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(IndexError::InvalidInput(format!(
                "hybrid weights must sum to 1, got {semantic} + {lexical}"
            )));
        }
        Ok(Self { semantic, lexical })
    }

    #[must_use]
    pub fn semantic(&self) -> f32 {
        self.semantic
    }

    #[must_use]
    pub fn lexical(&self) -> f32 {
        self.lexical
    }
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            lexical: 0.5,
        }
    }
}

/// One ranked chunk with its component scores.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub combined: f32,
    /// Raw cosine similarity; `None` when the chunk is not indexed or fell below
    /// the index's similarity threshold.
    pub semantic: Option<f32>,
    /// Raw keyword-overlap score.
    pub lexical: f32,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|h| h.chunk.id.as_str())
    }
}

pub struct HybridRetriever<E> {
    index: Arc<EmbeddingIndex<E>>,
    weights: HybridWeights,
}

impl<E> std::fmt::Debug for HybridRetriever<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

impl<E: EmbeddingProvider> HybridRetriever<E> {
    #[must_use]
    pub fn new(index: Arc<EmbeddingIndex<E>>, weights: HybridWeights) -> Self {
        Self { index, weights }
    }

    #[must_use]
    pub fn weights(&self) -> HybridWeights {
        self.weights
    }

    /// Rank `chunks` against `query` and return the best `top_k`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty query, or the index's error if the
    /// query cannot be embedded.
    pub async fn retrieve(
        &self,
        query: &str,
        chunks: &[Arc<Chunk>],
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Err(IndexError::InvalidInput("query text is empty".into()));
        }
        if chunks.is_empty() || top_k == 0 {
            return Ok(RetrievalResult {
                query: query.to_owned(),
                hits: Vec::new(),
            });
        }

        let span = tracing::info_span!("retrieve", candidates = chunks.len(), top_k);
        async {
            let semantic: HashMap<String, f32> = self
                .index
                .query(query, usize::MAX, cancel)
                .await?
                .into_iter()
                .map(|(chunk, score)| (chunk.id.clone(), score))
                .collect();

            let hits = rank(query, chunks, &semantic, self.weights, top_k);
            tracing::debug!(
                hits = hits.len(),
                semantic_scored = semantic.len(),
                "hybrid ranking complete"
            );
            Ok(RetrievalResult {
                query: query.to_owned(),
                hits,
            })
        }
        .instrument(span)
        .await
    }
}

/// Score and order `candidates` given precomputed semantic similarities.
///
/// Descending by combined score, then by raw semantic score (missing scores
/// last), then by candidate order.
#[must_use]
pub fn rank(
    query: &str,
    candidates: &[Arc<Chunk>],
    semantic: &HashMap<String, f32>,
    weights: HybridWeights,
    top_k: usize,
) -> Vec<ScoredChunk> {
    let terms: HashSet<String> = query_terms(query);
    let raw_semantic: Vec<Option<f32>> = candidates
        .iter()
        .map(|c| semantic.get(&c.id).copied())
        .collect();
    let raw_lexical: Vec<f32> = candidates
        .iter()
        .map(|c| TermStats::new(&c.text).score(&terms))
        .collect();

    let norm_semantic = min_max(&raw_semantic);
    let norm_lexical = min_max(&raw_lexical.iter().copied().map(Some).collect::<Vec<_>>());

    let mut scored: Vec<ScoredChunk> = candidates
        .iter()
        .enumerate()
        .map(|(i, chunk)| ScoredChunk {
            chunk: Arc::clone(chunk),
            combined: weights.semantic * norm_semantic[i] + weights.lexical * norm_lexical[i],
            semantic: raw_semantic[i],
            lexical: raw_lexical[i],
        })
        .collect();

    scored.sort_by(|a, b| {
        b.combined.total_cmp(&a.combined).then_with(|| {
            let sa = a.semantic.unwrap_or(f32::NEG_INFINITY);
            let sb = b.semantic.unwrap_or(f32::NEG_INFINITY);
            sb.total_cmp(&sa)
        })
    });
    scored.truncate(top_k);
    scored
}

/// Min-max normalize into `[0, 1]`; missing values map to 0.
///
/// When every present value is equal, positive values map to 1 and the rest to 0.
fn min_max(values: &[Option<f32>]) -> Vec<f32> {
    let present = values.iter().flatten().copied();
    let (min, max) = present.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min > max {
        return vec![0.0; values.len()];
    }

    let range = max - min;
    values
        .iter()
        .map(|v| match v {
            None => 0.0,
            Some(v) if range <= f32::EPSILON => {
                if *v > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Some(v) => (v - min) / range,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use docqa_llm::mock::MockProvider;

    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_id, chunk_text};
    use crate::index::IndexConfig;

    fn make_chunks(texts: &[&str]) -> Vec<Arc<Chunk>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut c = chunk_text("doc", "doc.txt", t, ChunkerConfig::default())
                    .unwrap()
                    .remove(0);
                c.index = i;
                c.id = chunk_id("doc", i);
                Arc::new(c)
            })
            .collect()
    }

    async fn indexed(texts: &[&str]) -> (Arc<EmbeddingIndex<MockProvider>>, Vec<Arc<Chunk>>) {
        let index = Arc::new(EmbeddingIndex::new(
            Arc::new(MockProvider::default()),
            IndexConfig::default(),
        ));
        let chunks = make_chunks(texts);
        let token = CancellationToken::new();
        for c in &chunks {
            index.upsert(Arc::clone(c), &token).await.unwrap();
        }
        (index, chunks)
    }

    #[test]
    fn weights_validation() {
        assert!(HybridWeights::new(0.5, 0.5).is_ok());
        assert!(HybridWeights::new(1.0, 0.0).is_ok());
        assert!(HybridWeights::new(0.7, 0.7).is_err());
        assert!(HybridWeights::new(-0.5, 1.5).is_err());
        assert!(HybridWeights::new(0.3, 0.3).is_err());
    }

    #[test]
    fn min_max_spreads_values() {
        let n = min_max(&[Some(1.0), Some(3.0), Some(2.0)]);
        assert_eq!(n, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn min_max_degenerate_ranges() {
        assert_eq!(min_max(&[Some(0.4), Some(0.4)]), vec![1.0, 1.0]);
        assert_eq!(min_max(&[Some(0.0), Some(0.0)]), vec![0.0, 0.0]);
        assert_eq!(min_max(&[None, None]), vec![0.0, 0.0]);
        assert_eq!(min_max(&[Some(2.0), None]), vec![1.0, 0.0]);
        assert!(min_max(&[]).is_empty());
    }

    #[test]
    fn rank_orders_by_combined_then_semantic_then_position() {
        let chunks = make_chunks(&["x one", "x two", "x three"]);
        let semantic: HashMap<String, f32> = [
            ("doc#0".to_owned(), 0.2),
            ("doc#1".to_owned(), 0.9),
            ("doc#2".to_owned(), 0.9),
        ]
        .into();
        let weights = HybridWeights::new(1.0, 0.0).unwrap();
        let ranked = rank("unrelated", &chunks, &semantic, weights, 3);
        let ids: Vec<&str> = ranked.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["doc#1", "doc#2", "doc#0"]);
    }

    #[test]
    fn unscored_chunks_sort_after_scored_ties() {
        let chunks = make_chunks(&["apple", "apple"]);
        let semantic: HashMap<String, f32> = [("doc#1".to_owned(), 0.0)].into();
        let weights = HybridWeights::new(0.0, 1.0).unwrap();
        let ranked = rank("apple", &chunks, &semantic, weights, 2);
        assert_eq!(ranked[0].chunk.id, "doc#1");
        assert_eq!(ranked[1].semantic, None);
    }

    #[test]
    fn lexical_only_prefers_keyword_match() {
        let chunks = make_chunks(&["bananas are yellow", "the capital of France is Paris"]);
        let weights = HybridWeights::new(0.0, 1.0).unwrap();
        let ranked = rank("capital France", &chunks, &HashMap::new(), weights, 2);
        assert_eq!(ranked[0].chunk.id, "doc#1");
        assert!((ranked[0].combined - 1.0).abs() < f32::EPSILON);
        assert!(ranked[1].combined.abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn retrieve_finds_relevant_chunk() {
        let (index, chunks) = indexed(&[
            "Bananas grow in tropical climates.",
            "Paris is the capital of France. It has a population of over 2 million.",
            "The borrow checker enforces aliasing rules.",
        ])
        .await;
        let retriever = HybridRetriever::new(index, HybridWeights::default());
        let result = retriever
            .retrieve("What is the capital of France?", &chunks, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.hits[0].chunk.id, "doc#1");
        assert!(result.hits[0].semantic.unwrap() > 0.0);
        assert!(result.hits[0].lexical > 0.0);
    }

    #[tokio::test]
    async fn retrieve_with_no_candidates_is_empty() {
        let (index, _) = indexed(&["something"]).await;
        let retriever = HybridRetriever::new(index, HybridWeights::default());
        let result = retriever
            .retrieve("query", &[], 5, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn retrieve_rejects_empty_query() {
        let (index, chunks) = indexed(&["something"]).await;
        let retriever = HybridRetriever::new(index, HybridWeights::default());
        let err = retriever
            .retrieve(" ", &chunks, 5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn retrieve_propagates_cancellation() {
        let (index, chunks) = indexed(&["something"]).await;
        let retriever = HybridRetriever::new(index, HybridWeights::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = retriever
            .retrieve("something", &chunks, 5, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }

    mod proptest_ordering {
        use proptest::prelude::*;

        use super::*;

        const WORDS: &[&str] = &[
            "river", "stone", "cloud", "engine", "paper", "forest", "signal", "copper",
        ];

        fn texts() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec(
                prop::collection::vec(prop::sample::select(WORDS), 1..6).prop_map(|w| w.join(" ")),
                1..12,
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn semantic_only_weights_match_similarity_query(
                docs in texts(),
                query in prop::collection::vec(prop::sample::select(WORDS), 1..4),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let query = query.join(" ");
                let (from_query, from_retrieve) = runtime.block_on(async {
                    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
                    let (index, chunks) = indexed(&refs).await;
                    let token = CancellationToken::new();
                    let from_query: Vec<String> = index
                        .query(&query, chunks.len(), &token)
                        .await
                        .unwrap()
                        .into_iter()
                        .map(|(c, _)| c.id.clone())
                        .collect();
                    let retriever =
                        HybridRetriever::new(index, HybridWeights::new(1.0, 0.0).unwrap());
                    let from_retrieve: Vec<String> = retriever
                        .retrieve(&query, &chunks, chunks.len(), &token)
                        .await
                        .unwrap()
                        .chunk_ids()
                        .map(str::to_owned)
                        .collect();
                    (from_query, from_retrieve)
                });
                prop_assert_eq!(from_query, from_retrieve);
            }
        }
    }
}
