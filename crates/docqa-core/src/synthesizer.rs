//! Context packing, prompt composition and answer parsing.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use docqa_index::{RetrievalResult, ScoredChunk};
use docqa_llm::{GenerationOptions, LlmError, LlmProvider, guarded};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{QaError, Result};

/// Marker the model is told to open with when the excerpts lack the answer.
pub const NOT_FOUND_MARKER: &str = "Not found in the provided documents";

const NO_CONTEXT_ANSWER: &str =
    "Not found in the provided documents: no indexed passage matched the question.";

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Bucket a cosine similarity.
    #[must_use]
    pub fn from_similarity(score: f32) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Cited chunk ids in order of first mention.
    pub citations: Vec<String>,
    /// Set when the model cited nothing and every context chunk is reported instead.
    pub citations_inferred: bool,
    pub confidence: Option<Confidence>,
    /// Chunk ids placed in the prompt, in rank order.
    pub context_chunks: Vec<String>,
    /// Ranked chunks left out because they did not fit the budget.
    pub skipped_chunks: Vec<String>,
    pub context_tokens: usize,
}

impl Answer {
    /// Whether the answer says the documents do not contain the information.
    #[must_use]
    pub fn reports_missing(&self) -> bool {
        states_missing(&self.text)
    }
}

/// Chunks selected for the prompt.
#[derive(Debug)]
pub struct ContextWindow<'a> {
    pub included: Vec<&'a ScoredChunk>,
    pub skipped: Vec<&'a ScoredChunk>,
    pub tokens: usize,
}

/// Greedily take ranked chunks while they fit in `budget` tokens.
///
/// A chunk that would overflow is skipped whole and later, smaller chunks may
/// still fit.
///
/// # Errors
///
/// Returns `ContextOverflow` if the top-ranked chunk alone exceeds `budget`.
pub fn pack_context(result: &RetrievalResult, budget: usize) -> Result<ContextWindow<'_>> {
    if let Some(top) = result.hits.first()
        && top.chunk.token_count > budget
    {
        return Err(QaError::ContextOverflow {
            top_chunk: top.chunk.id.clone(),
            needed: top.chunk.token_count,
            budget,
        });
    }

    let mut window = ContextWindow {
        included: Vec::new(),
        skipped: Vec::new(),
        tokens: 0,
    };
    for hit in &result.hits {
        let cost = hit.chunk.token_count;
        if window.tokens + cost > budget {
            tracing::debug!(chunk_id = %hit.chunk.id, cost, used = window.tokens, budget, "chunk skipped, over budget");
            window.skipped.push(hit);
            continue;
        }
        window.tokens += cost;
        window.included.push(hit);
    }
    Ok(window)
}

fn attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// Compose the answering prompt for `query` over the packed excerpts.
#[must_use]
pub fn build_prompt(query: &str, window: &ContextWindow<'_>) -> String {
    let mut out = String::from(
        "Answer the question using only the document excerpts below.\n\
         Cite every excerpt you rely on by its id in square brackets, for example [report-1a2b3c4d#0].\n",
    );
    let _ = writeln!(
        out,
        "If the excerpts do not contain the answer, begin your reply with \"{NOT_FOUND_MARKER}\" and state what is missing. Do not use outside knowledge.\n"
    );

    out.push_str("<excerpts>\n");
    for hit in &window.included {
        let _ = writeln!(
            out,
            "  <excerpt id=\"{}\" source=\"{}\">",
            attr(&hit.chunk.id),
            attr(&hit.chunk.source),
        );
        out.push_str(hit.chunk.text.trim_end());
        out.push_str("\n  </excerpt>\n");
    }
    out.push_str("</excerpts>\n\n");

    let _ = write!(out, "Question: {}\nAnswer:", query.trim());
    out
}

/// Drop `<think>...</think>` segments some models emit before the answer.
///
/// An unterminated segment discards the rest of the text.
#[must_use]
pub fn strip_thinking(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut remaining = text;
    while let Some(start) = remaining.find("<think>") {
        out.push_str(&remaining[..start]);
        let after = &remaining[start + "<think>".len()..];
        match after.find("</think>") {
            Some(end) => remaining = &after[end + "</think>".len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    out.push_str(remaining);
    out.trim().to_owned()
}

/// Bracketed ids in `text` that belong to `allowed`, first mention first, deduplicated.
///
/// Brackets may hold several ids separated by commas.
#[must_use]
pub fn extract_citations(text: &str, allowed: &[String]) -> Vec<String> {
    let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    for cap in CITATION_RE.captures_iter(text) {
        for id in cap[1].split(',').map(str::trim) {
            if allowed.contains(id) && seen.insert(id.to_owned()) {
                citations.push(id.to_owned());
            }
        }
    }
    citations
}

fn states_missing(text: &str) -> bool {
    text.to_lowercase()
        .contains(&NOT_FOUND_MARKER.to_lowercase())
}

fn confidence(window: &ContextWindow<'_>, answer: &str) -> Option<Confidence> {
    let best = window
        .included
        .iter()
        .filter_map(|h| h.semantic)
        .reduce(f32::max)?;
    if states_missing(answer) {
        return Some(Confidence::Low);
    }
    Some(Confidence::from_similarity(best))
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesizerConfig {
    pub generation: GenerationOptions,
    pub llm_timeout: Duration,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            generation: GenerationOptions::default(),
            llm_timeout: Duration::from_secs(120),
        }
    }
}

/// Produces cited answers from retrieval results via a language model.
pub struct Synthesizer<P> {
    provider: Arc<P>,
    config: SynthesizerConfig,
}

impl<P> std::fmt::Debug for Synthesizer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> Synthesizer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: SynthesizerConfig) -> Self {
        Self { provider, config }
    }

    /// Answer `query` from `result` within `max_context_tokens` of context.
    ///
    /// An empty result yields a "not found" answer without calling the model.
    /// Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns `ContextOverflow` if the best chunk alone exceeds the budget,
    /// `SynthesisUnavailable` if the model fails or times out, `Cancelled` if
    /// `cancel` fires.
    pub async fn synthesize(
        &self,
        query: &str,
        result: &RetrievalResult,
        max_context_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(QaError::InvalidInput("question is empty".into()));
        }
        if result.is_empty() {
            tracing::info!("no relevant chunks, answering without the model");
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.into(),
                citations: Vec::new(),
                citations_inferred: false,
                confidence: None,
                context_chunks: Vec::new(),
                skipped_chunks: Vec::new(),
                context_tokens: 0,
            });
        }

        let window = pack_context(result, max_context_tokens)?;
        let prompt = build_prompt(query, &window);
        let context_chunks: Vec<String> =
            window.included.iter().map(|h| h.chunk.id.clone()).collect();

        let span = tracing::info_span!(
            "synthesize",
            provider = self.provider.name(),
            context_chunks = context_chunks.len(),
            context_tokens = window.tokens,
        );
        let raw = guarded(
            self.provider.generate(&prompt, &self.config.generation),
            self.config.llm_timeout,
            cancel,
        )
        .instrument(span)
        .await
        .map_err(|e| match e {
            LlmError::Cancelled => QaError::Cancelled,
            other => QaError::SynthesisUnavailable(other.to_string()),
        })?;

        let text = strip_thinking(&raw);
        let mut citations = extract_citations(&text, &context_chunks);
        let citations_inferred = citations.is_empty();
        if citations_inferred {
            citations.clone_from(&context_chunks);
        }

        let answer = Answer {
            confidence: confidence(&window, &text),
            text,
            citations,
            citations_inferred,
            skipped_chunks: window.skipped.iter().map(|h| h.chunk.id.clone()).collect(),
            context_tokens: window.tokens,
            context_chunks,
        };
        tracing::info!(
            citations = answer.citations.len(),
            inferred = answer.citations_inferred,
            skipped = answer.skipped_chunks.len(),
            "answer synthesized"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use docqa_index::Chunk;
    use docqa_llm::mock::MockProvider;

    use super::*;

    fn hit(id: &str, tokens: usize, semantic: Option<f32>) -> ScoredChunk {
        let text = vec!["word"; tokens].join(" ");
        ScoredChunk {
            chunk: Arc::new(Chunk {
                id: id.into(),
                document_id: "doc".into(),
                source: "/data/doc.txt".into(),
                index: 0,
                span: 0..text.len(),
                fresh_start: 0,
                token_count: tokens,
                text,
            }),
            combined: 1.0,
            semantic,
            lexical: 0.0,
        }
    }

    fn result(hits: Vec<ScoredChunk>) -> RetrievalResult {
        RetrievalResult {
            query: "q".into(),
            hits,
        }
    }

    fn synthesizer(provider: MockProvider) -> Synthesizer<MockProvider> {
        Synthesizer::new(Arc::new(provider), SynthesizerConfig::default())
    }

    #[test]
    fn packing_skips_overflowing_chunk_and_continues() {
        let r = result(vec![hit("a", 6, None), hit("b", 5, None), hit("c", 4, None)]);
        let window = pack_context(&r, 10).unwrap();
        let ids: Vec<&str> = window.included.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(window.skipped[0].chunk.id, "b");
        assert_eq!(window.tokens, 10);
    }

    #[test]
    fn packing_fails_when_top_chunk_overflows() {
        let r = result(vec![hit("big", 30, None), hit("small", 2, None)]);
        let err = pack_context(&r, 20).unwrap_err();
        assert!(matches!(
            err,
            QaError::ContextOverflow { ref top_chunk, needed: 30, budget: 20 } if top_chunk == "big"
        ));
    }

    #[test]
    fn packing_accepts_exact_fit() {
        let r = result(vec![hit("a", 20, None)]);
        assert_eq!(pack_context(&r, 20).unwrap().tokens, 20);
    }

    #[test]
    fn prompt_contains_excerpts_and_instructions() {
        let r = result(vec![hit("doc#0", 3, None)]);
        let window = pack_context(&r, 100).unwrap();
        let prompt = build_prompt("What is it?", &window);
        assert!(prompt.contains("<excerpt id=\"doc#0\" source=\"/data/doc.txt\">"));
        assert!(prompt.contains("word word word"));
        assert!(prompt.contains(NOT_FOUND_MARKER));
        assert!(prompt.contains("square brackets"));
        assert!(prompt.ends_with("Question: What is it?\nAnswer:"));
    }

    #[test]
    fn attributes_are_escaped() {
        assert_eq!(attr(r#"a"b<c&d"#), "a&quot;b&lt;c&amp;d");
    }

    #[test]
    fn citations_in_order_without_duplicates() {
        let allowed = vec!["d#0".to_owned(), "d#1".to_owned(), "d#2".to_owned()];
        let text = "See [d#2] and [d#0, d#2] but not [d#9] or [note].";
        assert_eq!(extract_citations(text, &allowed), vec!["d#2", "d#0"]);
    }

    #[test]
    fn thinking_is_stripped() {
        assert_eq!(strip_thinking("<think>hmm</think> Paris [d#0]"), "Paris [d#0]");
        assert_eq!(strip_thinking("a <think>x</think>b<think>y</think> c"), "a b c");
        assert_eq!(strip_thinking("answer <think>never closed"), "answer");
        assert_eq!(strip_thinking("plain"), "plain");
    }

    #[test]
    fn confidence_buckets() {
        assert_eq!(Confidence::from_similarity(0.9), Confidence::High);
        assert_eq!(Confidence::from_similarity(0.75), Confidence::High);
        assert_eq!(Confidence::from_similarity(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_similarity(0.1), Confidence::Low);
    }

    #[tokio::test]
    async fn answer_cites_model_references() {
        let provider = MockProvider::with_responses(vec!["Paris is the capital [doc#0].".into()]);
        let s = synthesizer(provider.clone());
        let r = result(vec![hit("doc#0", 5, Some(0.8)), hit("doc#1", 5, Some(0.3))]);

        let answer = s
            .synthesize("capital?", &r, 100, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer.text, "Paris is the capital [doc#0].");
        assert_eq!(answer.citations, vec!["doc#0"]);
        assert!(!answer.citations_inferred);
        assert_eq!(answer.confidence, Some(Confidence::High));
        assert_eq!(answer.context_chunks, vec!["doc#0", "doc#1"]);
        assert_eq!(answer.context_tokens, 10);
        assert!(provider.prompts()[0].contains("capital?"));
    }

    #[tokio::test]
    async fn uncited_answer_falls_back_to_context() {
        let provider = MockProvider::with_responses(vec!["Paris.".into()]);
        let s = synthesizer(provider);
        let r = result(vec![hit("doc#0", 5, Some(0.6))]);

        let answer = s
            .synthesize("capital?", &r, 100, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer.citations, vec!["doc#0"]);
        assert!(answer.citations_inferred);
        assert_eq!(answer.confidence, Some(Confidence::Medium));
    }

    #[tokio::test]
    async fn missing_information_lowers_confidence() {
        let provider = MockProvider::with_responses(vec![format!(
            "{NOT_FOUND_MARKER}: the excerpts do not mention the population."
        )]);
        let s = synthesizer(provider);
        let r = result(vec![hit("doc#0", 5, Some(0.95))]);

        let answer = s
            .synthesize("population?", &r, 100, &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.reports_missing());
        assert_eq!(answer.confidence, Some(Confidence::Low));
    }

    #[tokio::test]
    async fn no_semantic_scores_means_no_confidence() {
        let s = synthesizer(MockProvider::default());
        let r = result(vec![hit("doc#0", 5, None)]);
        let answer = s
            .synthesize("q", &r, 100, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer.confidence, None);
    }

    #[tokio::test]
    async fn empty_result_skips_the_model() {
        let provider = MockProvider::default();
        let s = synthesizer(provider.clone());
        let answer = s
            .synthesize("anything?", &result(vec![]), 100, &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.reports_missing());
        assert!(answer.citations.is_empty());
        assert_eq!(provider.generate_calls(), 0);
    }

    #[tokio::test]
    async fn overflow_does_not_call_the_model() {
        let provider = MockProvider::default();
        let s = synthesizer(provider.clone());
        let r = result(vec![hit("doc#0", 50, Some(0.9))]);
        let err = s
            .synthesize("q", &r, 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::ContextOverflow { .. }));
        assert_eq!(provider.generate_calls(), 0);
    }

    #[tokio::test]
    async fn model_failure_is_synthesis_unavailable() {
        let s = synthesizer(MockProvider::failing());
        let r = result(vec![hit("doc#0", 5, Some(0.9))]);
        let err = s
            .synthesize("q", &r, 100, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::SynthesisUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let s = Synthesizer::new(
            Arc::new(MockProvider::default().with_delay(10_000)),
            SynthesizerConfig {
                llm_timeout: Duration::from_secs(1),
                ..SynthesizerConfig::default()
            },
        );
        let r = result(vec![hit("doc#0", 5, Some(0.9))]);
        let err = s
            .synthesize("q", &r, 100, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::SynthesisUnavailable(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn cancellation_is_reported() {
        let s = synthesizer(MockProvider::default());
        let r = result(vec![hit("doc#0", 5, Some(0.9))]);
        let token = CancellationToken::new();
        token.cancel();
        let err = s.synthesize("q", &r, 100, &token).await.unwrap_err();
        assert!(matches!(err, QaError::Cancelled));
    }
}
