//! Paragraph-first chunking with sentence fallback and token overlap.

use std::ops::Range;

use crate::document::Document;
use crate::error::{IndexError, Result};
use crate::normalize::{normalize, token_spans};

/// Chunk size limits, counted in whitespace-delimited tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            overlap_tokens: 100,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns `InvalidInput` when the overlap would leave no room for new text.
    pub fn validate(&self) -> Result<()> {
        if self.overlap_tokens >= self.max_tokens {
            return Err(IndexError::InvalidInput(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// A contiguous passage of one document's normalized text.
///
/// `span` and `fresh_start` are byte offsets into the normalized text. Bytes in
/// `span.start..fresh_start` repeat the tail of the previous chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source: String,
    pub index: usize,
    pub span: Range<usize>,
    pub fresh_start: usize,
    pub text: String,
    pub token_count: usize,
}

impl Chunk {
    /// Leading text shared with the previous chunk.
    #[must_use]
    pub fn overlap_text(&self) -> &str {
        &self.text[..self.fresh_start - self.span.start]
    }

    /// Text not present in any earlier chunk.
    #[must_use]
    pub fn fresh_text(&self) -> &str {
        &self.text[self.fresh_start - self.span.start..]
    }
}

#[must_use]
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}#{index}")
}

/// Rebuild the normalized text from an ordered chunk sequence.
#[must_use]
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// # Errors
    ///
    /// Returns `InvalidInput` if the configuration is degenerate.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Split a document into ordered, overlapping chunks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the document has no text after normalization.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        chunk_text(
            document.id(),
            &document.source().display().to_string(),
            document.text(),
            self.config,
        )
    }
}

/// Chunk raw `text` belonging to `document_id`.
///
/// # Errors
///
/// Returns `InvalidInput` when `overlap_tokens >= max_tokens` or the text is empty
/// after normalization.
pub fn chunk_text(
    document_id: &str,
    source: &str,
    text: &str,
    config: ChunkerConfig,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    let normalized = normalize(text);
    if normalized.is_empty() {
        return Err(IndexError::InvalidInput(format!(
            "document {document_id} has no text"
        )));
    }

    let tokens = token_spans(&normalized);
    let units = split_units(&normalized, &tokens, config.max_tokens);
    let windows = pack(&units, config.max_tokens, config.overlap_tokens);

    let byte_at = |token: usize| {
        if token == tokens.len() {
            normalized.len()
        } else {
            tokens[token].start
        }
    };

    let chunks: Vec<Chunk> = windows
        .into_iter()
        .enumerate()
        .map(|(index, w)| {
            let span = byte_at(w.start)..byte_at(w.end);
            Chunk {
                id: chunk_id(document_id, index),
                document_id: document_id.to_owned(),
                source: source.to_owned(),
                index,
                fresh_start: byte_at(w.fresh),
                text: normalized[span.clone()].to_owned(),
                span,
                token_count: w.end - w.start,
            }
        })
        .collect();

    tracing::debug!(
        document_id,
        chunks = chunks.len(),
        tokens = tokens.len(),
        "document chunked"
    );
    Ok(chunks)
}

/// Token window `[start, end)` whose new content begins at `fresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: usize,
    fresh: usize,
    end: usize,
}

/// Paragraphs as token ranges; paragraphs over `max_tokens` are broken into sentences.
fn split_units(text: &str, tokens: &[Range<usize>], max_tokens: usize) -> Vec<Range<usize>> {
    let mut paragraphs = Vec::new();
    let mut start = 0;
    for i in 1..tokens.len() {
        if text[tokens[i - 1].end..tokens[i].start].contains('\n') {
            paragraphs.push(start..i);
            start = i;
        }
    }
    if start < tokens.len() {
        paragraphs.push(start..tokens.len());
    }

    let mut units = Vec::with_capacity(paragraphs.len());
    for para in paragraphs {
        if para.len() <= max_tokens {
            units.push(para);
            continue;
        }
        let mut sentence_start = para.start;
        for t in para.clone() {
            if ends_sentence(&text[tokens[t].clone()]) {
                units.push(sentence_start..t + 1);
                sentence_start = t + 1;
            }
        }
        if sentence_start < para.end {
            units.push(sentence_start..para.end);
        }
    }
    units
}

fn ends_sentence(token: &str) -> bool {
    let trimmed = token.trim_end_matches(['"', '\'', ')', ']', '\u{201d}', '\u{2019}']);
    trimmed.ends_with(['.', '?', '!'])
}

/// Greedily pack contiguous units into windows of at most `max_tokens` fresh tokens.
///
/// Each window after the first repeats the last `overlap_tokens` tokens of the
/// previous one (fewer only when the previous window is shorter), so a window may
/// reach `max_tokens + overlap_tokens`. A unit larger than `max_tokens` becomes its
/// own window without overlap.
fn pack(units: &[Range<usize>], max_tokens: usize, overlap_tokens: usize) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut current: Option<Window> = None;

    for unit in units {
        let n = unit.len();
        current = Some(match current {
            None => Window {
                start: unit.start,
                fresh: unit.start,
                end: unit.end,
            },
            Some(w) if w.end - w.start + n <= max_tokens => Window { end: unit.end, ..w },
            Some(w) => {
                windows.push(w);
                // Leave at least one token behind so span starts keep increasing.
                let carried = if n > max_tokens {
                    0
                } else {
                    overlap_tokens.min(w.end - w.start - 1)
                };
                Window {
                    start: unit.start - carried,
                    fresh: unit.start,
                    end: unit.end,
                }
            }
        });
    }

    if let Some(w) = current {
        windows.push(w);
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentFormat;
    use crate::normalize::estimate_tokens;

    fn cfg(max_tokens: usize, overlap_tokens: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens,
            overlap_tokens,
        }
    }

    fn chunks_of(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
        chunk_text("doc", "doc.txt", text, cfg(max_tokens, overlap_tokens)).unwrap()
    }

    #[test]
    fn small_text_is_one_chunk() {
        let text = "Paris is the capital of France. It has a population of over 2 million.";
        let chunks = chunks_of(text, 50, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].id, "doc#0");
        assert_eq!(chunks[0].token_count, 14);
        assert_eq!(chunks[0].span, 0..text.len());
    }

    #[test]
    fn overlap_not_smaller_than_max_is_rejected() {
        let err = chunk_text("doc", "s", "some text", cfg(10, 10)).unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
        let err = chunk_text("doc", "s", "some text", cfg(10, 50)).unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
        assert!(Chunker::new(cfg(0, 0)).is_err());
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(
            chunk_text("doc", "s", "", cfg(10, 2)),
            Err(IndexError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_text("doc", "s", " \n\t\u{0} ", cfg(10, 2)),
            Err(IndexError::InvalidInput(_))
        ));
    }

    #[test]
    fn paragraphs_pack_until_full() {
        let text = "one two three.\n\nfour five six.\n\nseven eight nine.";
        let chunks = chunks_of(text, 6, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "one two three.\n\nfour five six.\n\n");
        assert_eq!(chunks[1].text, "seven eight nine.");
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunks = chunks_of(text, 4, 0);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.trim_end()).collect();
        assert_eq!(
            texts,
            vec!["Alpha beta gamma.", "Delta epsilon zeta.", "Eta theta iota."]
        );
    }

    #[test]
    fn overlap_repeats_previous_tail() {
        let text = "a1 a2 a3 a4.\n\nb1 b2 b3 b4.";
        let chunks = chunks_of(text, 6, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_text().trim_end(), "a3 a4.");
        assert_eq!(chunks[1].fresh_text(), "b1 b2 b3 b4.");
        assert_eq!(chunks[1].token_count, 6);
    }

    #[test]
    fn overlap_is_not_shrunk_by_a_large_next_unit() {
        let text = "a1 a2 a3.\n\nb1 b2 b3 b4 b5.";
        let chunks = chunks_of(text, 6, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(estimate_tokens(chunks[1].overlap_text()), 2);
        assert_eq!(chunks[1].overlap_text().trim_end(), "a2 a3.");
        assert_eq!(chunks[1].fresh_text(), "b1 b2 b3 b4 b5.");
        assert_eq!(chunks[1].token_count, 7);
    }

    #[test]
    fn overlap_is_bounded_by_previous_chunk() {
        let text = "x1 x2.\n\ny1 y2 y3 y4 y5.";
        let chunks = chunks_of(text, 5, 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_text().trim_end(), "x2.");
        assert_eq!(chunks[1].token_count, 6);
    }

    #[test]
    fn oversized_sentence_is_kept_whole() {
        let long = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let text = format!("Short one. {long}. Tail end.");
        let chunks = chunks_of(&text, 10, 3);
        let big = chunks
            .iter()
            .find(|c| c.token_count > 10)
            .expect("oversized chunk present");
        assert_eq!(big.token_count, 30);
        assert_eq!(big.overlap_text(), "");
        assert_eq!(reassemble(&chunks), normalize(&text));
    }

    #[test]
    fn chunker_uses_document_identity() {
        let doc = Document::new("manual", "/tmp/manual.md", "Hello there.", DocumentFormat::Markdown);
        let chunks = Chunker::new(ChunkerConfig::default())
            .unwrap()
            .chunk(&doc)
            .unwrap();
        assert_eq!(chunks[0].document_id, "manual");
        assert_eq!(chunks[0].source, "/tmp/manual.md");
        assert_eq!(chunks[0].id, "manual#0");
    }

    #[test]
    fn sentence_end_detection() {
        assert!(ends_sentence("done."));
        assert!(ends_sentence("really?\""));
        assert!(ends_sentence("(yes!)"));
        assert!(!ends_sentence("e.g"));
        assert!(!ends_sentence("word"));
    }

    mod proptest_chunker {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn fresh_text_reconstructs_normalized_input(
                content in "[a-zA-Z.!? \n\t]{1,1500}",
                max_tokens in 1usize..60,
                overlap in 0usize..60,
            ) {
                prop_assume!(overlap < max_tokens);
                prop_assume!(!normalize(&content).is_empty());
                let chunks = chunk_text("d", "s", &content, cfg(max_tokens, overlap)).unwrap();
                prop_assert_eq!(reassemble(&chunks), normalize(&content));
            }

            #[test]
            fn spans_are_monotonic_and_contiguous(
                content in "[a-z.? \n]{1,1500}",
                max_tokens in 2usize..40,
                overlap in 0usize..20,
            ) {
                prop_assume!(overlap < max_tokens);
                prop_assume!(!normalize(&content).is_empty());
                let chunks = chunk_text("d", "s", &content, cfg(max_tokens, overlap)).unwrap();
                prop_assert_eq!(chunks[0].span.start, 0);
                for pair in chunks.windows(2) {
                    prop_assert!(pair[1].span.start > pair[0].span.start);
                    prop_assert_eq!(pair[1].fresh_start, pair[0].span.end);
                    prop_assert!(estimate_tokens(pair[1].overlap_text()) <= overlap);
                }
                for (i, chunk) in chunks.iter().enumerate() {
                    prop_assert_eq!(chunk.index, i);
                    prop_assert!(!chunk.fresh_text().is_empty());
                    prop_assert!(
                        estimate_tokens(chunk.fresh_text()) <= max_tokens
                            || chunk.overlap_text().is_empty()
                    );
                    prop_assert!(chunk.token_count <= max_tokens + overlap || chunk.overlap_text().is_empty());
                }
            }
        }
    }
}
