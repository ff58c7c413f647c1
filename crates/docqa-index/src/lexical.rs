//! Keyword-overlap scoring for the lexical half of hybrid retrieval.

use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "what", "which", "who",
    "with",
];

/// Lowercased alphanumeric terms with stopwords removed.
#[must_use]
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Term counts of one text, scored against any number of query term sets.
#[derive(Debug, Clone, Default)]
pub struct TermStats {
    counts: HashMap<String, usize>,
    total: usize,
}

impl TermStats {
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut counts = HashMap::new();
        let mut total = 0;
        for term in terms(text) {
            *counts.entry(term).or_insert(0) += 1;
            total += 1;
        }
        Self { counts, total }
    }

    /// Sum of relative frequencies of the distinct query terms.
    ///
    /// Zero when either side has no terms.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, query_terms: &HashSet<String>) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        let hits: usize = query_terms
            .iter()
            .filter_map(|t| self.counts.get(t))
            .sum();
        hits as f32 / self.total as f32
    }
}

/// Distinct query terms.
#[must_use]
pub fn query_terms(query: &str) -> HashSet<String> {
    terms(query).into_iter().collect()
}

/// Convenience for one-off scoring.
#[must_use]
pub fn lexical_score(query: &str, text: &str) -> f32 {
    TermStats::new(text).score(&query_terms(query))
}
