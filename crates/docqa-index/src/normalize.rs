//! Whitespace normalization applied before chunking.

use std::ops::Range;

/// Collapse whitespace runs and drop control characters.
///
/// A run containing two or more line breaks becomes a paragraph break (`"\n\n"`),
/// any other run becomes a single space. Leading and trailing whitespace is removed.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut newlines = 0usize;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
            if c == '\n' {
                newlines += 1;
            }
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push_str(if newlines >= 2 { "\n\n" } else { " " });
        }
        pending_space = false;
        newlines = 0;
        out.push(c);
    }

    out
}

/// Byte ranges of whitespace-delimited tokens.
#[must_use]
pub fn token_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push(s..i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(s..text.len());
    }
    spans
}

/// Token-count estimate shared by chunking and context budgeting.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
