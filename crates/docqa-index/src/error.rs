//! Error types for docqa-index.

use std::path::PathBuf;

/// Errors raised while loading, chunking, embedding or ranking documents.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Bad caller input; retrying will not help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The format-extraction step could not produce text.
    #[error("extraction failed for {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedding collaborator failed for one chunk (or for the query).
    #[error("embedding unavailable for {chunk_id}: {reason}")]
    EmbeddingUnavailable { chunk_id: String, reason: String },

    /// A vector came back with a different length than the rest of the index.
    #[error("embedding for {chunk_id} has dimension {actual}, index uses {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("cache persistence failed: {0}")]
    CachePersistence(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IndexError {
    /// Map a collaborator failure into the index taxonomy for `subject`
    /// (a chunk identifier, or `"query"`).
    #[must_use]
    pub fn from_llm(subject: &str, err: docqa_llm::LlmError) -> Self {
        match err {
            docqa_llm::LlmError::Cancelled => Self::Cancelled,
            other => Self::EmbeddingUnavailable {
                chunk_id: subject.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_keeps_its_identity() {
        let err = IndexError::from_llm("doc#0", docqa_llm::LlmError::Cancelled);
        assert!(matches!(err, IndexError::Cancelled));
    }

    #[test]
    fn collaborator_failure_names_the_chunk() {
        let err = IndexError::from_llm(
            "doc#3",
            docqa_llm::LlmError::Unavailable("connection refused".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("doc#3"));
        assert!(msg.contains("connection refused"));
    }
}
