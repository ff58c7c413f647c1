//! Query- and ingestion-level error taxonomy.

use std::path::PathBuf;

use docqa_index::IndexError;

/// Pipeline stage an embedding failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingStage {
    Ingest,
    Query,
}

impl std::fmt::Display for EmbeddingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ingest => "ingest",
            Self::Query => "query",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("extraction failed for {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("embedding unavailable during {stage}: {reason}")]
    EmbeddingUnavailable { stage: EmbeddingStage, reason: String },

    #[error("language model unavailable: {0}")]
    SynthesisUnavailable(String),

    /// Even the best-ranked chunk does not fit the context budget.
    #[error("chunk {top_chunk} needs {needed} tokens, context budget is {budget}")]
    ContextOverflow {
        top_chunk: String,
        needed: usize,
        budget: usize,
    },

    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    Index(IndexError),
}

impl QaError {
    /// Collaborator failures may succeed on retry; structural and caller errors will not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Extraction { .. } | Self::EmbeddingUnavailable { .. } | Self::SynthesisUnavailable(_)
        )
    }
}

impl From<IndexError> for QaError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidInput(msg) => Self::InvalidInput(msg),
            IndexError::Extraction { path, reason } => Self::Extraction { path, reason },
            IndexError::UnsupportedFormat(ext) => Self::Extraction {
                path: PathBuf::new(),
                reason: format!("unsupported format: {ext}"),
            },
            IndexError::EmbeddingUnavailable { chunk_id, reason } => Self::EmbeddingUnavailable {
                stage: if chunk_id == "query" {
                    EmbeddingStage::Query
                } else {
                    EmbeddingStage::Ingest
                },
                reason: format!("{chunk_id}: {reason}"),
            },
            IndexError::Cancelled => Self::Cancelled,
            other => Self::Index(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, QaError>;
