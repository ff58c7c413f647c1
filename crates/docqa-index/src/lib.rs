//! Document loading, chunking, cached embedding index and hybrid retrieval.

pub mod cache;
pub mod chunker;
pub mod document;
pub mod error;
pub mod index;
pub mod lexical;
pub mod loader;
pub mod normalize;
pub mod retriever;

pub use chunker::{Chunk, Chunker, ChunkerConfig};
pub use document::{Document, DocumentFormat};
pub use error::{IndexError, Result};
pub use index::{EmbeddingIndex, IndexConfig, IngestReport, UpsertStatus};
pub use loader::{DocumentLoader, LoaderRegistry};
pub use normalize::estimate_tokens;
pub use retriever::{HybridRetriever, HybridWeights, RetrievalResult, ScoredChunk};
