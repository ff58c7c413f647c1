//! Retrieval-augmented question answering over local documents.
//!
//! Documents are extracted, normalized and chunked, chunks are embedded into a
//! content-addressed cache and ranked by a hybrid of cosine similarity and
//! keyword overlap, and the best chunks that fit the context budget are handed
//! to a language model that answers with citations.

pub use docqa_core::{
    Answer, Confidence, Config, EmbeddingStage, QaError, QaPipeline, Synthesizer,
    SynthesizerConfig, config, synthesizer,
};
pub use docqa_index::{
    Chunk, Chunker, ChunkerConfig, Document, DocumentFormat, DocumentLoader, EmbeddingIndex,
    HybridRetriever, HybridWeights, IndexConfig, IndexError, IngestReport, LoaderRegistry,
    RetrievalResult, ScoredChunk, UpsertStatus, estimate_tokens,
};
pub use docqa_llm::{
    EmbeddingProvider, GenerationOptions, LlmError, LlmProvider, guarded, ollama::OllamaProvider,
};
