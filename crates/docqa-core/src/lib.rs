//! Configuration, answer synthesis and the end-to-end question-answering pipeline.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod synthesizer;

pub use config::Config;
pub use error::{EmbeddingStage, QaError, Result};
pub use pipeline::QaPipeline;
pub use synthesizer::{Answer, Confidence, Synthesizer, SynthesizerConfig};
