use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Format tag attached by the extraction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Pdf,
}

impl DocumentFormat {
    /// Guess the format from a file extension (case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}

/// Raw extracted text of one source file. Immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    source: PathBuf,
    text: String,
    format: DocumentFormat,
}

impl Document {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<PathBuf>,
        text: impl Into<String>,
        format: DocumentFormat,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            text: text.into(),
            format,
        }
    }

    /// Build a document whose id is derived from `source`.
    #[must_use]
    pub fn from_source(source: &Path, text: impl Into<String>, format: DocumentFormat) -> Self {
        Self::new(document_id_for(source), source, text, format)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn format(&self) -> DocumentFormat {
        self.format
    }
}

/// `<file-stem>-<first 8 hex chars of blake3(path)>`; stable for a given path.
#[must_use]
pub fn document_id_for(source: &Path) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("doc");
    let digest = blake3::hash(source.to_string_lossy().as_bytes()).to_hex();
    format!("{stem}-{}", &digest[..8])
}
