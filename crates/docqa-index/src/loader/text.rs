use std::path::Path;

use super::{DEFAULT_MAX_FILE_SIZE, DocumentLoader, LoadFuture};
use crate::document::{Document, DocumentFormat};
use crate::error::IndexError;

pub struct TextLoader {
    pub max_file_size: u64,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl DocumentLoader for TextLoader {
    fn load<'a>(&'a self, path: &'a Path) -> LoadFuture<'a> {
        let max_size = self.max_file_size;
        Box::pin(async move {
            let path = tokio::fs::canonicalize(path).await?;

            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(IndexError::FileTooLarge(meta.len()));
            }

            let format = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(DocumentFormat::from_extension)
                .unwrap_or(DocumentFormat::PlainText);

            let bytes = tokio::fs::read(&path).await?;
            let text = String::from_utf8(bytes).map_err(|e| IndexError::Extraction {
                path: path.clone(),
                reason: format!("not valid UTF-8: {e}"),
            })?;

            tracing::debug!(source = %path.display(), bytes = text.len(), "loaded text document");
            Ok(Document::from_source(&path, text, format))
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["txt", "text", "md", "markdown"]
    }
}
