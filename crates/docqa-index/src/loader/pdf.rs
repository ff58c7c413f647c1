use std::path::Path;

use super::{DEFAULT_MAX_FILE_SIZE, DocumentLoader, LoadFuture};
use crate::document::{Document, DocumentFormat};
use crate::error::IndexError;

pub struct PdfLoader {
    pub max_file_size: u64,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl DocumentLoader for PdfLoader {
    fn load<'a>(&'a self, path: &'a Path) -> LoadFuture<'a> {
        let max_size = self.max_file_size;
        Box::pin(async move {
            let path = tokio::fs::canonicalize(path).await?;

            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(IndexError::FileTooLarge(meta.len()));
            }

            let path_buf = path.clone();
            let text = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text(&path_buf).map_err(|e| IndexError::Extraction {
                    path: path_buf.clone(),
                    reason: e.to_string(),
                })
            })
            .await
            .map_err(|e| IndexError::Extraction {
                path: path.clone(),
                reason: format!("extraction task failed: {e}"),
            })??;

            if text.trim().is_empty() {
                // Scanned PDFs carry no text layer.
                return Err(IndexError::Extraction {
                    path,
                    reason: "no extractable text".into(),
                });
            }

            Ok(Document::from_source(&path, text, DocumentFormat::Pdf))
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf"]
    }
}
