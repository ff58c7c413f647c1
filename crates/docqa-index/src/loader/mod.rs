//! Format-extraction collaborators: turn a file into a [`Document`].

mod text;
#[cfg(feature = "pdf")]
mod pdf;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

pub use text::TextLoader;
#[cfg(feature = "pdf")]
pub use pdf::PdfLoader;

use crate::document::Document;
use crate::error::{IndexError, Result};

/// Default maximum file size: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<Document>> + Send + 'a>>;

pub trait DocumentLoader: Send + Sync {
    fn load<'a>(&'a self, path: &'a Path) -> LoadFuture<'a>;

    fn supported_extensions(&self) -> &[&str];
}

/// Dispatches to the loader registered for a file's extension.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn DocumentLoader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

impl LoaderRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Text and markdown loaders, plus PDF when the `pdf` feature is on.
    #[must_use]
    pub fn with_defaults(max_file_size: u64) -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(TextLoader { max_file_size }));
        #[cfg(feature = "pdf")]
        registry.register(Box::new(PdfLoader { max_file_size }));
        registry
    }

    /// Later registrations take precedence for shared extensions.
    pub fn register(&mut self, loader: Box<dyn DocumentLoader>) {
        self.loaders.insert(0, loader);
    }

    #[must_use]
    pub fn supports(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    /// Load `path` with the matching loader.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` when no loader claims the extension, or the
    /// loader's own error.
    pub async fn load(&self, path: &Path) -> Result<Document> {
        let loader = self.find(path).ok_or_else(|| {
            IndexError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .map_or_else(|| path.display().to_string(), |e| format!(".{e}")),
            )
        })?;
        loader.load(path).await
    }

    fn find(&self, path: &Path) -> Option<&dyn DocumentLoader> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.loaders
            .iter()
            .find(|l| l.supported_extensions().contains(&ext.as_str()))
            .map(AsRef::as_ref)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_MAX_FILE_SIZE)
    }
}
