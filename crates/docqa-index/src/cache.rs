//! Content-addressed embedding cache with per-entry locking and JSON persistence.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

const CACHE_FORMAT_VERSION: u32 = 1;

type Slot = Arc<tokio::sync::RwLock<Option<Arc<[f32]>>>>;

/// Cache key for `text` embedded by `model_id`: hex blake3 of `model_id \0 text`.
#[must_use]
pub fn cache_key(model_id: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Whether a lookup was served from the cache or computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// Vectors keyed by content hash.
///
/// Each key owns its own async lock: concurrent requests for the same key wait
/// for one computation, requests for different keys proceed in parallel.
#[derive(Debug)]
pub struct EmbeddingCache {
    model_id: String,
    slots: RwLock<HashMap<String, Slot>>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheRecord>,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    key: String,
    model: String,
    vector: Vec<f32>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[must_use]
    pub fn key_for(&self, text: &str) -> String {
        cache_key(&self.model_id, text)
    }

    fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_owned()).or_default())
    }

    /// Cached vector for `key`, if one has been stored.
    pub async fn get(&self, key: &str) -> Option<Arc<[f32]>> {
        let slot = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.get(key)?)
        };
        slot.read().await.clone()
    }

    /// Return the vector for `key`, computing it with `compute` on a miss.
    ///
    /// The entry's write lock is held while `compute` runs. A failed computation
    /// leaves the entry empty so a later call can retry.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `compute`.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
    ) -> std::result::Result<(Arc<[f32]>, CacheOutcome), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<f32>, E>>,
    {
        let slot = self.slot(key);
        if let Some(v) = slot.read().await.as_ref() {
            return Ok((Arc::clone(v), CacheOutcome::Hit));
        }

        let mut guard = slot.write().await;
        if let Some(v) = guard.as_ref() {
            return Ok((Arc::clone(v), CacheOutcome::Hit));
        }
        let vector: Arc<[f32]> = compute().await?.into();
        *guard = Some(Arc::clone(&vector));
        Ok((vector, CacheOutcome::Miss))
    }

    /// Number of filled entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .filter(|s| s.try_read().is_ok_and(|g| g.is_some()))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn snapshot(&self) -> Vec<CacheRecord> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();

        let mut records = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if let Some(v) = slot.read().await.as_ref() {
                records.push(CacheRecord {
                    key,
                    model: self.model_id.clone(),
                    vector: v.to_vec(),
                });
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Write all filled entries to `path` atomically (temp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns `CachePersistence` on IO failure or `Json` on encoding failure.
    pub async fn save(&self, path: &Path) -> Result<usize> {
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self.snapshot().await,
        };
        let count = file.entries.len();
        let bytes = serde_json::to_vec(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence(path, &e))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| persistence(&tmp, &e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| persistence(path, &e))?;

        tracing::debug!(path = %path.display(), entries = count, "embedding cache saved");
        Ok(count)
    }

    /// Merge entries from `path` into the cache.
    ///
    /// Entries for another model, or whose length differs from `dimension` when
    /// given, are skipped. Existing entries are kept. Returns the number loaded.
    ///
    /// # Errors
    ///
    /// Returns `CachePersistence` if the file cannot be read or has an unknown
    /// version, `Json` if it is malformed.
    pub async fn load(&self, path: &Path, dimension: Option<usize>) -> Result<usize> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| persistence(path, &e))?;
        let file: CacheFile = serde_json::from_slice(&bytes)?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(IndexError::CachePersistence(format!(
                "{}: unsupported cache version {}",
                path.display(),
                file.version
            )));
        }

        let mut dimension = dimension;
        let mut loaded = 0;
        let mut skipped = 0;
        for record in file.entries {
            if record.model != self.model_id
                || record.vector.is_empty()
                || dimension.is_some_and(|d| d != record.vector.len())
            {
                skipped += 1;
                continue;
            }
            dimension.get_or_insert(record.vector.len());

            let slot = self.slot(&record.key);
            let mut guard = slot.write().await;
            if guard.is_none() {
                *guard = Some(record.vector.into());
                loaded += 1;
            }
        }

        tracing::debug!(path = %path.display(), loaded, skipped, "embedding cache loaded");
        Ok(loaded)
    }
}

fn persistence(path: &Path, err: &std::io::Error) -> IndexError {
    IndexError::CachePersistence(format!("{}: {err}", path.display()))
}
