//! Clip Store
//!
//! Loads clips through a [`ClipSource`] and memoizes them forever (or until
//! [`ClipStore::clear`] on disposal).
//!
//! # Load Deduplication
//!
//! This is the only structure in the crate touched by concurrent callers.
//! Each clip id maps to a shared `OnceCell`; every caller awaiting the same
//! id awaits the same cell, so only one fetch is in flight per id. A failed
//! fetch leaves the cell empty and the next caller retries; there is no
//! timeout, retry policy belongs to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::{Clip, ClipId};

/// Errors produced while loading a clip
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LoadError {
    /// No resource exists for this id
    #[error("clip '{0}' not found")]
    NotFound(ClipId),

    /// The resource exists but its data is unusable
    #[error("clip '{id}' has invalid data: {reason}")]
    InvalidData {
        /// The clip that failed
        id: ClipId,
        /// What was wrong with it
        reason: String,
    },
}

/// Source of raw clip data (file loader, asset server, test fixture)
#[async_trait]
pub trait ClipSource: Send + Sync {
    /// Fetch and decode one clip
    async fn fetch(&self, id: &ClipId) -> Result<Clip, LoadError>;
}

/// Memoizing, deduplicating clip loader
pub struct ClipStore {
    source: Arc<dyn ClipSource>,
    cells: DashMap<ClipId, Arc<OnceCell<Arc<Clip>>>>,
    fetches: AtomicU64,
}

impl ClipStore {
    /// Create a store over a clip source
    pub fn new(source: Arc<dyn ClipSource>) -> Self {
        Self {
            source,
            cells: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Load a clip, sharing any in-flight fetch for the same id
    ///
    /// # Errors
    ///
    /// Returns the source's `LoadError`. Failures are not cached.
    pub async fn load(&self, id: &ClipId) -> Result<Arc<Clip>, LoadError> {
        // Clone the cell out so no map guard is held across the await
        let cell = self.cells.entry(id.clone()).or_default().clone();

        let clip = cell
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(clip = %id, "Fetching clip");
                let clip = self.source.fetch(id).await?;
                if !clip.is_playable() {
                    return Err(LoadError::InvalidData {
                        id: id.clone(),
                        reason: format!("non-positive length {}", clip.total_length),
                    });
                }
                Ok(Arc::new(clip))
            })
            .await
            .inspect_err(|e| tracing::warn!(clip = %id, error = %e, "Clip load failed"))?;

        Ok(Arc::clone(clip))
    }

    /// Load several clips, failing on the first error
    ///
    /// # Errors
    ///
    /// Returns the first `LoadError` encountered.
    pub async fn load_all(&self, ids: &[ClipId]) -> Result<Vec<Arc<Clip>>, LoadError> {
        futures::future::try_join_all(ids.iter().map(|id| self.load(id))).await
    }

    /// Get a clip only if it is already loaded
    #[must_use]
    pub fn cached(&self, id: &ClipId) -> Option<Arc<Clip>> {
        self.cells.get(id).and_then(|cell| cell.get().cloned())
    }

    /// Number of fetches issued against the source
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Drop every cached clip
    pub fn clear(&self) {
        self.cells.clear();
    }
}

impl std::fmt::Debug for ClipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipStore")
            .field("entries", &self.cells.len())
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

/// In-memory clip source
#[derive(Debug, Default)]
pub struct MemoryClipSource {
    clips: RwLock<HashMap<ClipId, Clip>>,
}

impl MemoryClipSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding the given clips
    pub fn with_clips(clips: impl IntoIterator<Item = Clip>) -> Self {
        let source = Self::new();
        for clip in clips {
            source.insert(clip);
        }
        source
    }

    /// Add or replace a clip
    pub fn insert(&self, clip: Clip) {
        self.clips.write().insert(clip.id.clone(), clip);
    }

    /// Number of clips held
    #[must_use]
    pub fn len(&self) -> usize {
        self.clips.read().len()
    }

    /// Whether the source is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clips.read().is_empty()
    }
}

#[async_trait]
impl ClipSource for MemoryClipSource {
    async fn fetch(&self, id: &ClipId) -> Result<Clip, LoadError> {
        self.clips
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(id.clone()))
    }
}
