//! Keyed storage for computed distance matrices.
//!
//! Entries are never invalidated: a key names one ensemble of one dataset,
//! and callers who change the ensemble must change the key. The engine does
//! a plain check-then-act around the cache, so two processes computing the
//! same key at once will both compute and the last `put` wins. Run at most
//! one writer per key.

use std::collections::HashMap;
use std::fmt;

use crate::matrix::DistanceMatrix;

/// Error type returned by cache backends.
pub type CacheError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Identity of a cached matrix: dataset name and ensemble size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CacheKey {
    dataset: String,
    n_trees: usize,
}

impl CacheKey {
    #[must_use]
    pub fn new(dataset: impl Into<String>, n_trees: usize) -> Self {
        Self {
            dataset: dataset.into(),
            n_trees,
        }
    }

    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// File stem for durable backends, e.g. `distance_matrix_iris_100`.
    /// Backends that map it onto a path must validate the dataset name.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("distance_matrix_{}_{}", self.dataset, self.n_trees)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.n_trees)
    }
}

/// A `get`/`put` store for distance matrices.
pub trait MatrixCache {
    /// Return the stored matrix for `key`, if any.
    ///
    /// # Errors
    ///
    /// Backend-specific read or decode failure.
    fn get(&self, key: &CacheKey) -> Result<Option<DistanceMatrix>, CacheError>;

    /// Store `matrix` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Backend-specific write or encode failure.
    fn put(&mut self, key: &CacheKey, matrix: &DistanceMatrix) -> Result<(), CacheError>;
}

/// Stores nothing; every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl MatrixCache for NoCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<DistanceMatrix>, CacheError> {
        Ok(None)
    }

    fn put(&mut self, _key: &CacheKey, _matrix: &DistanceMatrix) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Process-local cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<CacheKey, DistanceMatrix>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MatrixCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<DistanceMatrix>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &CacheKey, matrix: &DistanceMatrix) -> Result<(), CacheError> {
        self.entries.insert(key.clone(), matrix.clone());
        Ok(())
    }
}
