//! On-disk distance matrix cache.

use std::fs;
use std::path::{Path, PathBuf};

use rafo_ged::{CacheError, CacheKey, DistanceMatrix, LABEL_GRAMMAR_VERSION, MatrixCache};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::IoError;
use crate::domain::is_plain_name;

const FORMAT_VERSION: u32 = 1;

/// What a cache file holds. The label grammar version is recorded because
/// distances depend on how node labels decode.
#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u32,
    grammar: u32,
    matrix: DistanceMatrix,
}

/// Stores one bincode file per key, `{dir}/distance_matrix_{dataset}_{n_trees}.bin`.
///
/// Files are never invalidated. Vary the dataset name to force a recompute.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// The directory is created on the first write.
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds `key`, inside [`DiskCache::dir`].
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidCacheKey`] when the dataset name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`, such as a path separator.
    pub fn path(&self, key: &CacheKey) -> Result<PathBuf, IoError> {
        if !is_plain_name(key.dataset()) {
            return Err(IoError::InvalidCacheKey {
                dataset: key.dataset().to_string(),
            });
        }
        Ok(self.dir.join(format!("{}.bin", key.file_stem())))
    }

    /// Read the matrix stored under `key`, if a file exists.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::InvalidCacheKey`] | the dataset name cannot form a file name |
    /// | [`IoError::CacheRead`] | the file exists but cannot be read |
    /// | [`IoError::CacheDecode`] | the file is not a cache envelope |
    /// | [`IoError::CacheVersion`] | the file was written by another format or label grammar |
    pub fn load(&self, key: &CacheKey) -> Result<Option<DistanceMatrix>, IoError> {
        let path = self.path(key)?;
        if !path.exists() {
            debug!(path = %path.display(), "no cached matrix");
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| IoError::CacheRead {
            path: path.clone(),
            source: e,
        })?;
        let envelope: Envelope =
            bincode::deserialize(&bytes).map_err(|e| IoError::CacheDecode {
                path: path.clone(),
                source: e,
            })?;
        if envelope.format != FORMAT_VERSION || envelope.grammar != LABEL_GRAMMAR_VERSION {
            return Err(IoError::CacheVersion {
                path,
                found: format!("{}.{}", envelope.format, envelope.grammar),
                expected: format!("{FORMAT_VERSION}.{LABEL_GRAMMAR_VERSION}"),
            });
        }
        info!(path = %path.display(), n_trees = envelope.matrix.len(), "cached matrix loaded");
        Ok(Some(envelope.matrix))
    }

    /// Write `matrix` under `key`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::InvalidCacheKey`] | the dataset name cannot form a file name |
    /// | [`IoError::OutputDirCreate`] | the cache directory cannot be created |
    /// | [`IoError::CacheEncode`] | the matrix cannot be encoded |
    /// | [`IoError::WriteFile`] | the file cannot be written |
    pub fn store(&self, key: &CacheKey, matrix: &DistanceMatrix) -> Result<PathBuf, IoError> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| IoError::OutputDirCreate {
            path: self.dir.clone(),
            source: e,
        })?;
        let envelope = Envelope {
            format: FORMAT_VERSION,
            grammar: LABEL_GRAMMAR_VERSION,
            matrix: matrix.clone(),
        };
        let bytes = bincode::serialize(&envelope).map_err(|e| IoError::CacheEncode {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&path, bytes).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), "matrix cached");
        Ok(path)
    }
}

impl MatrixCache for DiskCache {
    /// Unreadable or outdated files count as a miss and get overwritten.
    fn get(&self, key: &CacheKey) -> Result<Option<DistanceMatrix>, CacheError> {
        match self.load(key) {
            Ok(found) => Ok(found),
            Err(e @ (IoError::CacheDecode { .. } | IoError::CacheVersion { .. })) => {
                warn!(error = %e, "ignoring unusable cached matrix");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&mut self, key: &CacheKey, matrix: &DistanceMatrix) -> Result<(), CacheError> {
        self.store(key, matrix)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample() -> DistanceMatrix {
        DistanceMatrix::from_rows(vec![vec![0.0, 0.25], vec![0.25, 0.0]]).unwrap()
    }

    #[test]
    fn stored_matrix_loads_back() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(&dir.path().join("cache"));
        let key = CacheKey::new("iris", 2);

        assert!(cache.load(&key).unwrap().is_none());
        let path = cache.store(&key, &sample()).unwrap();
        assert!(path.ends_with("distance_matrix_iris_2.bin"));
        assert_eq!(cache.load(&key).unwrap(), Some(sample()));
    }

    #[test]
    fn keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let mut cache = DiskCache::new(dir.path());
        cache.put(&CacheKey::new("iris", 2), &sample()).unwrap();
        assert!(cache.get(&CacheKey::new("iris", 3)).unwrap().is_none());
        assert!(cache.get(&CacheKey::new("digits", 2)).unwrap().is_none());
    }

    #[test]
    fn dataset_and_size_do_not_run_together() {
        let dir = TempDir::new().unwrap();
        let mut cache = DiskCache::new(dir.path());
        cache.put(&CacheKey::new("iris1", 5), &sample()).unwrap();
        assert!(cache.get(&CacheKey::new("iris", 15)).unwrap().is_none());
    }

    #[test]
    fn dataset_names_cannot_leave_the_cache_dir() {
        let dir = TempDir::new().unwrap();
        let mut cache = DiskCache::new(&dir.path().join("cache"));
        for dataset in ["../iris", "a/b", "", "iris.v2"] {
            let key = CacheKey::new(dataset, 2);
            assert!(
                matches!(cache.path(&key), Err(IoError::InvalidCacheKey { .. })),
                "{dataset:?}"
            );
            assert!(cache.put(&key, &sample()).is_err());
            assert!(cache.get(&key).is_err());
        }
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn garbage_file_is_an_error_on_load_and_a_miss_on_get() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path());
        let key = CacheKey::new("iris", 2);
        fs::write(cache.path(&key).unwrap(), b"not a matrix").unwrap();

        assert!(matches!(cache.load(&key), Err(IoError::CacheDecode { .. })));
        assert!(cache.get(&key).unwrap().is_none());
    }

    #[test]
    fn other_format_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path());
        let key = CacheKey::new("iris", 2);
        let old = Envelope {
            format: FORMAT_VERSION + 1,
            grammar: LABEL_GRAMMAR_VERSION,
            matrix: sample(),
        };
        fs::write(cache.path(&key).unwrap(), bincode::serialize(&old).unwrap()).unwrap();

        assert!(matches!(cache.load(&key), Err(IoError::CacheVersion { .. })));
        assert!(cache.get(&key).unwrap().is_none());
    }
}
