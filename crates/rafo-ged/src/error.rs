//! Error types for structure extraction and distance computation.

use crate::cache::{CacheError, CacheKey};

/// Errors from tree-graph extraction, label decoding, and matrix assembly.
#[derive(Debug, thiserror::Error)]
pub enum GedError {
    /// The estimator exposes no usable tree, or the extracted graph is not a tree.
    #[error("cannot extract structure of tree {tree}: {reason}")]
    StructureExtraction {
        /// Position of the estimator in the ensemble.
        tree: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A node label does not follow the label grammar.
    #[error("cannot parse node label {label:?}: {reason}")]
    LabelParse {
        /// The offending label text.
        label: String,
        /// Which part failed to decode.
        reason: String,
    },

    /// Every off-diagonal pair timed out, so no finite distance exists to
    /// derive a substitute from.
    #[error(
        "all {n_nan} off-diagonal distances between {n_trees} trees timed out; \
         raise the per-pair timeout"
    )]
    DegenerateMatrix {
        /// Number of trees in the matrix.
        n_trees: usize,
        /// Number of undefined off-diagonal cells.
        n_nan: usize,
    },

    /// An assembled or cached matrix does not have the expected square shape.
    #[error("distance matrix has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// `(n_trees, n_trees)`
        expected: (usize, usize),
        /// Shape actually found.
        got: (usize, usize),
    },

    #[error("cannot compute distances for an empty ensemble")]
    EmptyEnsemble,

    /// The cache backend failed.
    #[error("distance matrix cache failed for {key}")]
    Cache {
        /// Entry being read or written.
        key: CacheKey,
        /// Backend error.
        source: CacheError,
    },
}
