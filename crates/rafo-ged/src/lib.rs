//! Structural distance between decision trees.
//!
//! Pure computation, no file I/O. Fitted trees become labelled tree graphs,
//! node labels decode once into a small schema, and a time-bounded graph
//! edit distance fills a normalised all-pairs matrix computed in parallel.
//! Matrices can be reused through the [`MatrixCache`] trait.

mod cache;
mod error;
mod ged;
mod graph;
mod label;
mod matcher;
mod matrix;

pub use cache::{CacheError, CacheKey, MatrixCache, MemoryCache, NoCache};
pub use error::GedError;
pub use ged::{EditScope, EditSearch, GedConfig, GraphEditDistance, TimeoutPolicy};
pub use graph::{Branch, TreeGraph, TreeNode};
pub use label::{LABEL_GRAMMAR_VERSION, MatchKey, NodeLabel, NodeStats};
pub use matcher::NodeMatcher;
pub use matrix::{DistanceMatrix, DistanceMatrixEngine, MatrixConfig, MatrixRun, NanSubstitute};
