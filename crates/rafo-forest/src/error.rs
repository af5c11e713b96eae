/// Errors raised while training or querying the ensemble.
#[derive(Debug, thiserror::Error)]
pub enum RfError {
    /// The ensemble was asked for zero trees.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// Requested ensemble size.
        n_trees: usize,
    },

    /// A depth limit of zero leaves no room for a root.
    #[error("max_depth must be at least 1, got {max_depth}")]
    InvalidMaxDepth {
        /// Requested depth limit.
        max_depth: usize,
    },

    #[error("min_samples_split must be at least 2, got {min_samples_split}")]
    InvalidMinSamplesSplit {
        /// Requested minimum split size.
        min_samples_split: usize,
    },

    #[error("min_samples_leaf must be at least 1, got {min_samples_leaf}")]
    InvalidMinSamplesLeaf {
        /// Requested minimum leaf size.
        min_samples_leaf: usize,
    },

    /// The per-split feature budget resolved outside `[1, n_features]`.
    #[error("max_features resolved to {max_features}, but must be in [1, {n_features}]")]
    InvalidMaxFeatures {
        /// Resolved feature budget.
        max_features: usize,
        /// Number of feature columns in the data.
        n_features: usize,
    },

    /// Hold-out fraction outside the open interval `(0, 1)`.
    #[error("test_fraction must be in (0.0, 1.0), got {fraction}")]
    InvalidTestFraction {
        /// Requested hold-out fraction.
        fraction: f64,
    },

    /// The hold-out split would leave one side empty.
    #[error(
        "cannot split {n_samples} samples with test_fraction {fraction}: one side would be empty"
    )]
    DegenerateSplit {
        /// Number of samples being split.
        n_samples: usize,
        /// Requested hold-out fraction.
        fraction: f64,
    },

    #[error("dataset has zero samples")]
    EmptyDataset,

    #[error("dataset has zero feature columns")]
    ZeroFeatures,

    /// Row width disagrees with the first row.
    #[error("sample {sample_index} has {got} features, expected {expected}")]
    FeatureCountMismatch {
        /// Width of the first row.
        expected: usize,
        /// Width of the offending row.
        got: usize,
        /// Zero-based row index.
        sample_index: usize,
    },

    /// Labels and feature rows have different lengths.
    #[error("got {n_labels} labels for {n_samples} samples")]
    LabelCountMismatch {
        /// Number of feature rows.
        n_samples: usize,
        /// Number of labels.
        n_labels: usize,
    },

    /// Feature names do not cover every column.
    #[error("got {n_names} feature names for {n_features} feature columns")]
    FeatureNameMismatch {
        /// Number of feature columns.
        n_features: usize,
        /// Number of names supplied.
        n_names: usize,
    },

    #[error("prediction input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// Width the tree was trained on.
        expected: usize,
        /// Width of the prediction input.
        got: usize,
    },

    #[error("non-finite value at sample {sample_index}, feature {feature_index}")]
    NonFiniteValue {
        /// Zero-based row index.
        sample_index: usize,
        /// Zero-based column index.
        feature_index: usize,
    },

    /// The tree has no nodes; it was never fitted.
    #[error("decision tree has not been fitted")]
    NotFitted,

    /// Trees handed to [`RandomForest::from_trees`](crate::RandomForest::from_trees)
    /// disagree on the input width.
    #[error("tree {tree} expects {got} features, ensemble expects {expected}")]
    InconsistentTrees {
        /// Position of the offending tree.
        tree: usize,
        /// Width expected by the ensemble.
        expected: usize,
        /// Width expected by the tree.
        got: usize,
    },
}
