/// Errors from clustering, embedding, and scoring.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Returned when `eps` is not a positive finite number.
    #[error("eps must be positive and finite, got {eps}")]
    InvalidEps {
        /// The rejected radius.
        eps: f64,
    },

    /// Returned when `min_samples` is zero.
    #[error("min_samples must be at least 1, got {min_samples}")]
    InvalidMinSamples {
        /// The rejected neighbour count.
        min_samples: usize,
    },

    #[error("perplexity must be positive and finite, got {perplexity}")]
    InvalidPerplexity { perplexity: f64 },

    #[error("learning rate must be positive and finite, got {learning_rate}")]
    InvalidLearningRate { learning_rate: f64 },

    /// Returned when early exaggeration is below 1 or not finite.
    #[error("early exaggeration must be at least 1, got {early_exaggeration}")]
    InvalidEarlyExaggeration {
        /// The rejected factor.
        early_exaggeration: f64,
    },

    /// Returned when the iteration budget does not cover the exaggeration phase.
    #[error("n_iter must be at least {min}, got {n_iter}")]
    InvalidIterations {
        /// The rejected budget.
        n_iter: usize,
        /// Smallest accepted budget.
        min: usize,
    },

    /// Returned when a distance matrix is not square.
    #[error("distance matrix must be square, got {rows}x{cols}")]
    NonSquareMatrix {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
    },

    /// Returned when labels and matrix disagree on the number of trees.
    #[error("{n_labels} cluster labels for a {n_trees}x{n_trees} distance matrix")]
    LabelCountMismatch {
        /// Number of labels supplied.
        n_labels: usize,
        /// Number of trees in the matrix.
        n_trees: usize,
    },
}
