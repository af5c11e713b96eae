use rafo_cluster::ClusterError;
use rafo_forest::RfError;
use rafo_ged::GedError;

/// Errors that abort a pipeline run, tagged with the failing stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A hyperparameter combination is unusable.
    #[error("invalid pipeline configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// Splitting the data or fitting the forest failed.
    #[error("training stage failed")]
    Training(#[source] RfError),

    /// Profiling the fitted trees failed.
    #[error("tree profiling stage failed")]
    Profiling(#[source] RfError),

    /// A tree could not be turned into a graph.
    #[error("structure extraction stage failed")]
    Extraction(#[source] GedError),

    /// The distance matrix could not be computed, repaired, or cached.
    #[error("distance matrix stage failed for {n_trees} trees")]
    Distances {
        /// Size of the ensemble.
        n_trees: usize,
        /// Underlying failure.
        #[source]
        source: GedError,
    },

    #[error("clustering stage failed")]
    Clustering(#[source] ClusterError),

    #[error("embedding stage failed")]
    Embedding(#[source] ClusterError),

    #[error("scoring stage failed")]
    Scoring(#[source] ClusterError),
}

impl PipelineError {
    /// Name of the stage that failed.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfig { .. } => "config",
            PipelineError::Training(_) => "training",
            PipelineError::Profiling(_) => "profiling",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::Distances { .. } => "distances",
            PipelineError::Clustering(_) => "clustering",
            PipelineError::Embedding(_) => "embedding",
            PipelineError::Scoring(_) => "scoring",
        }
    }
}
