//! Runs every stage once and keeps the results as a read-only bundle.

use std::time::Duration;

use rafo_cluster::{ClusterAssignment, DbscanResult, Embedding, SilhouetteScores, score_clustering};
use rafo_forest::{HoldoutSplit, RandomForest, TreeProfile};
use rafo_ged::{CacheKey, DistanceMatrix, DistanceMatrixEngine, MatrixCache, TreeGraph};
use tracing::{info, instrument};

use crate::config::{ClusterParams, PipelineConfig};
use crate::error::PipelineError;

/// Outputs of the stages downstream of the distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    params: ClusterParams,
    dbscan: DbscanResult,
    embedding: Embedding,
    scores: SilhouetteScores,
}

impl Clustering {
    /// Cluster, embed, and score the trees of `matrix`.
    ///
    /// Clustering and embedding do not depend on each other and run
    /// concurrently.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Clustering`], [`PipelineError::Embedding`], or
    /// [`PipelineError::Scoring`] for the stage that failed.
    #[instrument(skip_all, fields(n_trees = matrix.len()))]
    pub fn compute(matrix: &DistanceMatrix, params: ClusterParams) -> Result<Self, PipelineError> {
        let (dbscan, embedding) =
            rayon::join(|| params.dbscan.fit(matrix), || params.tsne.embed(matrix));
        let dbscan = dbscan.map_err(PipelineError::Clustering)?;
        let embedding = embedding.map_err(PipelineError::Embedding)?;
        let scores = score_clustering(matrix, dbscan.assignment()).map_err(PipelineError::Scoring)?;
        Ok(Self {
            params,
            dbscan,
            embedding,
            scores,
        })
    }

    #[must_use]
    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    #[must_use]
    pub fn assignment(&self) -> &ClusterAssignment {
        self.dbscan.assignment()
    }

    #[must_use]
    pub fn dbscan(&self) -> &DbscanResult {
        &self.dbscan
    }

    #[must_use]
    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    #[must_use]
    pub fn scores(&self) -> &SilhouetteScores {
        &self.scores
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    holdout: Option<HoldoutSplit>,
    profiles: Vec<TreeProfile>,
    graphs: Vec<TreeGraph>,
    matrix: DistanceMatrix,
    n_undefined: usize,
    matrix_elapsed: Duration,
    matrix_from_cache: bool,
    clustering: Clustering,
}

impl PipelineResult {
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.graphs.len()
    }

    /// Train/test row indices when the orchestrator trained the forest.
    #[must_use]
    pub fn holdout(&self) -> Option<&HoldoutSplit> {
        self.holdout.as_ref()
    }

    #[must_use]
    pub fn profiles(&self) -> &[TreeProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn graphs(&self) -> &[TreeGraph] {
        &self.graphs
    }

    #[must_use]
    pub fn matrix(&self) -> &DistanceMatrix {
        &self.matrix
    }

    /// Pairs that timed out and were repaired.
    #[must_use]
    pub fn n_undefined(&self) -> usize {
        self.n_undefined
    }

    #[must_use]
    pub fn matrix_elapsed(&self) -> Duration {
        self.matrix_elapsed
    }

    #[must_use]
    pub fn matrix_from_cache(&self) -> bool {
        self.matrix_from_cache
    }

    #[must_use]
    pub fn clustering(&self) -> &Clustering {
        &self.clustering
    }

    #[must_use]
    pub fn assignment(&self) -> &ClusterAssignment {
        self.clustering.assignment()
    }

    #[must_use]
    pub fn embedding(&self) -> &Embedding {
        self.clustering.embedding()
    }

    #[must_use]
    pub fn scores(&self) -> &SilhouetteScores {
        self.clustering.scores()
    }
}

/// Owns a fitted ensemble and the results derived from it.
///
/// Construction runs every stage exactly once. Later changes to the
/// clustering or embedding parameters go through
/// [`ModelOrchestrator::recluster`], which reuses the graphs and the matrix.
#[derive(Debug, Clone)]
pub struct ModelOrchestrator {
    forest: RandomForest,
    config: PipelineConfig,
    result: PipelineResult,
}

impl ModelOrchestrator {
    /// Split the data, train the forest on the training rows, and run the
    /// pipeline on it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Training`] when the split or fit fails, plus
    /// everything [`ModelOrchestrator::new`] returns.
    #[instrument(skip_all, fields(n_samples = features.len(), dataset = config.dataset()))]
    pub fn train(
        features: &[Vec<f64>],
        labels: &[usize],
        feature_names: &[String],
        config: PipelineConfig,
        cache: &mut dyn MatrixCache,
    ) -> Result<Self, PipelineError> {
        let (forest, holdout, train_x, train_y) = config
            .forest()
            .fit_holdout(features, labels, feature_names)
            .map_err(PipelineError::Training)?;
        info!(
            n_trees = forest.n_trees(),
            n_train = holdout.train.len(),
            n_test = holdout.test.len(),
            "forest trained"
        );

        let mut orchestrator = Self::new(forest, &train_x, &train_y, config, cache)?;
        orchestrator.result.holdout = Some(holdout);
        Ok(orchestrator)
    }

    /// Run the pipeline on an already fitted forest. `features` and
    /// `labels` are the rows each tree is profiled against.
    ///
    /// The matrix is looked up in `cache` under the configured dataset name
    /// and the ensemble size before it is computed.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`PipelineError::Profiling`] | a tree cannot predict the rows |
    /// | [`PipelineError::Extraction`] | a tree is unfitted or not a tree |
    /// | [`PipelineError::Distances`] | every pair timed out, cache failure, or a wrong-sized hit |
    /// | [`PipelineError::Clustering`] | DBSCAN rejects its inputs |
    /// | [`PipelineError::Embedding`] | t-SNE rejects its inputs |
    /// | [`PipelineError::Scoring`] | silhouette scoring rejects its inputs |
    #[instrument(skip_all, fields(n_trees = forest.n_trees(), dataset = config.dataset()))]
    pub fn new(
        forest: RandomForest,
        features: &[Vec<f64>],
        labels: &[usize],
        config: PipelineConfig,
        cache: &mut dyn MatrixCache,
    ) -> Result<Self, PipelineError> {
        let graphs = TreeGraph::from_forest(&forest).map_err(PipelineError::Extraction)?;
        let profiles = forest.profiles(features, labels).map_err(PipelineError::Profiling)?;

        let n_trees = forest.n_trees();
        let key = CacheKey::new(config.dataset(), n_trees);
        let run = DistanceMatrixEngine::new(*config.matrix())
            .compute_cached(&graphs, &key, cache)
            .map_err(|source| PipelineError::Distances { n_trees, source })?;

        let clustering = Clustering::compute(&run.matrix, *config.cluster())?;
        info!(
            n_clusters = clustering.assignment().n_clusters(),
            percent_clustered = clustering.scores().percent_clustered,
            from_cache = run.from_cache,
            "pipeline finished"
        );

        Ok(Self {
            forest,
            config,
            result: PipelineResult {
                holdout: None,
                profiles,
                graphs,
                matrix: run.matrix,
                n_undefined: run.n_undefined,
                matrix_elapsed: run.elapsed,
                matrix_from_cache: run.from_cache,
                clustering,
            },
        })
    }

    /// Recompute clustering, embedding, and scores with new parameters.
    /// Graphs and the distance matrix are kept.
    ///
    /// On error the previous results stay in place.
    ///
    /// # Errors
    ///
    /// See [`Clustering::compute`].
    pub fn recluster(&mut self, params: ClusterParams) -> Result<&Clustering, PipelineError> {
        let clustering = Clustering::compute(&self.result.matrix, params)?;
        self.config = self.config.clone().with_dbscan(params.dbscan).with_tsne(params.tsne);
        self.result.clustering = clustering;
        Ok(&self.result.clustering)
    }

    #[must_use]
    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn result(&self) -> &PipelineResult {
        &self.result
    }

    #[must_use]
    pub fn into_result(self) -> PipelineResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rafo_cluster::{ClusterLabel, DbscanConfig, TsneConfig};

    fn two_pairs() -> DistanceMatrix {
        DistanceMatrix::from_rows(vec![
            vec![0.0, 0.0, 1.0, 1.0],
            vec![0.0, 0.0, 1.0, 1.0],
            vec![1.0, 1.0, 0.0, 0.0],
            vec![1.0, 1.0, 0.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn clustering_bundles_all_downstream_stages() {
        let params = ClusterParams {
            dbscan: DbscanConfig::new(0.5, 2).unwrap(),
            tsne: TsneConfig::new(),
        };
        let clustering = Clustering::compute(&two_pairs(), params).unwrap();
        assert_eq!(clustering.assignment().members(ClusterLabel::Cluster(1)), vec![2, 3]);
        assert_eq!(clustering.embedding().len(), 4);
        assert_eq!(clustering.scores().percent_clustered, 100.0);
        assert_eq!(clustering.params(), &params);
    }

    #[test]
    fn embedding_errors_name_their_stage() {
        let params = ClusterParams {
            dbscan: DbscanConfig::default(),
            tsne: TsneConfig::new().with_perplexity(-1.0),
        };
        let err = Clustering::compute(&two_pairs(), params).unwrap_err();
        assert_eq!(err.stage(), "embedding");
    }
}
