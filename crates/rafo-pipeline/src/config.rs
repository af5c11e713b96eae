//! Hyperparameters for every stage, with dataset presets.

use std::fmt;
use std::str::FromStr;

use rafo_cluster::{DbscanConfig, TsneConfig};
use rafo_forest::{HoldoutSplit, RandomForest, RandomForestConfig, RfError};
use rafo_ged::{GedConfig, MatrixConfig, NanSubstitute};

use crate::error::PipelineError;

/// Tuned hyperparameter sets for the bundled datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    Iris,
    Digits,
}

impl Preset {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Preset::Iris => "iris",
            Preset::Digits => "digits",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iris" => Ok(Preset::Iris),
            "digits" => Ok(Preset::Digits),
            other => Err(PipelineError::InvalidConfig {
                reason: format!("unknown preset {other:?}, expected iris or digits"),
            }),
        }
    }
}

/// How the ensemble is trained.
///
/// # Defaults
///
/// | Parameter       | Default |
/// |-----------------|---------|
/// | `n_trees`       | 100     |
/// | `max_depth`     | 10      |
/// | `seed`          | 123     |
/// | `test_fraction` | 0.3     |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    n_trees: usize,
    max_depth: usize,
    seed: u64,
    test_fraction: f64,
}

impl ForestParams {
    #[must_use]
    pub fn new() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            seed: 123,
            test_fraction: 0.3,
        }
    }

    #[must_use]
    pub fn with_n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Seed for both the hold-out shuffle and the forest.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_test_fraction(mut self, test_fraction: f64) -> Self {
        self.test_fraction = test_fraction;
        self
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn test_fraction(&self) -> f64 {
        self.test_fraction
    }

    /// # Errors
    ///
    /// [`RfError::InvalidTreeCount`] for zero trees.
    pub fn forest_config(&self) -> Result<RandomForestConfig, RfError> {
        Ok(RandomForestConfig::new(self.n_trees)?
            .with_max_depth(Some(self.max_depth))
            .with_seed(self.seed))
    }

    /// Split the rows with the configured seed and fit a forest on the
    /// training side. Returns the forest, the split, and the training rows.
    ///
    /// # Errors
    ///
    /// Split errors ([`RfError::InvalidTestFraction`],
    /// [`RfError::DegenerateSplit`]) and everything
    /// [`RandomForestConfig::fit`] returns.
    pub fn fit_holdout(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        feature_names: &[String],
    ) -> Result<(RandomForest, HoldoutSplit, Vec<Vec<f64>>, Vec<usize>), RfError> {
        let holdout = HoldoutSplit::new(features.len(), self.test_fraction, self.seed)?;
        let (train_x, train_y) = HoldoutSplit::take(&holdout.train, features, labels);
        let forest = self.forest_config()?.fit(&train_x, &train_y, feature_names)?;
        Ok((forest, holdout, train_x, train_y))
    }
}

impl Default for ForestParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters of the stages downstream of the distance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClusterParams {
    pub dbscan: DbscanConfig,
    pub tsne: TsneConfig,
}

/// Full configuration of one pipeline run.
///
/// Start from [`PipelineConfig::for_preset`] and override with `with_*`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    dataset: String,
    forest: ForestParams,
    matrix: MatrixConfig,
    cluster: ClusterParams,
}

impl PipelineConfig {
    /// Hyperparameters tuned for `preset`; the dataset name is the preset name.
    ///
    /// | Parameter            | Iris | Digits |
    /// |----------------------|------|--------|
    /// | `max_depth`          | 10   | 5      |
    /// | `eps`                | 0.12 | 0.75   |
    /// | `min_samples`        | 2    | 2      |
    /// | `learning_rate`      | 73   | 40     |
    /// | `perplexity`         | 5    | 47     |
    /// | `early_exaggeration` | 35   | 6      |
    #[must_use]
    pub fn for_preset(preset: Preset) -> Self {
        let (max_depth, eps, learning_rate, perplexity, early_exaggeration) = match preset {
            Preset::Iris => (10, 0.12, 73.0, 5.0, 35.0),
            Preset::Digits => (5, 0.75, 40.0, 47.0, 6.0),
        };
        // Preset constants satisfy DbscanConfig's checks.
        let dbscan = DbscanConfig::new(eps, 2).unwrap_or_default();
        Self {
            dataset: preset.name().to_string(),
            forest: ForestParams::new().with_max_depth(max_depth),
            matrix: MatrixConfig::new(),
            cluster: ClusterParams {
                dbscan,
                tsne: TsneConfig::new()
                    .with_learning_rate(learning_rate)
                    .with_perplexity(perplexity)
                    .with_early_exaggeration(early_exaggeration),
            },
        }
    }

    /// Name used to key the distance-matrix cache.
    #[must_use]
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    #[must_use]
    pub fn with_forest(mut self, forest: ForestParams) -> Self {
        self.forest = forest;
        self
    }

    #[must_use]
    pub fn with_ged(mut self, ged: GedConfig) -> Self {
        self.matrix = self.matrix.with_ged(ged);
        self
    }

    #[must_use]
    pub fn with_nan_substitute(mut self, nan_substitute: NanSubstitute) -> Self {
        self.matrix = self.matrix.with_nan_substitute(nan_substitute);
        self
    }

    #[must_use]
    pub fn with_dbscan(mut self, dbscan: DbscanConfig) -> Self {
        self.cluster.dbscan = dbscan;
        self
    }

    #[must_use]
    pub fn with_tsne(mut self, tsne: TsneConfig) -> Self {
        self.cluster.tsne = tsne;
        self
    }

    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    #[must_use]
    pub fn forest(&self) -> &ForestParams {
        &self.forest
    }

    #[must_use]
    pub fn matrix(&self) -> &MatrixConfig {
        &self.matrix
    }

    #[must_use]
    pub fn cluster(&self) -> &ClusterParams {
        &self.cluster
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_preset(Preset::Iris)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iris_preset_matches_documented_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.dataset(), "iris");
        assert_eq!(config.forest().n_trees(), 100);
        assert_eq!(config.forest().max_depth(), 10);
        assert_eq!(config.cluster().dbscan.eps(), 0.12);
        assert_eq!(config.cluster().dbscan.min_samples(), 2);
        assert_eq!(config.cluster().tsne.learning_rate(), 73.0);
        assert_eq!(config.cluster().tsne.perplexity(), 5.0);
        assert_eq!(config.cluster().tsne.early_exaggeration(), 35.0);
        assert_eq!(config.cluster().tsne.n_iter(), 1000);
        assert_eq!(config.matrix().nan_substitute(), NanSubstitute::SquaredMax);
    }

    #[test]
    fn digits_preset_overrides_depth_and_embedding() {
        let config = PipelineConfig::for_preset(Preset::Digits);
        assert_eq!(config.forest().max_depth(), 5);
        assert_eq!(config.cluster().dbscan.eps(), 0.75);
        assert_eq!(config.cluster().tsne.learning_rate(), 40.0);
        assert_eq!(config.cluster().tsne.perplexity(), 47.0);
        assert_eq!(config.cluster().tsne.early_exaggeration(), 6.0);
    }

    #[test]
    fn presets_parse_case_insensitively() {
        assert_eq!("Digits".parse::<Preset>().unwrap(), Preset::Digits);
        assert!(matches!("wine".parse::<Preset>(), Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn forest_params_build_forest_config() {
        let rf = ForestParams::new().with_n_trees(7).with_seed(9).forest_config().unwrap();
        assert_eq!(rf.n_trees(), 7);
        assert_eq!(rf.max_depth(), Some(10));
        assert_eq!(rf.seed(), 9);
        assert!(ForestParams::new().with_n_trees(0).forest_config().is_err());
    }
}
