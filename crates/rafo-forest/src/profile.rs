//! Per-tree structural and accuracy summary.

use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::confusion::{ClassMetrics, ConfusionMatrix};
use crate::error::RfError;
use crate::forest::RandomForest;
use crate::tree::DecisionTree;

/// What one estimator looks like and how well it does on its own.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TreeProfile {
    pub index: usize,
    pub n_leaves: usize,
    pub depth: usize,
    /// `(feature name, MDI importance)` in column order.
    pub importances: Vec<(String, f64)>,
    pub accuracy: f64,
    pub class_metrics: Vec<ClassMetrics>,
}

impl TreeProfile {
    /// Profile `tree` against a labelled evaluation set.
    ///
    /// # Errors
    ///
    /// Propagates prediction errors ([`RfError::NotFitted`],
    /// [`RfError::PredictionFeatureMismatch`]) and
    /// [`RfError::EmptyDataset`] for an empty evaluation set.
    pub fn new(
        index: usize,
        tree: &DecisionTree,
        feature_names: &[String],
        features: &[Vec<f64>],
        labels: &[usize],
    ) -> Result<Self, RfError> {
        let predicted = tree.predict_batch(features)?;
        let confusion = ConfusionMatrix::from_labels(labels, &predicted, tree.n_classes())?;
        let importances = feature_names
            .iter()
            .cloned()
            .zip(tree.feature_importances())
            .collect();
        Ok(Self {
            index,
            n_leaves: tree.n_leaves(),
            depth: tree.depth(),
            importances,
            accuracy: confusion.accuracy(),
            class_metrics: confusion.class_metrics(),
        })
    }
}

impl RandomForest {
    /// Profile every tree in parallel, in tree order.
    ///
    /// # Errors
    ///
    /// See [`TreeProfile::new`].
    #[instrument(skip_all, fields(n_trees = self.n_trees(), n_samples = features.len()))]
    pub fn profiles(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
    ) -> Result<Vec<TreeProfile>, RfError> {
        let profiles = self
            .trees
            .par_iter()
            .enumerate()
            .map(|(i, tree)| TreeProfile::new(i, tree, &self.feature_names, features, labels))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(n_profiles = profiles.len(), "tree profiles computed");
        Ok(profiles)
    }
}
