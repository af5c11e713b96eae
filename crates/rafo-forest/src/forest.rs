//! Random forest training with parallel tree construction.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, instrument};

use crate::config::RandomForestConfig;
use crate::error::RfError;
use crate::node::majority_class;
use crate::tree::{DecisionTree, DecisionTreeConfig, validate_dataset};

/// A fitted ensemble: an ordered list of trees sharing one input width and
/// class count. Immutable once built.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RandomForest {
    pub(crate) trees: Vec<DecisionTree>,
    pub(crate) n_features: usize,
    pub(crate) n_classes: usize,
    pub(crate) feature_names: Vec<String>,
}

/// Draw `n` row indices with replacement.
fn bootstrap_rows(n: usize, rng: &mut impl Rng) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

#[instrument(skip_all, fields(n_trees = config.n_trees, n_samples = features.len()))]
pub(crate) fn train(
    config: &RandomForestConfig,
    features: &[Vec<f64>],
    labels: &[usize],
    feature_names: &[String],
) -> Result<RandomForest, RfError> {
    let n_features = validate_dataset(features, labels)?;
    if feature_names.len() != n_features {
        return Err(RfError::FeatureNameMismatch {
            n_features,
            n_names: feature_names.len(),
        });
    }
    let max_features = config.max_features.resolve(n_features)?;
    let n_classes = labels.iter().max().map_or(1, |&m| m + 1);
    let n_samples = features.len();

    info!(
        n_trees = config.n_trees,
        n_samples, n_features, n_classes, max_features, "training random forest"
    );

    let mut master = ChaCha8Rng::seed_from_u64(config.seed);
    let seeds: Vec<u64> = (0..config.n_trees).map(|_| master.r#gen()).collect();

    let template = DecisionTreeConfig::new()
        .with_criterion(config.criterion)
        .with_max_depth(config.max_depth)
        .with_min_samples_split(config.min_samples_split)
        .with_min_samples_leaf(config.min_samples_leaf)
        .with_max_features(Some(max_features));

    let trees = seeds
        .into_par_iter()
        .map(|seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let rows = bootstrap_rows(n_samples, &mut rng);
            let boot_features: Vec<Vec<f64>> = rows.iter().map(|&r| features[r].clone()).collect();
            let boot_labels: Vec<usize> = rows.iter().map(|&r| labels[r]).collect();
            template
                .clone()
                .with_seed(rng.r#gen())
                .fit_with_classes(&boot_features, &boot_labels, n_classes)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(n_trees = trees.len(), "random forest trained");

    Ok(RandomForest {
        trees,
        n_features,
        n_classes,
        feature_names: feature_names.to_vec(),
    })
}

impl RandomForest {
    /// Assemble an ensemble from trees fitted elsewhere.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::InconsistentTrees`] | a fitted tree disagrees on input width |
    /// | [`RfError::FeatureNameMismatch`] | names do not cover the input width |
    pub fn from_trees(
        trees: Vec<DecisionTree>,
        feature_names: Vec<String>,
    ) -> Result<Self, RfError> {
        let n_features = feature_names.len();
        for (tree, t) in trees.iter().enumerate() {
            if t.is_fitted() && t.n_features() != n_features {
                return Err(RfError::InconsistentTrees {
                    tree,
                    expected: n_features,
                    got: t.n_features(),
                });
            }
        }
        let n_classes = trees.iter().map(DecisionTree::n_classes).max().unwrap_or(0);
        Ok(Self {
            trees,
            n_features,
            n_classes,
            feature_names,
        })
    }

    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    #[must_use]
    pub fn tree(&self, index: usize) -> Option<&DecisionTree> {
        self.trees.get(index)
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Majority vote over all trees; ties go to the lowest class.
    ///
    /// # Errors
    ///
    /// Propagates the first per-tree prediction error.
    pub fn predict(&self, sample: &[f64]) -> Result<usize, RfError> {
        let mut votes = vec![0usize; self.n_classes.max(1)];
        for tree in &self.trees {
            let class = tree.predict(sample)?;
            if class >= votes.len() {
                votes.resize(class + 1, 0);
            }
            votes[class] += 1;
        }
        Ok(majority_class(&votes))
    }

    /// Predict every row in parallel.
    ///
    /// # Errors
    ///
    /// Propagates the first prediction error.
    pub fn predict_batch(&self, features: &[Vec<f64>]) -> Result<Vec<usize>, RfError> {
        features.par_iter().map(|row| self.predict(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaxFeatures;

    fn three_bands() -> (Vec<Vec<f64>>, Vec<usize>, Vec<String>) {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for class in 0..3 {
            for i in 0..20 {
                features.push(vec![class as f64 * 10.0 + i as f64 * 0.15, 0.5]);
                labels.push(class);
            }
        }
        (features, labels, vec!["x".to_string(), "y".to_string()])
    }

    #[test]
    fn separable_bands_are_learned() {
        let (features, labels, names) = three_bands();
        let forest = RandomForestConfig::new(25)
            .unwrap()
            .with_max_features(MaxFeatures::All)
            .fit(&features, &labels, &names)
            .unwrap();

        assert_eq!(forest.n_trees(), 25);
        let predictions = forest.predict_batch(&features).unwrap();
        let correct = predictions.iter().zip(&labels).filter(|(p, l)| p == l).count();
        assert!(correct as f64 / labels.len() as f64 > 0.9, "correct = {correct}");
    }

    #[test]
    fn every_tree_shares_class_count() {
        let (features, labels, names) = three_bands();
        let forest = RandomForestConfig::new(15).unwrap().fit(&features, &labels, &names).unwrap();
        for tree in forest.trees() {
            assert_eq!(tree.n_classes(), 3);
            assert_eq!(tree.nodes()[0].class_counts().len(), 3);
        }
    }

    #[test]
    fn same_seed_same_forest() {
        let (features, labels, names) = three_bands();
        let config = RandomForestConfig::new(8).unwrap().with_seed(99);
        assert_eq!(
            config.fit(&features, &labels, &names).unwrap(),
            config.fit(&features, &labels, &names).unwrap()
        );
    }

    #[test]
    fn names_must_cover_columns() {
        let (features, labels, _) = three_bands();
        let err = RandomForestConfig::new(2)
            .unwrap()
            .fit(&features, &labels, &["x".to_string()])
            .unwrap_err();
        assert!(matches!(err, RfError::FeatureNameMismatch { n_features: 2, n_names: 1 }));
    }

    #[test]
    fn from_trees_checks_width() {
        let tree = DecisionTreeConfig::new().fit(&[vec![1.0], vec![2.0]], &[0, 1]).unwrap();
        let err =
            RandomForest::from_trees(vec![tree.clone()], vec!["a".into(), "b".into()]).unwrap_err();
        assert!(matches!(err, RfError::InconsistentTrees { tree: 0, expected: 2, got: 1 }));

        let forest = RandomForest::from_trees(vec![tree.clone(), tree], vec!["a".into()]).unwrap();
        assert_eq!(forest.n_trees(), 2);
        assert_eq!(forest.n_classes(), 2);
    }
}
