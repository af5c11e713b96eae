use std::collections::VecDeque;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument};

use crate::{
    RfError,
    node::{Node, NodeIndex, majority_class},
    split::{SplitCriterion, find_best_split},
};

/// Configuration for a single CART decision tree.
///
/// # Defaults
///
/// | Parameter           | Default               |
/// |---------------------|-----------------------|
/// | `criterion`         | `Gini`                |
/// | `max_depth`         | `None` (unlimited)    |
/// | `min_samples_split` | 2                     |
/// | `min_samples_leaf`  | 1                     |
/// | `max_features`      | `None` (all features) |
/// | `seed`              | 42                    |
#[derive(Debug, Clone)]
pub struct DecisionTreeConfig {
    pub(crate) criterion: SplitCriterion,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_samples_split: usize,
    pub(crate) min_samples_leaf: usize,
    pub(crate) max_features: Option<usize>,
    pub(crate) seed: u64,
}

impl DecisionTreeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            criterion: SplitCriterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 42,
        }
    }

    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Limit depth to `d` levels below the root. `None` grows until pure.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_min_samples_split(mut self, min_samples_split: usize) -> Self {
        self.min_samples_split = min_samples_split;
        self
    }

    #[must_use]
    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Number of columns drawn per split. `None` considers all of them.
    #[must_use]
    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fit a tree on row-major `features` with zero-based class `labels`.
    ///
    /// The class count is inferred as `max(labels) + 1`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | `features` is empty |
    /// | [`RfError::ZeroFeatures`] | rows have no columns |
    /// | [`RfError::FeatureCountMismatch`] | rows differ in width |
    /// | [`RfError::LabelCountMismatch`] | `labels.len() != features.len()` |
    /// | [`RfError::NonFiniteValue`] | a value is NaN or infinite |
    /// | [`RfError::InvalidMaxDepth`] | `max_depth` is `Some(0)` |
    /// | [`RfError::InvalidMinSamplesSplit`] | `min_samples_split < 2` |
    /// | [`RfError::InvalidMinSamplesLeaf`] | `min_samples_leaf < 1` |
    /// | [`RfError::InvalidMaxFeatures`] | `max_features` outside `[1, n_features]` |
    #[instrument(skip(self, features, labels), fields(n_samples = features.len()))]
    pub fn fit(&self, features: &[Vec<f64>], labels: &[usize]) -> Result<DecisionTree, RfError> {
        let n_classes = labels.iter().max().map_or(1, |&m| m + 1);
        self.fit_with_classes(features, labels, n_classes)
    }

    /// Fit with an explicit class count, so that every tree of an ensemble
    /// carries histograms of the same length even when a bootstrap sample
    /// misses a class.
    pub(crate) fn fit_with_classes(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
    ) -> Result<DecisionTree, RfError> {
        let n_features = validate_dataset(features, labels)?;
        self.validate()?;

        let max_features = self.max_features.unwrap_or(n_features);
        if max_features == 0 || max_features > n_features {
            return Err(RfError::InvalidMaxFeatures {
                max_features,
                n_features,
            });
        }

        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|f| features.iter().map(|row| row[f]).collect())
            .collect();
        let rows: Vec<usize> = (0..features.len()).collect();

        let mut grower = Grower {
            columns: &columns,
            labels,
            n_classes,
            max_features,
            config: self,
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            arena: Vec::new(),
        };
        grower.grow(&rows, 0);

        debug!(
            n_nodes = grower.arena.len(),
            n_features, n_classes, max_features, "decision tree grown"
        );

        Ok(DecisionTree {
            nodes: grower.arena,
            n_features,
            n_classes,
            criterion: self.criterion,
        })
    }

    fn validate(&self) -> Result<(), RfError> {
        if self.max_depth == Some(0) {
            return Err(RfError::InvalidMaxDepth { max_depth: 0 });
        }
        if self.min_samples_split < 2 {
            return Err(RfError::InvalidMinSamplesSplit {
                min_samples_split: self.min_samples_split,
            });
        }
        if self.min_samples_leaf < 1 {
            return Err(RfError::InvalidMinSamplesLeaf {
                min_samples_leaf: self.min_samples_leaf,
            });
        }
        Ok(())
    }
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Check shape and finiteness of a labelled dataset, returning its width.
pub(crate) fn validate_dataset(features: &[Vec<f64>], labels: &[usize]) -> Result<usize, RfError> {
    let Some(first) = features.first() else {
        return Err(RfError::EmptyDataset);
    };
    let n_features = first.len();
    if n_features == 0 {
        return Err(RfError::ZeroFeatures);
    }
    if labels.len() != features.len() {
        return Err(RfError::LabelCountMismatch {
            n_samples: features.len(),
            n_labels: labels.len(),
        });
    }
    for (sample_index, row) in features.iter().enumerate() {
        if row.len() != n_features {
            return Err(RfError::FeatureCountMismatch {
                expected: n_features,
                got: row.len(),
                sample_index,
            });
        }
        if let Some(feature_index) = row.iter().position(|v| !v.is_finite()) {
            return Err(RfError::NonFiniteValue {
                sample_index,
                feature_index,
            });
        }
    }
    Ok(n_features)
}

/// Recursive arena builder. Nodes are pushed in pre-order, so the root
/// lands at index 0 and a split's left child directly follows it.
struct Grower<'a> {
    columns: &'a [Vec<f64>],
    labels: &'a [usize],
    n_classes: usize,
    max_features: usize,
    config: &'a DecisionTreeConfig,
    rng: ChaCha8Rng,
    arena: Vec<Node>,
}

impl Grower<'_> {
    fn grow(&mut self, rows: &[usize], depth: usize) -> NodeIndex {
        let mut class_counts = vec![0usize; self.n_classes];
        for &r in rows {
            class_counts[self.labels[r]] += 1;
        }
        let impurity = self.config.criterion.impurity(&class_counts, rows.len());
        let slot = self.arena.len();

        let stop = rows.len() < self.config.min_samples_split
            || impurity.value() <= 0.0
            || self.config.max_depth.is_some_and(|d| depth >= d);
        let candidate = if stop {
            None
        } else {
            find_best_split(
                self.columns,
                self.labels,
                rows,
                &class_counts,
                self.config.criterion,
                self.max_features,
                self.config.min_samples_leaf,
                &mut self.rng,
            )
        };

        let Some(split) = candidate else {
            self.arena.push(Node::Leaf {
                prediction: majority_class(&class_counts),
                impurity,
                class_counts,
            });
            return NodeIndex::new(slot);
        };

        // Reserve the slot so children get higher indices, then overwrite.
        self.arena.push(Node::Leaf {
            prediction: 0,
            impurity,
            class_counts: Vec::new(),
        });
        let left = self.grow(&split.left, depth + 1);
        let right = self.grow(&split.right, depth + 1);
        self.arena[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            impurity,
            class_counts,
            impurity_decrease: split.impurity_decrease,
        };
        NodeIndex::new(slot)
    }
}

/// A CART decision tree stored as a flat node arena.
///
/// `DecisionTree::default()` is an unfitted estimator with no nodes; it
/// refuses to predict and exposes no structure.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecisionTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) n_features: usize,
    pub(crate) n_classes: usize,
    pub(crate) criterion: SplitCriterion,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            n_features: 0,
            n_classes: 0,
            criterion: SplitCriterion::Gini,
        }
    }
}

impl DecisionTree {
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// The node arena; the root is at [`NodeIndex::ROOT`].
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.index())
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
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Predict the class of one sample.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::NotFitted`] | the tree has no nodes |
    /// | [`RfError::PredictionFeatureMismatch`] | `sample.len() != n_features` |
    pub fn predict(&self, sample: &[f64]) -> Result<usize, RfError> {
        match self.leaf_for(sample)? {
            Node::Leaf { prediction, .. } => Ok(*prediction),
            Node::Split { .. } => unreachable!("leaf_for always stops at a leaf"),
        }
    }

    /// Predict every row of `features`.
    ///
    /// # Errors
    ///
    /// Same as [`DecisionTree::predict`], for the first failing row.
    pub fn predict_batch(&self, features: &[Vec<f64>]) -> Result<Vec<usize>, RfError> {
        features.iter().map(|row| self.predict(row)).collect()
    }

    /// Class probabilities at the leaf reached by `sample`.
    ///
    /// # Errors
    ///
    /// Same as [`DecisionTree::predict`].
    pub fn predict_proba(&self, sample: &[f64]) -> Result<Vec<f64>, RfError> {
        let leaf = self.leaf_for(sample)?;
        let total = leaf.n_samples().max(1) as f64;
        Ok(leaf.class_counts().iter().map(|&c| c as f64 / total).collect())
    }

    /// Mean-decrease-in-impurity importances, normalised to sum to 1.
    /// All zeros for a single-leaf tree.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0f64; self.n_features];
        for node in &self.nodes {
            if let Node::Split {
                feature,
                impurity_decrease,
                ..
            } = node
            {
                totals[feature.index()] += impurity_decrease;
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|v| *v /= sum);
        }
        totals
    }

    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Longest root-to-leaf path in edges; a lone root leaf has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut deepest = 0;
        let mut queue = VecDeque::from([(NodeIndex::ROOT, 0usize)]);
        while let Some((idx, d)) = queue.pop_front() {
            match self.nodes[idx.index()].children() {
                Some((left, right)) => {
                    queue.push_back((left, d + 1));
                    queue.push_back((right, d + 1));
                }
                None => deepest = deepest.max(d),
            }
        }
        deepest
    }

    fn leaf_for(&self, sample: &[f64]) -> Result<&Node, RfError> {
        if !self.is_fitted() {
            return Err(RfError::NotFitted);
        }
        if sample.len() != self.n_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: sample.len(),
            });
        }
        let mut node = &self.nodes[0];
        while let Node::Split {
            feature,
            threshold,
            left,
            right,
            ..
        } = node
        {
            let next = if sample[feature.index()] <= *threshold { left } else { right };
            node = &self.nodes[next.index()];
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let features = vec![
            vec![1.0, 0.0],
            vec![2.0, 0.0],
            vec![3.0, 0.0],
            vec![10.0, 0.0],
            vec![11.0, 0.0],
            vec![12.0, 0.0],
        ];
        (features, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let err = DecisionTreeConfig::new().fit(&[], &[]).unwrap_err();
        assert!(matches!(err, RfError::EmptyDataset));
    }

    #[test]
    fn label_length_must_match_rows() {
        let (features, _) = two_blobs();
        let err = DecisionTreeConfig::new().fit(&features, &[0, 1]).unwrap_err();
        assert!(matches!(err, RfError::LabelCountMismatch { n_samples: 6, n_labels: 2 }));
    }

    #[test]
    fn pure_data_grows_single_leaf() {
        let features = vec![vec![1.0], vec![3.0], vec![5.0]];
        let tree = DecisionTreeConfig::new().fit(&features, &[0, 0, 0]).unwrap();
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.nodes()[0].class_counts(), &[3]);
    }

    #[test]
    fn separable_data_gives_root_split_with_histograms() {
        let (features, labels) = two_blobs();
        let tree = DecisionTreeConfig::new().fit(&features, &labels).unwrap();

        assert_eq!(tree.n_nodes(), 3, "one split and two pure leaves");
        let root = tree.node(NodeIndex::ROOT).unwrap();
        assert_eq!(root.class_counts(), &[3, 3]);
        assert_eq!(root.children(), Some((NodeIndex::new(1), NodeIndex::new(2))));
        assert_eq!(tree.nodes()[1].class_counts(), &[3, 0]);
        assert_eq!(tree.nodes()[2].class_counts(), &[0, 3]);
        assert_eq!(tree.predict(&[2.0, 0.0]).unwrap(), 0);
        assert_eq!(tree.predict(&[11.0, 0.0]).unwrap(), 1);
    }

    #[test]
    fn xor_needs_two_levels() {
        let features = vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
        let tree = DecisionTreeConfig::new().fit(&features, &[0, 1, 1, 0]).unwrap();
        assert!(tree.depth() >= 2, "depth {}", tree.depth());
        assert_eq!(tree.predict_batch(&features).unwrap(), vec![0, 1, 1, 0]);
    }

    #[test]
    fn max_depth_caps_growth() {
        let features = vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
        let tree = DecisionTreeConfig::new()
            .with_max_depth(Some(1))
            .fit(&features, &[0, 1, 1, 0])
            .unwrap();
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn importances_sum_to_one_and_favor_informative_column() {
        let features = vec![
            vec![1.0, 100.0],
            vec![2.0, 200.0],
            vec![3.0, 300.0],
            vec![10.0, 100.0],
            vec![11.0, 200.0],
            vec![12.0, 300.0],
        ];
        let tree = DecisionTreeConfig::new().fit(&features, &[0, 0, 0, 1, 1, 1]).unwrap();
        let importances = tree.feature_importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-10);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn predict_proba_reads_leaf_histogram() {
        let (features, labels) = two_blobs();
        let tree = DecisionTreeConfig::new().fit(&features, &labels).unwrap();
        assert_eq!(tree.predict_proba(&[1.5, 0.0]).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn unfitted_tree_refuses_to_predict() {
        let tree = DecisionTree::default();
        assert!(!tree.is_fitted());
        assert!(tree.nodes().is_empty());
        assert!(matches!(tree.predict(&[1.0]), Err(RfError::NotFitted)));
    }

    #[test]
    fn wrong_width_is_rejected_at_prediction() {
        let (features, labels) = two_blobs();
        let tree = DecisionTreeConfig::new().fit(&features, &labels).unwrap();
        assert!(matches!(
            tree.predict(&[1.0]),
            Err(RfError::PredictionFeatureMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn explicit_class_count_pads_histograms() {
        let (features, _) = two_blobs();
        let tree = DecisionTreeConfig::new()
            .fit_with_classes(&features, &[0; 6], 3)
            .unwrap();
        assert_eq!(tree.n_classes(), 3);
        assert_eq!(tree.nodes()[0].class_counts(), &[6, 0, 0]);
    }

    #[test]
    fn same_seed_same_tree() {
        let (features, labels) = two_blobs();
        let config = DecisionTreeConfig::new().with_max_features(Some(1)).with_seed(9);
        let first = config.fit(&features, &labels).unwrap();
        assert_eq!(first, config.fit(&features, &labels).unwrap());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (features, labels) = two_blobs();
        let err = DecisionTreeConfig::new()
            .with_min_samples_split(1)
            .fit(&features, &labels)
            .unwrap_err();
        assert!(matches!(err, RfError::InvalidMinSamplesSplit { min_samples_split: 1 }));
        let err = DecisionTreeConfig::new()
            .with_max_features(Some(3))
            .fit(&features, &labels)
            .unwrap_err();
        assert!(matches!(err, RfError::InvalidMaxFeatures { max_features: 3, n_features: 2 }));
    }
}
