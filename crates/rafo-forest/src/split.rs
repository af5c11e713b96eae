use rand::Rng;

use crate::node::{FeatureIndex, Impurity};

/// Impurity measure used to grade candidate splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitCriterion {
    /// `1 - Σ p_i²`
    Gini,
    /// `-Σ p_i ln p_i`
    Entropy,
}

impl SplitCriterion {
    /// Impurity of a node holding `class_counts`, which sum to `n_samples`.
    /// An empty node is pure.
    #[must_use]
    pub fn impurity(&self, class_counts: &[usize], n_samples: usize) -> Impurity {
        if n_samples == 0 {
            return Impurity::new(0.0);
        }
        let n = n_samples as f64;
        let proportions = class_counts.iter().filter(|&&c| c > 0).map(|&c| c as f64 / n);
        let value = match self {
            SplitCriterion::Gini => 1.0 - proportions.map(|p| p * p).sum::<f64>(),
            SplitCriterion::Entropy => -proportions.map(|p| p * p.ln()).sum::<f64>(),
        };
        Impurity::new(value)
    }

    /// Lower-case name as it appears in rendered node labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SplitCriterion::Gini => "gini",
            SplitCriterion::Entropy => "entropy",
        }
    }
}

/// Best split found for one node.
#[derive(Debug, Clone)]
pub(crate) struct SplitCandidate {
    pub(crate) feature: FeatureIndex,
    pub(crate) threshold: f64,
    /// `n·I(parent) - n_l·I(left) - n_r·I(right)`
    pub(crate) impurity_decrease: f64,
    pub(crate) left: Vec<usize>,
    pub(crate) right: Vec<usize>,
}

/// Scan `max_features` randomly drawn columns for the split with the
/// largest weighted impurity decrease.
///
/// `columns` is column-major (`columns[feature][sample]`); `rows` indexes
/// into each column. Thresholds sit halfway between consecutive distinct
/// values. Returns `None` when every drawn column is constant over `rows`
/// or every boundary would leave a child below `min_samples_leaf`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn find_best_split(
    columns: &[Vec<f64>],
    labels: &[usize],
    rows: &[usize],
    parent_counts: &[usize],
    criterion: SplitCriterion,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitCandidate> {
    let n_features = columns.len();
    let n = rows.len();
    if n < 2 || n_features == 0 {
        return None;
    }
    let parent = criterion.impurity(parent_counts, n).value();

    // Partial Fisher-Yates over the column order.
    let mut order: Vec<usize> = (0..n_features).collect();
    let take = max_features.min(n_features);
    for i in 0..take {
        let j = rng.gen_range(i..n_features);
        order.swap(i, j);
    }

    let mut best: Option<(f64, FeatureIndex, f64)> = None;
    for &feature in &order[..take] {
        let column = &columns[feature];
        let mut sorted: Vec<(f64, usize)> = rows.iter().map(|&r| (column[r], labels[r])).collect();
        sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_counts = vec![0usize; parent_counts.len()];
        let mut right_counts = parent_counts.to_vec();
        for i in 0..n - 1 {
            let (value, class) = sorted[i];
            left_counts[class] += 1;
            right_counts[class] -= 1;

            let next = sorted[i + 1].0;
            let n_left = i + 1;
            let n_right = n - n_left;
            if value == next || n_left < min_samples_leaf || n_right < min_samples_leaf {
                continue;
            }

            let decrease = n as f64 * parent
                - n_left as f64 * criterion.impurity(&left_counts, n_left).value()
                - n_right as f64 * criterion.impurity(&right_counts, n_right).value();
            if best.is_none_or(|(d, _, _)| decrease > d) {
                best = Some((decrease, FeatureIndex::new(feature), (value + next) / 2.0));
            }
        }
    }

    let (impurity_decrease, feature, threshold) = best?;
    let column = &columns[feature.index()];
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&r| column[r] <= threshold);

    Some(SplitCandidate {
        feature,
        threshold,
        impurity_decrease,
        left,
        right,
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn gini_values() {
        assert_eq!(SplitCriterion::Gini.impurity(&[10, 0, 0], 10).value(), 0.0);
        assert!((SplitCriterion::Gini.impurity(&[5, 5], 10).value() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn entropy_balanced_binary_is_ln2() {
        let imp = SplitCriterion::Entropy.impurity(&[5, 5], 10);
        assert!((imp.value() - 2.0_f64.ln()).abs() < 1e-12);
        assert_eq!(SplitCriterion::Entropy.impurity(&[0, 7], 7).value(), 0.0);
    }

    #[test]
    fn criterion_names() {
        assert_eq!(SplitCriterion::Gini.name(), "gini");
        assert_eq!(SplitCriterion::Entropy.name(), "entropy");
    }

    #[test]
    fn separable_column_splits_between_groups() {
        let columns = vec![vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0]];
        let labels = vec![0, 0, 0, 1, 1, 1];
        let rows: Vec<usize> = (0..6).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let gini = SplitCriterion::Gini;
        let split = find_best_split(&columns, &labels, &rows, &[3, 3], gini, 1, 1, &mut rng)
            .expect("separable data must split");

        assert_eq!(split.feature.index(), 0);
        assert!((split.threshold - 6.5).abs() < 1e-12, "threshold {}", split.threshold);
        assert_eq!(split.left, vec![0, 1, 2]);
        assert_eq!(split.right, vec![3, 4, 5]);
        assert!((split.impurity_decrease - 3.0).abs() < 1e-12);
    }

    #[test]
    fn constant_column_has_no_split() {
        let columns = vec![vec![5.0; 4]];
        let labels = vec![0, 0, 1, 1];
        let rows: Vec<usize> = (0..4).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let gini = SplitCriterion::Gini;
        assert!(find_best_split(&columns, &labels, &rows, &[2, 2], gini, 1, 1, &mut rng).is_none());
    }

    #[test]
    fn min_samples_leaf_blocks_tiny_children() {
        let columns = vec![vec![1.0, 10.0]];
        let labels = vec![0, 1];
        let rows = vec![0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let gini = SplitCriterion::Gini;
        assert!(find_best_split(&columns, &labels, &rows, &[1, 1], gini, 1, 2, &mut rng).is_none());
    }
}
