//! DBSCAN over a precomputed distance matrix.

use rafo_ged::DistanceMatrix;
use rayon::prelude::*;
use tracing::{info, instrument};

use crate::error::ClusterError;
use crate::label::{ClusterAssignment, ClusterLabel};

/// Density-based clustering parameters.
///
/// # Defaults
///
/// | Parameter     | Default |
/// |---------------|---------|
/// | `eps`         | 0.12    |
/// | `min_samples` | 2       |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbscanConfig {
    eps: f64,
    min_samples: usize,
}

impl DbscanConfig {
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ClusterError::InvalidEps`] | `eps` is not positive and finite |
    /// | [`ClusterError::InvalidMinSamples`] | `min_samples` is zero |
    pub fn new(eps: f64, min_samples: usize) -> Result<Self, ClusterError> {
        if !(eps.is_finite() && eps > 0.0) {
            return Err(ClusterError::InvalidEps { eps });
        }
        if min_samples == 0 {
            return Err(ClusterError::InvalidMinSamples { min_samples });
        }
        Ok(Self { eps, min_samples })
    }

    #[must_use]
    pub fn eps(&self) -> f64 {
        self.eps
    }

    #[must_use]
    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Cluster the trees of `matrix`.
    ///
    /// A tree is a core tree when at least `min_samples` trees, itself
    /// included, lie within `eps`. Clusters grow from core trees in index
    /// order, so labels are deterministic. Border trees join the first
    /// cluster that reaches them.
    ///
    /// # Errors
    ///
    /// [`ClusterError::NonSquareMatrix`] if `matrix` is not square.
    #[instrument(
        skip(self, matrix),
        fields(n_trees = matrix.len(), eps = self.eps, min_samples = self.min_samples)
    )]
    pub fn fit(&self, matrix: &DistanceMatrix) -> Result<DbscanResult, ClusterError> {
        let n = crate::square_len(matrix)?;
        let neighbourhoods: Vec<Vec<usize>> = (0..n)
            .into_par_iter()
            .map(|i| {
                matrix
                    .row(i)
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| **d <= self.eps)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        let is_core: Vec<bool> = neighbourhoods
            .iter()
            .map(|nb| nb.len() >= self.min_samples)
            .collect();

        let mut labels = vec![ClusterLabel::Noise; n];
        let mut visited = vec![false; n];
        let mut next_id = 0;
        let mut stack = Vec::new();
        for seed in 0..n {
            if visited[seed] || !is_core[seed] {
                continue;
            }
            stack.push(seed);
            while let Some(i) = stack.pop() {
                if visited[i] {
                    continue;
                }
                visited[i] = true;
                labels[i] = ClusterLabel::Cluster(next_id);
                if is_core[i] {
                    stack.extend(neighbourhoods[i].iter().copied().filter(|&j| !visited[j]));
                }
            }
            next_id += 1;
        }

        let assignment = ClusterAssignment::new(labels);
        info!(
            n_clusters = assignment.n_clusters(),
            n_noise = assignment.noise_count(),
            "dbscan finished"
        );
        Ok(DbscanResult {
            assignment,
            is_core,
        })
    }
}

impl Default for DbscanConfig {
    fn default() -> Self {
        Self {
            eps: 0.12,
            min_samples: 2,
        }
    }
}

/// Labels plus which trees were core trees.
#[derive(Debug, Clone, PartialEq)]
pub struct DbscanResult {
    assignment: ClusterAssignment,
    is_core: Vec<bool>,
}

impl DbscanResult {
    #[must_use]
    pub fn assignment(&self) -> &ClusterAssignment {
        &self.assignment
    }

    #[must_use]
    pub fn into_assignment(self) -> ClusterAssignment {
        self.assignment
    }

    #[must_use]
    pub fn is_core(&self, tree: usize) -> bool {
        self.is_core.get(tree).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn core_sample_indices(&self) -> Vec<usize> {
        self.is_core.iter().enumerate().filter(|(_, c)| **c).map(|(i, _)| i).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::ClusterLabel::{Cluster, Noise};

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
    fn two_identical_pairs_form_two_clusters() {
        let result = DbscanConfig::new(0.5, 2).unwrap().fit(&two_pairs()).unwrap();
        assert_eq!(result.assignment().labels(), &[Cluster(0), Cluster(0), Cluster(1), Cluster(1)]);
        assert_eq!(result.assignment().noise_count(), 0);
        assert_eq!(result.core_sample_indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn repeated_runs_agree() {
        let config = DbscanConfig::default();
        let a = config.fit(&two_pairs()).unwrap();
        let b = config.fit(&two_pairs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn single_tree_is_noise() {
        let result = DbscanConfig::default().fit(&DistanceMatrix::zeros(1)).unwrap();
        assert_eq!(result.assignment().labels(), &[Noise]);
        assert!(!result.is_core(0));
    }

    #[test]
    fn isolated_tree_is_noise_and_border_joins_cluster() {
        // 0-1-2 chain at 0.1 spacing; 3 far away.
        let m = DistanceMatrix::from_rows(vec![
            vec![0.0, 0.1, 0.2, 1.0],
            vec![0.1, 0.0, 0.1, 1.0],
            vec![0.2, 0.1, 0.0, 1.0],
            vec![1.0, 1.0, 1.0, 0.0],
        ])
        .unwrap();
        let result = DbscanConfig::new(0.1, 3).unwrap().fit(&m).unwrap();
        assert_eq!(result.assignment().labels(), &[Cluster(0), Cluster(0), Cluster(0), Noise]);
        assert_eq!(result.core_sample_indices(), vec![1]);
    }

    #[test]
    fn eps_boundary_is_inclusive() {
        let m = DistanceMatrix::from_rows(vec![vec![0.0, 0.12], vec![0.12, 0.0]]).unwrap();
        let result = DbscanConfig::default().fit(&m).unwrap();
        assert_eq!(result.assignment().labels(), &[Cluster(0), Cluster(0)]);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(DbscanConfig::new(0.0, 2), Err(ClusterError::InvalidEps { .. })));
        assert!(matches!(DbscanConfig::new(f64::NAN, 2), Err(ClusterError::InvalidEps { .. })));
        assert!(matches!(
            DbscanConfig::new(0.1, 0),
            Err(ClusterError::InvalidMinSamples { min_samples: 0 })
        ));
    }
}
