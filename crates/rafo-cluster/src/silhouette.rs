//! Silhouette scores over a precomputed distance matrix.
//!
//! For tree `i` with mean distance `a` to the rest of its own group and
//! smallest mean distance `b` to any other group, the score is
//! `(b - a) / max(a, b)`, and 0 for a tree alone in its group. Noise is
//! scored as one more group, then every noise tree is pinned to -1.
//! Degenerate labelings score -1 everywhere instead of failing.

use rafo_ged::DistanceMatrix;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::error::ClusterError;
use crate::label::{ClusterAssignment, ClusterLabel};

/// Score reported for noise trees and degenerate labelings.
pub const SILHOUETTE_SENTINEL: f64 = -1.0;

/// Per-tree and aggregate clustering quality.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SilhouetteScores {
    /// One score per tree, in tree order.
    pub per_tree: Vec<f64>,
    /// Mean silhouette of the non-noise trees.
    pub cluster_score: f64,
    /// Share of trees assigned to a cluster, in percent.
    pub percent_clustered: f64,
}

/// Silhouette of every tree.
///
/// Every tree gets -1 when fewer than two non-noise clusters exist or when
/// the labels (noise counted as one) are not between 2 and `n - 1`.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`ClusterError::NonSquareMatrix`] | `matrix` is not square |
/// | [`ClusterError::LabelCountMismatch`] | one label per tree is required |
pub fn silhouette_samples(
    matrix: &DistanceMatrix,
    assignment: &ClusterAssignment,
) -> Result<Vec<f64>, ClusterError> {
    let n = checked(matrix, assignment)?;
    let indices: Vec<usize> = (0..n).collect();
    let mut scores = scores_over(matrix, assignment.labels(), &indices);
    for (score, label) in scores.iter_mut().zip(assignment.labels()) {
        if label.is_noise() {
            *score = SILHOUETTE_SENTINEL;
        }
    }
    Ok(scores)
}

/// Mean silhouette over the trees not labelled noise, or -1 when those
/// trees do not form at least two clusters with at least one of them
/// holding two trees.
///
/// # Errors
///
/// Same as [`silhouette_samples`].
pub fn silhouette_score(
    matrix: &DistanceMatrix,
    assignment: &ClusterAssignment,
) -> Result<f64, ClusterError> {
    checked(matrix, assignment)?;
    let clustered: Vec<usize> = (0..assignment.len())
        .filter(|&i| !assignment.labels()[i].is_noise())
        .collect();
    if is_degenerate(assignment.labels(), &clustered) {
        return Ok(SILHOUETTE_SENTINEL);
    }
    let scores = scores_over(matrix, assignment.labels(), &clustered);
    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// `100 * (1 - noise / n)`; an empty assignment counts as fully clustered.
#[must_use]
pub fn percent_clustered(assignment: &ClusterAssignment) -> f64 {
    if assignment.is_empty() {
        return 100.0;
    }
    100.0 * (1.0 - assignment.noise_count() as f64 / assignment.len() as f64)
}

/// All scores of one clustering.
///
/// # Errors
///
/// Same as [`silhouette_samples`].
#[instrument(skip_all, fields(n_trees = matrix.len(), n_clusters = assignment.n_clusters()))]
pub fn score_clustering(
    matrix: &DistanceMatrix,
    assignment: &ClusterAssignment,
) -> Result<SilhouetteScores, ClusterError> {
    let per_tree = silhouette_samples(matrix, assignment)?;
    let cluster_score = silhouette_score(matrix, assignment)?;
    let percent_clustered = percent_clustered(assignment);
    info!(cluster_score, percent_clustered, "clustering scored");
    Ok(SilhouetteScores {
        per_tree,
        cluster_score,
        percent_clustered,
    })
}

fn checked(matrix: &DistanceMatrix, assignment: &ClusterAssignment) -> Result<usize, ClusterError> {
    let n = crate::square_len(matrix)?;
    if assignment.len() != n {
        return Err(ClusterError::LabelCountMismatch {
            n_labels: assignment.len(),
            n_trees: n,
        });
    }
    Ok(n)
}

/// Whether the labels of `subset` admit a silhouette.
fn is_degenerate(labels: &[ClusterLabel], subset: &[usize]) -> bool {
    let mut distinct: Vec<ClusterLabel> = subset.iter().map(|&i| labels[i]).collect();
    distinct.sort_unstable();
    distinct.dedup();
    let n_clusters = distinct.iter().filter(|l| !l.is_noise()).count();
    n_clusters < 2 || distinct.len() >= subset.len()
}

/// Silhouette of each tree in `subset`, measured against `subset` only.
fn scores_over(matrix: &DistanceMatrix, labels: &[ClusterLabel], subset: &[usize]) -> Vec<f64> {
    if subset.is_empty() {
        return Vec::new();
    }
    if is_degenerate(labels, subset) {
        debug!(n_trees = subset.len(), "degenerate labeling, using sentinel scores");
        return vec![SILHOUETTE_SENTINEL; subset.len()];
    }

    let mut groups: Vec<(ClusterLabel, Vec<usize>)> = Vec::new();
    for &i in subset {
        match groups.iter_mut().find(|(l, _)| *l == labels[i]) {
            Some((_, members)) => members.push(i),
            None => groups.push((labels[i], vec![i])),
        }
    }

    subset
        .par_iter()
        .map(|&i| {
            let row = matrix.row(i);
            let mean = |members: &[usize], own: bool| {
                let total: f64 = members.iter().map(|&j| row[j]).sum();
                let count = if own { members.len() - 1 } else { members.len() };
                total / count as f64
            };
            let mut a = 0.0;
            let mut b = f64::INFINITY;
            for (label, members) in &groups {
                if *label == labels[i] {
                    if members.len() == 1 {
                        return 0.0;
                    }
                    a = mean(members, true);
                } else {
                    b = b.min(mean(members, false));
                }
            }
            let denom = a.max(b);
            if denom > 0.0 { (b - a) / denom } else { 0.0 }
        })
        .collect()
}
