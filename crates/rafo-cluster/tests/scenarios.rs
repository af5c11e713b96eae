//! End-to-end scenarios from hand-built tree graphs to scores.

use rafo_cluster::{ClusterLabel, DbscanConfig, TsneConfig, score_clustering};
use rafo_ged::{DistanceMatrixEngine, TreeGraph};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LEAF_A: &str = r"gini = 0.000\nsamples = 5\nvalue = [5, 0]";
const LEAF_B: &str = r"gini = 0.000\nsamples = 5\nvalue = [0, 5]";

fn stump(feature: &str) -> TreeGraph {
    let root = format!(r"{feature} <= 0.500\ngini = 0.500\nsamples = 10\nvalue = [5, 5]");
    TreeGraph::from_texts(0, &[root.as_str(), LEAF_A, LEAF_B], &[(0, 1), (0, 2)]).unwrap()
}

// ---------------------------------------------------------------------------
// Two structurally distinct pairs
// ---------------------------------------------------------------------------

#[test]
fn two_pairs_cluster_apart_with_no_noise() {
    let graphs = vec![
        stump("petal_len"),
        stump("petal_len"),
        stump("sepal_wid"),
        stump("sepal_wid"),
    ];
    let matrix = DistanceMatrixEngine::default().compute(&graphs).unwrap().matrix;

    let result = DbscanConfig::new(0.5, 2).unwrap().fit(&matrix).unwrap();
    let assignment = result.assignment();
    assert_eq!(assignment.members(ClusterLabel::Cluster(0)), vec![0, 1]);
    assert_eq!(assignment.members(ClusterLabel::Cluster(1)), vec![2, 3]);

    let scores = score_clustering(&matrix, assignment).unwrap();
    assert_eq!(scores.percent_clustered, 100.0);
    assert_eq!(scores.cluster_score, 1.0);

    let embedding = TsneConfig::new().embed(&matrix).unwrap();
    assert_eq!(embedding.len(), 4);
}

#[test]
fn default_radius_leaves_distinct_trees_as_noise() {
    let graphs = vec![stump("a"), stump("b"), stump("c")];
    let matrix = DistanceMatrixEngine::default().compute(&graphs).unwrap().matrix;

    let result = DbscanConfig::default().fit(&matrix).unwrap();
    assert_eq!(result.assignment().noise_count(), 3);

    let scores = score_clustering(&matrix, result.assignment()).unwrap();
    assert!(scores.per_tree.iter().all(|s| *s == -1.0));
    assert_eq!(scores.cluster_score, -1.0);
    assert_eq!(scores.percent_clustered, 0.0);
}

// ---------------------------------------------------------------------------
// One tree
// ---------------------------------------------------------------------------

#[test]
fn single_tree_runs_without_crashing() {
    let matrix = DistanceMatrixEngine::default().compute(&[stump("a")]).unwrap().matrix;
    let result = DbscanConfig::default().fit(&matrix).unwrap();
    assert_eq!(result.assignment().labels(), &[ClusterLabel::Noise]);

    let scores = score_clustering(&matrix, result.assignment()).unwrap();
    assert_eq!(scores.per_tree, vec![-1.0]);
    assert_eq!(scores.percent_clustered, 0.0);

    let embedding = TsneConfig::new().embed(&matrix).unwrap();
    assert_eq!(embedding.point(0), Some((0.0, 0.0)));
}
