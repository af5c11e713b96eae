//! JSON and DOT writers for pipeline outputs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rafo_cluster::ClusterLabel;
use rafo_ged::{DistanceMatrix, TreeGraph};
use rafo_pipeline::{Clustering, PipelineResult};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::ExperimentName;

/// Writes pipeline results under one output directory.
///
/// Creates the output directory on construction if it does not exist.
/// Files are prefixed with the experiment name: `{experiment}_trees.json`,
/// `{experiment}_distance.json`, and `{experiment}_tree{index}.dot`.
pub struct ResultWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ResultWriter {
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    #[must_use]
    pub fn trees_path(&self) -> PathBuf {
        self.file(&format!("{}_trees.json", self.experiment))
    }

    #[must_use]
    pub fn distance_path(&self) -> PathBuf {
        self.file(&format!("{}_distance.json", self.experiment))
    }

    /// Write the per-tree table of a full run to `{experiment}_trees.json`.
    ///
    /// # Errors
    ///
    /// [`IoError::Serialize`] or [`IoError::WriteFile`].
    #[instrument(skip_all)]
    pub fn write_run(&self, result: &PipelineResult) -> Result<PathBuf, IoError> {
        let mut artifact = TreesArtifact::new(self.experiment.as_str(), result.clustering());
        artifact.distance_matrix_seconds = Some(result.matrix_elapsed().as_secs_f64());
        artifact.matrix_from_cache = Some(result.matrix_from_cache());
        artifact.n_undefined = Some(result.n_undefined());
        for (entry, profile) in artifact.trees.iter_mut().zip(result.profiles()) {
            entry.n_leaves = Some(profile.n_leaves);
            entry.depth = Some(profile.depth);
            entry.accuracy = Some(profile.accuracy);
            let importances = profile.importances.iter().map(|(name, v)| (name.as_str(), *v));
            entry.importances = Some(importances.collect());
        }
        let path = self.trees_path();
        write_json(&path, &artifact)?;
        info!(path = %path.display(), n_trees = artifact.n_trees, "tree table written");
        Ok(path)
    }

    /// Write the per-tree table of a reclustering, which carries no tree
    /// profiles, to `{experiment}_trees.json`.
    ///
    /// # Errors
    ///
    /// [`IoError::Serialize`] or [`IoError::WriteFile`].
    #[instrument(skip_all)]
    pub fn write_clustering(&self, clustering: &Clustering) -> Result<PathBuf, IoError> {
        let artifact = TreesArtifact::new(self.experiment.as_str(), clustering);
        let path = self.trees_path();
        write_json(&path, &artifact)?;
        info!(path = %path.display(), n_trees = artifact.n_trees, "tree table written");
        Ok(path)
    }

    /// Write the matrix rows to `{experiment}_distance.json`.
    ///
    /// # Errors
    ///
    /// [`IoError::Serialize`] or [`IoError::WriteFile`].
    #[instrument(skip_all, fields(n_trees = matrix.len()))]
    pub fn write_distance(&self, matrix: &DistanceMatrix) -> Result<PathBuf, IoError> {
        let artifact = DistanceArtifact {
            experiment: self.experiment.as_str(),
            n_trees: matrix.len(),
            rows: matrix.rows().collect(),
        };
        let path = self.distance_path();
        write_json(&path, &artifact)?;
        info!(path = %path.display(), "distance matrix written");
        Ok(path)
    }

    /// Write one tree as Graphviz DOT to `{experiment}_tree{index}.dot`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    pub fn write_dot(&self, index: usize, graph: &TreeGraph) -> Result<PathBuf, IoError> {
        let path = self.file(&format!("{}_tree{index}.dot", self.experiment));
        fs::write(&path, graph.to_dot()).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), n_nodes = graph.n_nodes(), "tree graph written");
        Ok(path)
    }

    fn file(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| IoError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, json).map_err(|e| IoError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Serialization shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TreesArtifact<'a> {
    experiment: &'a str,
    n_trees: usize,
    n_clusters: usize,
    n_noise: usize,
    cluster_silhouette: f64,
    percent_clustered: f64,
    eps: f64,
    min_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_matrix_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matrix_from_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_undefined: Option<usize>,
    trees: Vec<TreeEntry<'a>>,
}

impl<'a> TreesArtifact<'a> {
    fn new(experiment: &'a str, clustering: &Clustering) -> Self {
        let assignment = clustering.assignment();
        let scores = clustering.scores();
        let trees = assignment
            .labels()
            .iter()
            .enumerate()
            .map(|(index, &cluster)| {
                let (x, y) = clustering.embedding().point(index).unwrap_or((0.0, 0.0));
                TreeEntry {
                    index,
                    cluster,
                    x,
                    y,
                    silhouette: scores.per_tree.get(index).copied().unwrap_or(-1.0),
                    n_leaves: None,
                    depth: None,
                    accuracy: None,
                    importances: None,
                }
            })
            .collect();
        Self {
            experiment,
            n_trees: assignment.len(),
            n_clusters: assignment.n_clusters(),
            n_noise: assignment.noise_count(),
            cluster_silhouette: scores.cluster_score,
            percent_clustered: scores.percent_clustered,
            eps: clustering.params().dbscan.eps(),
            min_samples: clustering.params().dbscan.min_samples(),
            distance_matrix_seconds: None,
            matrix_from_cache: None,
            n_undefined: None,
            trees,
        }
    }
}

#[derive(Serialize)]
struct TreeEntry<'a> {
    index: usize,
    cluster: ClusterLabel,
    x: f64,
    y: f64,
    silhouette: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_leaves: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    importances: Option<BTreeMap<&'a str, f64>>,
}

#[derive(Serialize)]
struct DistanceArtifact<'a> {
    experiment: &'a str,
    n_trees: usize,
    rows: Vec<&'a [f64]>,
}

#[cfg(test)]
mod tests {
    use rafo_cluster::{DbscanConfig, TsneConfig};
    use rafo_pipeline::ClusterParams;
    use tempfile::TempDir;

    use super::*;

    fn two_pairs() -> DistanceMatrix {
        DistanceMatrix::from_rows(vec![
            vec![0.0, 0.0, 1.0, 1.0],
            vec![0.0, 0.0, 1.0, 1.0],
            vec![1.0, 1.0, 0.0, 0.0],
            vec![1.0, 1.0, 0.0, 0.0],
        ])
        .unwrap()
    }

    fn writer(dir: &TempDir, name: &str) -> ResultWriter {
        ResultWriter::new(&dir.path().join("out"), ExperimentName::new(name).unwrap()).unwrap()
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn clustering_table_lists_every_tree() {
        let dir = TempDir::new().unwrap();
        let params = ClusterParams {
            dbscan: DbscanConfig::new(0.5, 2).unwrap(),
            tsne: TsneConfig::new().with_n_iter(300),
        };
        let clustering = Clustering::compute(&two_pairs(), params).unwrap();
        let path = writer(&dir, "toy").write_clustering(&clustering).unwrap();
        assert!(path.ends_with("toy_trees.json"));

        let content = read(&path);
        assert_eq!(content["experiment"], "toy");
        assert_eq!(content["n_trees"], 4);
        assert_eq!(content["n_clusters"], 2);
        assert_eq!(content["percent_clustered"], 100.0);
        assert!(content.get("distance_matrix_seconds").is_none());
        let trees = content["trees"].as_array().unwrap();
        assert_eq!(trees.len(), 4);
        assert_eq!(trees[2]["cluster"], 1);
        assert!(trees[0]["x"].is_number());
        assert!(trees[0].get("n_leaves").is_none());
    }

    #[test]
    fn noise_is_written_as_word() {
        let dir = TempDir::new().unwrap();
        let params = ClusterParams {
            dbscan: DbscanConfig::new(0.5, 3).unwrap(),
            tsne: TsneConfig::new().with_n_iter(300),
        };
        let clustering = Clustering::compute(&two_pairs(), params).unwrap();
        let content = read(&writer(&dir, "noisy").write_clustering(&clustering).unwrap());
        assert_eq!(content["trees"][0]["cluster"], "Noise");
        assert_eq!(content["trees"][0]["silhouette"], -1.0);
        assert_eq!(content["percent_clustered"], 0.0);
    }

    #[test]
    fn distance_rows_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = writer(&dir, "dist").write_distance(&two_pairs()).unwrap();
        let content = read(&path);
        let rows: Vec<Vec<f64>> = serde_json::from_value(content["rows"].clone()).unwrap();
        assert_eq!(rows, two_pairs().to_rows());
    }
}
