//! Clustering, embedding, and scoring of trees from their distance matrix.
//!
//! Every routine takes a [`rafo_ged::DistanceMatrix`] as a precomputed
//! metric: DBSCAN labels trees, exact t-SNE lays them out in 2D, and
//! silhouette scores rate the labels.

mod dbscan;
mod error;
mod label;
mod silhouette;
mod tsne;

pub use dbscan::{DbscanConfig, DbscanResult};
pub use error::ClusterError;
pub use label::{ClusterAssignment, ClusterLabel};
pub use silhouette::{
    SILHOUETTE_SENTINEL, SilhouetteScores, percent_clustered, score_clustering, silhouette_samples,
    silhouette_score,
};
pub use tsne::{Embedding, TsneConfig};

use rafo_ged::DistanceMatrix;

/// Side length of `matrix`, or an error if the stored data is not square.
pub(crate) fn square_len(matrix: &DistanceMatrix) -> Result<usize, ClusterError> {
    let (rows, cols) = matrix.shape();
    if rows != cols || matrix.as_slice().len() != rows * cols {
        return Err(ClusterError::NonSquareMatrix { rows, cols });
    }
    Ok(rows)
}
