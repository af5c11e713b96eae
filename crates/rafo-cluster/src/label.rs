use std::collections::BTreeMap;
use std::fmt;

/// Cluster membership of one tree.
///
/// Noise sorts before every cluster and renders as `"Noise"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterLabel {
    Noise,
    Cluster(usize),
}

impl ClusterLabel {
    #[must_use]
    pub fn is_noise(self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    /// Zero-based cluster id, or `None` for noise.
    #[must_use]
    pub fn cluster_id(self) -> Option<usize> {
        match self {
            ClusterLabel::Noise => None,
            ClusterLabel::Cluster(id) => Some(id),
        }
    }

    /// Numeric code with `-1` for noise.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            ClusterLabel::Noise => -1,
            ClusterLabel::Cluster(id) => id as i64,
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Noise => f.write_str("Noise"),
            ClusterLabel::Cluster(id) => write!(f, "{id}"),
        }
    }
}

// Noise is the string "Noise", clusters are bare integers.
impl serde::Serialize for ClusterLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClusterLabel::Noise => serializer.serialize_str("Noise"),
            ClusterLabel::Cluster(id) => serializer.serialize_u64(*id as u64),
        }
    }
}

/// Tree index to cluster label mapping.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
#[serde(transparent)]
pub struct ClusterAssignment {
    labels: Vec<ClusterLabel>,
}

impl ClusterAssignment {
    #[must_use]
    pub fn new(labels: Vec<ClusterLabel>) -> Self {
        Self { labels }
    }

    #[must_use]
    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    #[must_use]
    pub fn get(&self, tree: usize) -> Option<ClusterLabel> {
        self.labels.get(tree).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct non-noise clusters.
    #[must_use]
    pub fn n_clusters(&self) -> usize {
        self.cluster_sizes().len()
    }

    #[must_use]
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_noise()).count()
    }

    /// Indices of the trees carrying `label`, ascending.
    #[must_use]
    pub fn members(&self, label: ClusterLabel) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == label)
            .map(|(i, _)| i)
            .collect()
    }

    /// Size of every non-noise cluster, keyed by cluster id.
    #[must_use]
    pub fn cluster_sizes(&self) -> BTreeMap<usize, usize> {
        let mut sizes = BTreeMap::new();
        for id in self.labels.iter().filter_map(|l| l.cluster_id()) {
            *sizes.entry(id).or_insert(0) += 1;
        }
        sizes
    }

    /// Distinct labels in ascending order, noise first when present.
    #[must_use]
    pub fn distinct(&self) -> Vec<ClusterLabel> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}
