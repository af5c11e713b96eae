use std::fmt;

/// Zero-based feature column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    /// Wrap a zero-based column position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a node inside a tree's `Vec<Node>` arena. The root is always 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Index of the root node of every fitted tree.
    pub const ROOT: NodeIndex = NodeIndex(0);

    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node impurity under whichever criterion grew the tree.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Impurity(f64);

impl Impurity {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Impurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// One node of a decision tree arena.
///
/// Both variants keep the per-class sample histogram of the training rows
/// that reached the node, so the tree can be rendered and compared
/// structurally without the training data.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    Split {
        /// Feature tested at this node.
        feature: FeatureIndex,
        /// Samples with `feature <= threshold` go left.
        threshold: f64,
        left: NodeIndex,
        right: NodeIndex,
        impurity: Impurity,
        /// Training rows per class that reached this node.
        class_counts: Vec<usize>,
        /// Weighted impurity decrease of the split (MDI numerator).
        impurity_decrease: f64,
    },
    Leaf {
        /// Majority class; ties go to the lowest class index.
        prediction: usize,
        impurity: Impurity,
        class_counts: Vec<usize>,
    },
}

impl Node {
    #[must_use]
    pub fn impurity(&self) -> Impurity {
        match self {
            Node::Split { impurity, .. } | Node::Leaf { impurity, .. } => *impurity,
        }
    }

    /// Per-class training sample histogram.
    #[must_use]
    pub fn class_counts(&self) -> &[usize] {
        match self {
            Node::Split { class_counts, .. } | Node::Leaf { class_counts, .. } => class_counts,
        }
    }

    /// Number of training rows that reached this node.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.class_counts().iter().sum()
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// `(left, right)` children of a split, `None` for a leaf.
    #[must_use]
    pub fn children(&self) -> Option<(NodeIndex, NodeIndex)> {
        match self {
            Node::Split { left, right, .. } => Some((*left, *right)),
            Node::Leaf { .. } => None,
        }
    }
}

/// Index of the largest count; the first one wins on ties.
pub(crate) fn majority_class(class_counts: &[usize]) -> usize {
    let mut best = 0;
    for (class, &count) in class_counts.iter().enumerate() {
        if count > class_counts[best] {
            best = class;
        }
    }
    best
}
