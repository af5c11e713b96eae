//! Random forest classification with trees whose structure stays
//! inspectable: every node keeps its per-class training histogram.

mod config;
mod confusion;
mod error;
mod forest;
mod holdout;
mod node;
mod profile;
mod split;
mod tree;

pub use config::{MaxFeatures, RandomForestConfig};
pub use confusion::{ClassMetrics, ConfusionMatrix};
pub use error::RfError;
pub use forest::RandomForest;
pub use holdout::HoldoutSplit;
pub use node::{FeatureIndex, Impurity, Node, NodeIndex};
pub use profile::TreeProfile;
pub use split::SplitCriterion;
pub use tree::{DecisionTree, DecisionTreeConfig};
