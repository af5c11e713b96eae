//! End-to-end tree diversity pipeline.
//!
//! [`ModelOrchestrator`] takes a fitted forest (or trains one), extracts
//! tree graphs, computes the distance matrix through a cache, then
//! clusters, embeds, and scores the trees.

mod config;
mod error;
mod orchestrator;

pub use config::{ClusterParams, ForestParams, PipelineConfig, Preset};
pub use error::PipelineError;
pub use orchestrator::{Clustering, ModelOrchestrator, PipelineResult};
