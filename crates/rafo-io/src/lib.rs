//! File I/O for the rafoview pipeline: labelled CSV datasets, the on-disk
//! distance matrix cache, and JSON/DOT result files.

mod cache;
mod domain;
mod error;
mod reader;
mod writer;

pub use cache::DiskCache;
pub use domain::{ExperimentName, LabelledDataset};
pub use error::IoError;
pub use reader::DatasetReader;
pub use writer::ResultWriter;
