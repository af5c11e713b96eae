//! I/O error types for rafo-io.

use std::path::PathBuf;

/// Errors from dataset reading, matrix persistence, and result writing.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("CSV parse error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when the CSV file has a header but no data rows.
    #[error("empty dataset (no data rows) in {path}")]
    EmptyDataset {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when the header names no column besides the target.
    #[error("no feature columns in {path}")]
    NoFeatureColumns {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when the requested target column is not in the header.
    #[error("target column \"{target}\" not found in {path}")]
    MissingTargetColumn {
        /// Path to the CSV file.
        path: PathBuf,
        /// Requested column name.
        target: String,
    },

    /// Returned when a data row has a different number of columns than the header.
    #[error(
        "inconsistent row length in {path}: row {row_index} has {got} columns, expected {expected}"
    )]
    InconsistentRowLength {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Expected number of columns (from header).
        expected: usize,
        /// Actual number of columns in this row.
        got: usize,
    },

    /// Returned when a feature cell is NaN, Inf, or not a float.
    #[error(
        "non-finite value in {path}: row {row_index}, column \"{column}\", raw value \"{raw}\""
    )]
    NonFiniteValue {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Header name of the offending column.
        column: String,
        /// The raw string value that failed to parse.
        raw: String,
    },

    /// Returned when a target value is outside a fixed class list.
    #[error("unknown class \"{class}\" in {path} at row {row_index}")]
    UnknownClass {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// The unexpected class name.
        class: String,
    },

    /// Returned when a cached matrix file cannot be read.
    #[error("cannot read cached matrix {path}")]
    CacheRead {
        /// Path of the cache file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a cached matrix file does not decode.
    #[error("corrupt cached matrix {path}")]
    CacheDecode {
        /// Path of the cache file.
        path: PathBuf,
        /// Underlying bincode error.
        source: bincode::Error,
    },

    /// Returned when a cached matrix was written by an incompatible format version.
    #[error("cached matrix {path} has format {found}, expected {expected}")]
    CacheVersion {
        /// Path of the cache file.
        path: PathBuf,
        /// Version found in the file.
        found: String,
        /// Version this build writes.
        expected: String,
    },

    /// Returned when a cache key's dataset name cannot form a file name.
    #[error("invalid dataset name \"{dataset}\" for the matrix cache: must match [a-zA-Z0-9_-]+")]
    InvalidCacheKey {
        /// The rejected dataset name.
        dataset: String,
    },

    #[error("cannot encode matrix for {path}")]
    CacheEncode {
        path: PathBuf,
        source: bincode::Error,
    },

    /// Returned when the experiment name contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid experiment name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidExperimentName {
        /// The invalid name.
        name: String,
    },

    /// Returned when the output directory cannot be created.
    #[error("cannot create output directory {path}")]
    OutputDirCreate {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a result file cannot be serialised.
    #[error("cannot serialise {path}")]
    Serialize {
        /// Destination path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when a result file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
