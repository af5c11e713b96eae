//! CSV reader for labelled feature tables.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::LabelledDataset;

/// Reads a labelled dataset from CSV.
///
/// Expected format: a header row, numeric feature columns, and one target
/// column holding class names (the last column unless
/// [`DatasetReader::with_target`] names another). Classes are numbered in
/// sorted name order unless [`DatasetReader::with_classes`] fixes the list.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::MissingTargetColumn`] | Named target column not in header |
/// | [`IoError::NoFeatureColumns`] | Only the target column present |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::NonFiniteValue`] | Feature cell is NaN, Inf, or unparseable |
/// | [`IoError::UnknownClass`] | Target value outside the fixed class list |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
pub struct DatasetReader {
    path: PathBuf,
    target: Option<String>,
    classes: Option<Vec<String>>,
}

impl DatasetReader {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            target: None,
            classes: None,
        }
    }

    /// Read classes from the column named `target`.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Number classes in the given order and reject any other value.
    #[must_use]
    pub fn with_classes(mut self, classes: Vec<String>) -> Self {
        self.classes = Some(classes);
        self
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<LabelledDataset, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // Flexible so that short rows surface as InconsistentRowLength.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| self.csv_error(e))?.clone();
        let expected = header.len();
        let target_col = match &self.target {
            Some(name) => header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| IoError::MissingTargetColumn {
                    path: self.path.clone(),
                    target: name.clone(),
                })?,
            None => expected.saturating_sub(1),
        };
        if expected < 2 {
            return Err(IoError::NoFeatureColumns {
                path: self.path.clone(),
            });
        }
        let feature_names: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(c, _)| *c != target_col)
            .map(|(_, h)| h.to_string())
            .collect();
        debug!(n_features = feature_names.len(), target_col, "read CSV header");

        let mut features = Vec::new();
        let mut raw_labels = Vec::new();
        for (row_index, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| self.csv_error(e))?;
            if record.len() != expected {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected,
                    got: record.len(),
                });
            }

            let mut row = Vec::with_capacity(feature_names.len());
            for (col, raw) in record.iter().enumerate() {
                if col == target_col {
                    raw_labels.push(raw.to_string());
                    continue;
                }
                let value = raw.parse::<f64>().ok().filter(|v| v.is_finite());
                let Some(value) = value else {
                    return Err(IoError::NonFiniteValue {
                        path: self.path.clone(),
                        row_index,
                        column: header.get(col).unwrap_or_default().to_string(),
                        raw: raw.to_string(),
                    });
                };
                row.push(value);
            }
            features.push(row);
        }

        if features.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        let class_names = match &self.classes {
            Some(classes) => classes.clone(),
            None => raw_labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect(),
        };
        let labels = raw_labels
            .iter()
            .enumerate()
            .map(|(row_index, raw)| {
                class_names
                    .iter()
                    .position(|c| c == raw)
                    .ok_or_else(|| IoError::UnknownClass {
                        path: self.path.clone(),
                        row_index,
                        class: raw.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            n_samples = features.len(),
            n_features = feature_names.len(),
            n_classes = class_names.len(),
            "dataset loaded"
        );
        Ok(LabelledDataset::new(feature_names, class_names, features, labels))
    }

    fn csv_error(&self, e: csv::Error) -> IoError {
        IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn reads_last_column_as_target() {
        let f = write_csv(
            "sepal_len,petal_len,species\n5.1,1.4,setosa\n7.0,4.7,versicolor\n4.9,1.4,setosa\n",
        );
        let ds = DatasetReader::new(f.path()).read().unwrap();
        assert_eq!(ds.feature_names(), &["sepal_len", "petal_len"]);
        assert_eq!(ds.class_names(), &["setosa", "versicolor"]);
        assert_eq!(ds.labels(), &[0, 1, 0]);
        assert_eq!(ds.features()[1], vec![7.0, 4.7]);
        assert_eq!(ds.n_samples(), 3);
    }

    #[test]
    fn named_target_can_be_first() {
        let f = write_csv("label,a,b\n1,0.5,0.25\n0,1.5,2.0\n");
        let ds = DatasetReader::new(f.path()).with_target("label").read().unwrap();
        assert_eq!(ds.feature_names(), &["a", "b"]);
        assert_eq!(ds.labels(), &[1, 0]);
        assert_eq!(ds.features()[0], vec![0.5, 0.25]);
    }

    #[test]
    fn fixed_class_list_rejects_strangers() {
        let f = write_csv("x,y\n1.0,cat\n2.0,emu\n");
        let err = DatasetReader::new(f.path())
            .with_classes(vec!["cat".into(), "dog".into()])
            .read()
            .unwrap_err();
        assert!(matches!(err, IoError::UnknownClass { row_index: 1, .. }), "{err}");
    }

    #[test]
    fn bad_cells_and_rows_are_reported() {
        let f = write_csv("x,y\nNaN,a\n");
        assert!(matches!(DatasetReader::new(f.path()).read(), Err(IoError::NonFiniteValue { .. })));

        let f = write_csv("x,z,y\n1.0,2.0,a\n1.0,b\n");
        assert!(matches!(
            DatasetReader::new(f.path()).read(),
            Err(IoError::InconsistentRowLength {
                row_index: 1,
                expected: 3,
                got: 2,
                ..
            })
        ));
    }

    #[test]
    fn structural_problems_are_reported() {
        let f = write_csv("x,y\n");
        assert!(matches!(DatasetReader::new(f.path()).read(), Err(IoError::EmptyDataset { .. })));

        let f = write_csv("y\na\n");
        assert!(matches!(
            DatasetReader::new(f.path()).read(),
            Err(IoError::NoFeatureColumns { .. })
        ));

        let f = write_csv("x,y\n1.0,a\n");
        assert!(matches!(
            DatasetReader::new(f.path()).with_target("species").read(),
            Err(IoError::MissingTargetColumn { .. })
        ));

        assert!(matches!(
            DatasetReader::new(Path::new("/nonexistent/iris.csv")).read(),
            Err(IoError::FileNotFound { .. })
        ));
    }
}
