//! Domain types for rafo-io.

use std::fmt;

use crate::IoError;

/// Non-empty and within `[a-zA-Z0-9_-]`, so safe inside a file name.
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A validated experiment name used as the output file prefix.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, IoError> {
        let name = name.into();
        if !is_plain_name(&name) {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A labelled feature table.
///
/// `features[i]` carries class `labels[i]`, an index into `class_names`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledDataset {
    feature_names: Vec<String>,
    class_names: Vec<String>,
    features: Vec<Vec<f64>>,
    labels: Vec<usize>,
}

impl LabelledDataset {
    pub(crate) fn new(
        feature_names: Vec<String>,
        class_names: Vec<String>,
        features: Vec<Vec<f64>>,
        labels: Vec<usize>,
    ) -> Self {
        Self {
            feature_names,
            class_names,
            features,
            labels,
        }
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Class names in label order.
    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    #[must_use]
    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_name_valid() {
        let name = ExperimentName::new("iris-100_trees").unwrap();
        assert_eq!(name.as_str(), "iris-100_trees");
        assert_eq!(name.to_string(), "iris-100_trees");
    }

    #[test]
    fn experiment_name_rejects_empty_and_special_chars() {
        assert!(matches!(ExperimentName::new(""), Err(IoError::InvalidExperimentName { .. })));
        assert!(matches!(
            ExperimentName::new("../escape"),
            Err(IoError::InvalidExperimentName { .. })
        ));
    }
}
