//! Confusion matrix and per-class classification metrics.

use std::fmt;

use crate::error::RfError;

/// `rows[true][predicted]` counts for a multi-class classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    rows: Vec<Vec<usize>>,
}

/// Precision, recall, and F1 for one class.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClassMetrics {
    pub class: usize,
    /// `TP / (TP + FP)`, 0 when the class is never predicted.
    pub precision: f64,
    /// `TP / (TP + FN)`, 0 when the class never occurs.
    pub recall: f64,
    pub f1: f64,
    /// Number of true samples of this class.
    pub support: usize,
}

impl ConfusionMatrix {
    /// Tally true against predicted labels. Labels at or above `n_classes`
    /// grow the matrix.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | no labels |
    /// | [`RfError::LabelCountMismatch`] | the two slices differ in length |
    pub fn from_labels(
        truth: &[usize],
        predicted: &[usize],
        n_classes: usize,
    ) -> Result<Self, RfError> {
        if truth.is_empty() {
            return Err(RfError::EmptyDataset);
        }
        if truth.len() != predicted.len() {
            return Err(RfError::LabelCountMismatch {
                n_samples: truth.len(),
                n_labels: predicted.len(),
            });
        }
        let seen = truth.iter().chain(predicted).max().map_or(0, |&m| m + 1);
        let k = n_classes.max(seen);
        let mut rows = vec![vec![0usize; k]; k];
        for (&t, &p) in truth.iter().zip(predicted) {
            rows[t][p] += 1;
        }
        Ok(Self { rows })
    }

    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.rows
    }

    /// Fraction of samples on the diagonal.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.n_classes()).map(|i| self.rows[i][i]).sum();
        let total: usize = self.rows.iter().flatten().sum();
        if total == 0 { 0.0 } else { correct as f64 / total as f64 }
    }

    #[must_use]
    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        let k = self.n_classes();
        (0..k)
            .map(|c| {
                let tp = self.rows[c][c];
                let predicted: usize = (0..k).map(|i| self.rows[i][c]).sum();
                let support: usize = self.rows[c].iter().sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                ClassMetrics {
                    class: c,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.n_classes() {
            write!(f, " pred_{j:>3}")?;
        }
        writeln!(f)?;
        for (i, row) in self.rows.iter().enumerate() {
            write!(f, "true_{i:>3}")?;
            for val in row {
                write!(f, " {val:>7}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
