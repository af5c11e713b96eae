//! Seeded train/test hold-out split.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::error::RfError;

/// Row indices of the two halves of a hold-out split.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl HoldoutSplit {
    /// Shuffle `0..n_samples` with `seed` and send the first
    /// `ceil(n_samples * test_fraction)` rows to the test side.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::InvalidTestFraction`] | `test_fraction` outside `(0, 1)` |
    /// | [`RfError::DegenerateSplit`] | either side would be empty |
    pub fn new(n_samples: usize, test_fraction: f64, seed: u64) -> Result<Self, RfError> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(RfError::InvalidTestFraction { fraction: test_fraction });
        }
        let n_test = (n_samples as f64 * test_fraction).ceil() as usize;
        if n_test == 0 || n_test >= n_samples {
            return Err(RfError::DegenerateSplit {
                n_samples,
                fraction: test_fraction,
            });
        }
        let mut order: Vec<usize> = (0..n_samples).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        let train = order.split_off(n_test);
        Ok(Self { train, test: order })
    }

    /// Copy the rows and labels of `indices` out of a dataset.
    #[must_use]
    pub fn take(
        indices: &[usize],
        features: &[Vec<f64>],
        labels: &[usize],
    ) -> (Vec<Vec<f64>>, Vec<usize>) {
        indices
            .iter()
            .map(|&i| (features[i].clone(), labels[i]))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_test_side_up() {
        let split = HoldoutSplit::new(10, 0.3, 123).unwrap();
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.train.len(), 7);

        let split = HoldoutSplit::new(150, 0.3, 123).unwrap();
        assert_eq!(split.test.len(), 45);
    }

    #[test]
    fn halves_partition_all_rows() {
        let split = HoldoutSplit::new(20, 0.25, 5).unwrap();
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn seed_controls_shuffle() {
        assert_eq!(HoldoutSplit::new(50, 0.3, 1).unwrap(), HoldoutSplit::new(50, 0.3, 1).unwrap());
        assert_ne!(HoldoutSplit::new(50, 0.3, 1).unwrap(), HoldoutSplit::new(50, 0.3, 2).unwrap());
    }

    #[test]
    fn bad_fractions_rejected() {
        assert!(matches!(HoldoutSplit::new(10, 0.0, 1), Err(RfError::InvalidTestFraction { .. })));
        assert!(matches!(HoldoutSplit::new(10, 1.0, 1), Err(RfError::InvalidTestFraction { .. })));
        assert!(matches!(HoldoutSplit::new(1, 0.3, 1), Err(RfError::DegenerateSplit { .. })));
    }

    #[test]
    fn take_copies_selected_rows() {
        let features = vec![vec![0.0], vec![1.0], vec![2.0]];
        let (rows, labels) = HoldoutSplit::take(&[2, 0], &features, &[7, 8, 9]);
        assert_eq!(rows, vec![vec![2.0], vec![0.0]]);
        assert_eq!(labels, vec![9, 7]);
    }
}
