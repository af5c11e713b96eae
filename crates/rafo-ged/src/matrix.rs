//! All-pairs distance matrix: parallel computation, NaN repair, and
//! min-max normalisation.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, MatrixCache};
use crate::error::GedError;
use crate::ged::{GedConfig, GraphEditDistance};
use crate::graph::TreeGraph;

/// Square distance matrix stored row-major.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    /// Build from nested rows.
    ///
    /// # Errors
    ///
    /// Returns [`GedError::ShapeMismatch`] unless every row has one entry per row.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, GedError> {
        let n = rows.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != n) {
            return Err(GedError::ShapeMismatch {
                expected: (n, n),
                got: (n, bad.len()),
            });
        }
        Ok(Self {
            n,
            data: rows.into_iter().flatten().collect(),
        })
    }

    /// Number of rows (and columns).
    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// `(rows, columns)`, derived from the stored data.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        let cols = if self.n == 0 { 0 } else { self.data.len() / self.n };
        (self.n, cols)
    }

    /// # Panics
    ///
    /// Panics if `i` or `j` is out of bounds.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(
            i < self.n && j < self.n,
            "index ({i}, {j}) out of bounds for {} trees",
            self.n
        );
        self.data[i * self.n + j]
    }

    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks(self.n.max(1))
    }

    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(<[f64]>::to_vec).collect()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Check that the matrix is `n_trees x n_trees`.
    ///
    /// # Errors
    ///
    /// Returns [`GedError::ShapeMismatch`] otherwise.
    pub fn check_shape(&self, n_trees: usize) -> Result<(), GedError> {
        let got = self.shape();
        if got != (n_trees, n_trees) || self.data.len() != n_trees * n_trees {
            return Err(GedError::ShapeMismatch {
                expected: (n_trees, n_trees),
                got,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        (0..self.n)
            .all(|i| (i + 1..self.n).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tolerance))
    }

    /// Off-diagonal cells holding `NaN`, counting both triangles.
    #[must_use]
    pub fn nan_count(&self) -> usize {
        self.off_diagonal().filter(|v| v.is_nan()).count()
    }

    fn off_diagonal(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.n;
        self.data
            .iter()
            .enumerate()
            .filter(move |(k, _)| k / n != k % n)
            .map(|(_, v)| *v)
    }

    /// Replace every `NaN` with a substitute derived from the largest finite
    /// entry. Returns how many cells were replaced.
    ///
    /// # Errors
    ///
    /// Returns [`GedError::DegenerateMatrix`] when every off-diagonal cell
    /// of a matrix with at least two rows is `NaN`.
    pub fn repair_nan(&mut self, substitute: NanSubstitute) -> Result<usize, GedError> {
        let n_nan = self.nan_count();
        if n_nan == 0 {
            return Ok(0);
        }
        if n_nan == self.n * (self.n - 1) {
            return Err(GedError::DegenerateMatrix {
                n_trees: self.n,
                n_nan,
            });
        }
        let max = self
            .data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0f64, f64::max);
        let fill = substitute.value(max);
        for (k, v) in self.data.iter_mut().enumerate() {
            if v.is_nan() {
                *v = if k / self.n == k % self.n { 0.0 } else { fill };
            }
        }
        Ok(n_nan)
    }

    /// Min-max scale every entry into `[0, 1]` using the range of the whole
    /// matrix. A constant matrix becomes all zeros. The diagonal is zero.
    pub fn normalize(&mut self) {
        let (min, max) = self
            .data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        for v in &mut self.data {
            *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
        }
        for i in 0..self.n {
            self.data[i * self.n + i] = 0.0;
        }
    }
}

/// Value written over pairs whose distance is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub enum NanSubstitute {
    /// Square of the largest finite distance.
    #[default]
    SquaredMax,
    /// The largest finite distance.
    Max,
    Constant(f64),
}

impl NanSubstitute {
    #[must_use]
    pub fn value(self, max_finite: f64) -> f64 {
        match self {
            NanSubstitute::SquaredMax => max_finite * max_finite,
            NanSubstitute::Max => max_finite,
            NanSubstitute::Constant(c) => c,
        }
    }
}

/// Configuration for [`DistanceMatrixEngine`].
///
/// # Defaults
///
/// | Parameter        | Default                   |
/// |------------------|---------------------------|
/// | `ged`            | [`GedConfig::default`]    |
/// | `nan_substitute` | `SquaredMax`              |
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatrixConfig {
    ged: GedConfig,
    nan_substitute: NanSubstitute,
}

impl MatrixConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ged(mut self, ged: GedConfig) -> Self {
        self.ged = ged;
        self
    }

    #[must_use]
    pub fn with_nan_substitute(mut self, nan_substitute: NanSubstitute) -> Self {
        self.nan_substitute = nan_substitute;
        self
    }

    #[must_use]
    pub fn ged(&self) -> &GedConfig {
        &self.ged
    }

    #[must_use]
    pub fn nan_substitute(&self) -> NanSubstitute {
        self.nan_substitute
    }
}

/// A normalised matrix and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRun {
    pub matrix: DistanceMatrix,
    /// Off-diagonal cells that timed out and were repaired.
    pub n_undefined: usize,
    /// Wall time spent computing; zero for a cache hit.
    pub elapsed: Duration,
    pub from_cache: bool,
}

/// Computes the normalised all-pairs distance matrix of a list of trees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DistanceMatrixEngine {
    config: MatrixConfig,
}

impl DistanceMatrixEngine {
    #[must_use]
    pub fn new(config: MatrixConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }

    /// Compute, repair, and normalise the matrix.
    ///
    /// Each row `i` computes distances to trees `j > i` in parallel; the
    /// upper triangle is mirrored into the lower one. Timed-out pairs are
    /// repaired per [`NanSubstitute`], with a warning when more cells are
    /// undefined than there are trees.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GedError::EmptyEnsemble`] | `graphs` is empty |
    /// | [`GedError::DegenerateMatrix`] | every pair timed out |
    /// | [`GedError::ShapeMismatch`] | the assembled matrix is not `n x n` |
    #[instrument(skip_all, fields(n_trees = graphs.len()))]
    pub fn compute(&self, graphs: &[TreeGraph]) -> Result<MatrixRun, GedError> {
        let n = graphs.len();
        if n == 0 {
            return Err(GedError::EmptyEnsemble);
        }
        let start = Instant::now();
        let ged = GraphEditDistance::new(self.config.ged);

        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let tail: Vec<f64> = (i + 1..n)
                    .into_par_iter()
                    .map(|j| ged.distance(&graphs[i], &graphs[j]))
                    .collect();
                debug!(row = i, n_pairs = tail.len(), "distance row computed");
                tail
            })
            .collect();

        let mut matrix = assemble(&upper)?;
        let n_undefined = self.finish(&mut matrix)?;
        matrix.check_shape(n)?;

        let elapsed = start.elapsed();
        info!(
            n_trees = n,
            n_undefined,
            elapsed_ms = elapsed.as_millis() as u64,
            "distance matrix computed"
        );
        Ok(MatrixRun {
            matrix,
            n_undefined,
            elapsed,
            from_cache: false,
        })
    }

    /// Repair and normalise an assembled matrix, returning how many
    /// off-diagonal cells were undefined. More undefined cells than trees
    /// is logged as a warning.
    fn finish(&self, matrix: &mut DistanceMatrix) -> Result<usize, GedError> {
        let n_undefined = matrix.nan_count();
        if n_undefined > matrix.len() {
            warn!(
                n_undefined,
                n_trees = matrix.len(),
                timeout_ms = self.config.ged.timeout().as_millis() as u64,
                "many pairs timed out; consider raising the per-pair timeout"
            );
        }
        matrix.repair_nan(self.config.nan_substitute)?;
        matrix.normalize();
        Ok(n_undefined)
    }

    /// Like [`DistanceMatrixEngine::compute`], but reuse a cached matrix
    /// stored under `key` and store a freshly computed one.
    ///
    /// # Errors
    ///
    /// Everything [`DistanceMatrixEngine::compute`] returns, plus
    /// [`GedError::Cache`] when the backend fails and
    /// [`GedError::ShapeMismatch`] when a cached matrix does not fit `graphs`.
    pub fn compute_cached(
        &self,
        graphs: &[TreeGraph],
        key: &CacheKey,
        cache: &mut dyn MatrixCache,
    ) -> Result<MatrixRun, GedError> {
        let cached = cache.get(key).map_err(|source| GedError::Cache {
            key: key.clone(),
            source,
        })?;
        if let Some(matrix) = cached {
            matrix.check_shape(graphs.len())?;
            info!(%key, "distance matrix loaded from cache");
            return Ok(MatrixRun {
                matrix,
                n_undefined: 0,
                elapsed: Duration::ZERO,
                from_cache: true,
            });
        }

        let run = self.compute(graphs)?;
        cache.put(key, &run.matrix).map_err(|source| GedError::Cache {
            key: key.clone(),
            source,
        })?;
        debug!(%key, "distance matrix stored in cache");
        Ok(run)
    }
}

/// Combine per-row upper-triangle results into the full matrix as
/// `U + Uᵀ - diag(U)`. Row `i` of `upper` holds distances to trees `i+1..n`.
fn assemble(upper: &[Vec<f64>]) -> Result<DistanceMatrix, GedError> {
    let n = upper.len();
    let mut u = vec![0.0f64; n * n];
    for (i, tail) in upper.iter().enumerate() {
        if tail.len() != n - i - 1 {
            return Err(GedError::ShapeMismatch {
                expected: (n, n),
                got: (n, i + 1 + tail.len()),
            });
        }
        u[i * n + i + 1..(i + 1) * n].copy_from_slice(tail);
    }
    let mut data = vec![0.0f64; n * n];
    for i in 0..n {
        for j in 0..n {
            let diag = if i == j { u[i * n + i] } else { 0.0 };
            data[i * n + j] = u[i * n + j] + u[j * n + i] - diag;
        }
    }
    Ok(DistanceMatrix { n, data })
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::cache::MemoryCache;

    fn split(feature: &str) -> String {
        format!(r"{feature} <= 1.000\ngini = 0.500\nsamples = 10\nvalue = [5, 5]")
    }

    const LEAF0: &str = r"gini = 0.000\nsamples = 5\nvalue = [5, 0]";
    const LEAF1: &str = r"gini = 0.000\nsamples = 5\nvalue = [0, 5]";

    fn stump(feature: &str) -> TreeGraph {
        let labels = [split(feature), LEAF0.to_string(), LEAF1.to_string()];
        TreeGraph::from_texts(0, &labels, &[(0, 1), (0, 2)]).unwrap()
    }

    fn two_pairs() -> Vec<TreeGraph> {
        vec![stump("x"), stump("x"), stump("y"), stump("y")]
    }

    #[test]
    fn two_identical_pairs_normalise_to_zero_and_one() {
        let run = DistanceMatrixEngine::default().compute(&two_pairs()).unwrap();
        let m = &run.matrix;

        assert_eq!(m.shape(), (4, 4));
        assert_eq!(m.get(0, 1), 0.0);
        assert_eq!(m.get(2, 3), 0.0);
        for (i, j) in [(0, 2), (0, 3), (1, 2), (1, 3)] {
            assert_eq!(m.get(i, j), 1.0, "D[{i}][{j}]");
        }
        assert!(m.is_symmetric(0.0));
        assert!((0..4).all(|i| m.get(i, i) == 0.0));
        assert_eq!(run.n_undefined, 0);
        assert!(!run.from_cache);
    }

    #[test]
    fn single_tree_gives_one_by_one_zero() {
        let run = DistanceMatrixEngine::default().compute(&[stump("x")]).unwrap();
        assert_eq!(run.matrix, DistanceMatrix::zeros(1));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            DistanceMatrixEngine::default().compute(&[]),
            Err(GedError::EmptyEnsemble)
        ));
    }

    #[test]
    fn all_identical_trees_give_zero_matrix() {
        let graphs = vec![stump("x"); 3];
        let run = DistanceMatrixEngine::default().compute(&graphs).unwrap();
        assert_eq!(run.matrix, DistanceMatrix::zeros(3));
    }

    #[test]
    fn every_pair_timing_out_is_degenerate() {
        let engine = DistanceMatrixEngine::new(
            MatrixConfig::new().with_ged(GedConfig::new().with_timeout(Duration::ZERO)),
        );
        let err = engine.compute(&two_pairs()).unwrap_err();
        assert!(matches!(err, GedError::DegenerateMatrix { n_trees: 4, n_nan: 12 }), "{err}");
    }

    #[test]
    fn repair_uses_squared_max_by_default() {
        let mut m = DistanceMatrix::from_rows(vec![
            vec![0.0, 3.0, f64::NAN],
            vec![3.0, 0.0, 2.0],
            vec![f64::NAN, 2.0, 0.0],
        ])
        .unwrap();
        assert_eq!(m.repair_nan(NanSubstitute::default()).unwrap(), 2);
        assert_eq!(m.get(0, 2), 9.0);
        assert_eq!(m.get(2, 0), 9.0);
    }

    #[test]
    fn repair_substitutes_are_tunable() {
        let rows = vec![
            vec![0.0, 4.0, f64::NAN],
            vec![4.0, 0.0, 1.0],
            vec![f64::NAN, 1.0, 0.0],
        ];
        let mut max = DistanceMatrix::from_rows(rows.clone()).unwrap();
        max.repair_nan(NanSubstitute::Max).unwrap();
        assert_eq!(max.get(0, 2), 4.0);

        let mut constant = DistanceMatrix::from_rows(rows).unwrap();
        constant.repair_nan(NanSubstitute::Constant(7.5)).unwrap();
        assert_eq!(constant.get(2, 0), 7.5);
    }

    #[test]
    fn fully_undefined_matrix_cannot_be_repaired() {
        let rows = vec![vec![0.0, f64::NAN], vec![f64::NAN, 0.0]];
        let mut m = DistanceMatrix::from_rows(rows).unwrap();
        assert!(matches!(
            m.repair_nan(NanSubstitute::SquaredMax),
            Err(GedError::DegenerateMatrix { n_trees: 2, n_nan: 2 })
        ));
    }

    /// Collects everything a `fmt` subscriber writes.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `finish` on `rows` and return the undefined count and the log.
    fn finish_logged(rows: Vec<Vec<f64>>) -> (usize, DistanceMatrix, String) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let mut m = DistanceMatrix::from_rows(rows).unwrap();
        let n_undefined = tracing::subscriber::with_default(subscriber, || {
            DistanceMatrixEngine::default().finish(&mut m).unwrap()
        });
        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        (n_undefined, m, log)
    }

    #[test]
    fn more_undefined_cells_than_trees_is_a_warning() {
        let (n_undefined, m, log) = finish_logged(vec![
            vec![0.0, f64::NAN, f64::NAN],
            vec![f64::NAN, 0.0, 2.0],
            vec![f64::NAN, 2.0, 0.0],
        ]);
        assert_eq!(n_undefined, 4);
        assert!(log.contains("WARN"), "{log}");
        assert!(log.contains("many pairs timed out"), "{log}");
        assert!(log.contains("n_undefined=4"), "{log}");
        // Undefined cells become 2² = 4, the maximum, then normalise to 1.
        assert_eq!(m.get(0, 1), 1.0);
        assert_eq!(m.get(1, 2), 0.5);
    }

    #[test]
    fn few_undefined_cells_repair_silently() {
        let (n_undefined, m, log) = finish_logged(vec![
            vec![0.0, 1.0, f64::NAN],
            vec![1.0, 0.0, 2.0],
            vec![f64::NAN, 2.0, 0.0],
        ]);
        assert_eq!(n_undefined, 2);
        assert!(!log.contains("many pairs timed out"), "{log}");
        assert_eq!(m.nan_count(), 0);
    }

    #[test]
    fn normalise_maps_range_onto_unit_interval() {
        let mut m = DistanceMatrix::from_rows(vec![
            vec![0.0, 2.0, 8.0],
            vec![2.0, 0.0, 4.0],
            vec![8.0, 4.0, 0.0],
        ])
        .unwrap();
        m.normalize();
        assert_eq!(m.row(0), &[0.0, 0.25, 1.0]);
        assert_eq!(m.row(1), &[0.25, 0.0, 0.5]);
    }

    #[test]
    fn ragged_rows_are_a_shape_mismatch() {
        let err = DistanceMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, GedError::ShapeMismatch { expected: (2, 2), got: (2, 1) }));
        assert!(matches!(
            DistanceMatrix::zeros(3).check_shape(4),
            Err(GedError::ShapeMismatch { expected: (4, 4), got: (3, 3) })
        ));
    }

    #[test]
    fn assemble_mirrors_upper_triangle() {
        let m = assemble(&[vec![1.0, 2.0], vec![3.0], vec![]]).unwrap();
        assert_eq!(
            m.to_rows(),
            vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 3.0], vec![2.0, 3.0, 0.0]]
        );
    }

    #[test]
    fn cache_hit_skips_computation() {
        let graphs = two_pairs();
        let engine = DistanceMatrixEngine::default();
        let key = CacheKey::new("toy", 4);
        let mut cache = MemoryCache::new();

        let first = engine.compute_cached(&graphs, &key, &mut cache).unwrap();
        assert!(!first.from_cache);
        assert_eq!(cache.len(), 1);

        let second = engine.compute_cached(&graphs, &key, &mut cache).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.matrix, first.matrix);
    }

    #[test]
    fn cached_matrix_of_wrong_size_is_rejected() {
        let key = CacheKey::new("toy", 4);
        let mut cache = MemoryCache::new();
        cache.put(&key, &DistanceMatrix::zeros(3)).unwrap();

        let err = DistanceMatrixEngine::default()
            .compute_cached(&two_pairs(), &key, &mut cache)
            .unwrap_err();
        assert!(matches!(err, GedError::ShapeMismatch { expected: (4, 4), got: (3, 3) }));
    }
}
