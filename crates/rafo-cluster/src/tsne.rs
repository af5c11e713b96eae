//! Exact t-SNE over a precomputed distance matrix.
//!
//! Conditional affinities are calibrated per tree by binary search on the
//! Gaussian precision until their entropy matches `ln(perplexity)`; the
//! distances are used as given, without squaring. The 2D layout follows a
//! Student-t kernel optimised by momentum gradient descent with per
//! coordinate gains, starting with an early-exaggeration phase.

use rafo_ged::DistanceMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::error::ClusterError;

const EXPLORATION_ITERS: usize = 250;
const BINARY_SEARCH_STEPS: usize = 100;
const PERPLEXITY_TOL: f64 = 1e-5;
const MIN_GAIN: f64 = 0.01;
const MIN_GRAD_NORM: f64 = 1e-7;
const MACHINE_EPSILON: f64 = f64::EPSILON;

/// Embedding parameters.
///
/// # Defaults
///
/// | Parameter            | Default |
/// |----------------------|---------|
/// | `learning_rate`      | 73.0    |
/// | `perplexity`         | 5.0     |
/// | `early_exaggeration` | 35.0    |
/// | `n_iter`             | 1000    |
/// | `seed`               | 123     |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TsneConfig {
    learning_rate: f64,
    perplexity: f64,
    early_exaggeration: f64,
    n_iter: usize,
    seed: u64,
}

impl TsneConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            learning_rate: 73.0,
            perplexity: 5.0,
            early_exaggeration: 35.0,
            n_iter: 1000,
            seed: 123,
        }
    }

    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Effective number of neighbours. Clamped to `n_trees - 1` when the
    /// ensemble is not larger than this value.
    #[must_use]
    pub fn with_perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    #[must_use]
    pub fn with_early_exaggeration(mut self, early_exaggeration: f64) -> Self {
        self.early_exaggeration = early_exaggeration;
        self
    }

    /// Total iterations, the first 250 of which are exaggerated.
    #[must_use]
    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    #[must_use]
    pub fn perplexity(&self) -> f64 {
        self.perplexity
    }

    #[must_use]
    pub fn early_exaggeration(&self) -> f64 {
        self.early_exaggeration
    }

    #[must_use]
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Perplexity actually used for an ensemble of `n_trees`.
    #[must_use]
    pub fn effective_perplexity(&self, n_trees: usize) -> f64 {
        if n_trees as f64 <= self.perplexity {
            n_trees.saturating_sub(1) as f64
        } else {
            self.perplexity
        }
    }

    fn validate(&self) -> Result<(), ClusterError> {
        if !(self.perplexity.is_finite() && self.perplexity > 0.0) {
            return Err(ClusterError::InvalidPerplexity {
                perplexity: self.perplexity,
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ClusterError::InvalidLearningRate {
                learning_rate: self.learning_rate,
            });
        }
        if !(self.early_exaggeration.is_finite() && self.early_exaggeration >= 1.0) {
            return Err(ClusterError::InvalidEarlyExaggeration {
                early_exaggeration: self.early_exaggeration,
            });
        }
        if self.n_iter < EXPLORATION_ITERS {
            return Err(ClusterError::InvalidIterations {
                n_iter: self.n_iter,
                min: EXPLORATION_ITERS,
            });
        }
        Ok(())
    }

    /// Lay the trees of `matrix` out in two dimensions.
    ///
    /// Fewer than two trees give points at the origin.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ClusterError::InvalidPerplexity`] | perplexity not positive |
    /// | [`ClusterError::InvalidLearningRate`] | learning rate not positive |
    /// | [`ClusterError::InvalidEarlyExaggeration`] | factor below 1 |
    /// | [`ClusterError::InvalidIterations`] | fewer than 250 iterations |
    /// | [`ClusterError::NonSquareMatrix`] | `matrix` is not square |
    #[instrument(skip(self, matrix), fields(n_trees = matrix.len(), perplexity = self.perplexity))]
    pub fn embed(&self, matrix: &DistanceMatrix) -> Result<Embedding, ClusterError> {
        self.validate()?;
        let n = crate::square_len(matrix)?;
        if n < 2 {
            return Ok(Embedding {
                points: vec![[0.0, 0.0]; n],
                kl_divergence: 0.0,
                n_iter: 0,
            });
        }

        let perplexity = self.effective_perplexity(n);
        if perplexity != self.perplexity {
            warn!(
                requested = self.perplexity,
                used = perplexity,
                "perplexity clamped to n_trees - 1"
            );
        }
        let p = joint_probabilities(matrix, perplexity);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut y: Vec<f64> = (0..2 * n).map(|_| 1e-4 * standard_normal(&mut rng)).collect();
        let mut update = vec![0.0; 2 * n];
        let mut gains = vec![1.0_f64; 2 * n];

        let mut n_iter = 0;
        let mut kl = 0.0;
        for iter in 0..self.n_iter {
            let exploring = iter < EXPLORATION_ITERS;
            let exaggeration = if exploring { self.early_exaggeration } else { 1.0 };
            let momentum = if exploring { 0.5 } else { 0.8 };

            let (grad, divergence) = kl_gradient(&p, &y, n, exaggeration);
            kl = divergence;
            n_iter = iter + 1;

            for k in 0..2 * n {
                if update[k] * grad[k] < 0.0 {
                    gains[k] += 0.2;
                } else {
                    gains[k] *= 0.8;
                }
                gains[k] = gains[k].max(MIN_GAIN);
                update[k] = momentum * update[k] - self.learning_rate * gains[k] * grad[k];
                y[k] += update[k];
            }

            let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if !exploring && grad_norm < MIN_GRAD_NORM {
                debug!(iter, grad_norm, "gradient vanished, stopping early");
                break;
            }
        }

        info!(n_iter, kl_divergence = kl, "t-SNE finished");
        Ok(Embedding {
            points: y.chunks_exact(2).map(|c| [c[0], c[1]]).collect(),
            kl_divergence: kl,
            n_iter,
        })
    }
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One `(x, y)` point per tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Embedding {
    points: Vec<[f64; 2]>,
    kl_divergence: f64,
    n_iter: usize,
}

impl Embedding {
    #[must_use]
    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    #[must_use]
    pub fn point(&self, tree: usize) -> Option<(f64, f64)> {
        self.points.get(tree).map(|p| (p[0], p[1]))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// KL divergence of the final layout.
    #[must_use]
    pub fn kl_divergence(&self) -> f64 {
        self.kl_divergence
    }

    #[must_use]
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

/// Symmetric joint affinities `P`, row-major, normalised to sum to 1.
fn joint_probabilities(matrix: &DistanceMatrix, perplexity: f64) -> Vec<f64> {
    let n = matrix.len();
    let conditional: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| conditional_row(matrix.row(i), i, perplexity))
        .collect();

    let mut p = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            p[i * n + j] = conditional[i][j] + conditional[j][i];
        }
    }
    let total = p.iter().sum::<f64>().max(MACHINE_EPSILON);
    for v in &mut p {
        *v = (*v / total).max(MACHINE_EPSILON);
    }
    p
}

/// Conditional affinities of tree `i` whose entropy matches `ln(perplexity)`.
fn conditional_row(distances: &[f64], i: usize, perplexity: f64) -> Vec<f64> {
    let target = perplexity.ln();
    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut row = vec![0.0; distances.len()];

    for _ in 0..BINARY_SEARCH_STEPS {
        for (j, (p, d)) in row.iter_mut().zip(distances).enumerate() {
            *p = if j == i { 0.0 } else { (-d * beta).exp() };
        }
        let mut sum = row.iter().sum::<f64>();
        if sum == 0.0 {
            sum = 1e-8;
        }
        let weighted: f64 = row.iter().zip(distances).map(|(p, d)| p * d).sum();
        for p in &mut row {
            *p /= sum;
        }
        let entropy = sum.ln() + beta * weighted / sum;
        let diff = entropy - target;
        if diff.abs() <= PERPLEXITY_TOL {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
        }
    }
    row
}

/// Gradient of `KL(P || Q)` with respect to the layout, and the divergence.
fn kl_gradient(p: &[f64], y: &[f64], n: usize, exaggeration: f64) -> (Vec<f64>, f64) {
    let kernel: Vec<f64> = (0..n * n)
        .into_par_iter()
        .map(|k| {
            let (i, j) = (k / n, k % n);
            if i == j {
                return 0.0;
            }
            let dx = y[2 * i] - y[2 * j];
            let dy = y[2 * i + 1] - y[2 * j + 1];
            1.0 / (1.0 + dx * dx + dy * dy)
        })
        .collect();
    let z = kernel.iter().sum::<f64>().max(MACHINE_EPSILON);

    let rows: Vec<([f64; 2], f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut g = [0.0; 2];
            let mut kl = 0.0;
            for j in (0..n).filter(|&j| j != i) {
                let k = i * n + j;
                let pij = p[k] * exaggeration;
                let qij = (kernel[k] / z).max(MACHINE_EPSILON);
                let coeff = (pij - qij) * kernel[k];
                g[0] += coeff * (y[2 * i] - y[2 * j]);
                g[1] += coeff * (y[2 * i + 1] - y[2 * j + 1]);
                kl += pij * (pij.max(MACHINE_EPSILON) / qij).ln();
            }
            ([4.0 * g[0], 4.0 * g[1]], kl)
        })
        .collect();

    let kl = rows.iter().map(|(_, kl)| kl).sum();
    let grad = rows.into_iter().flat_map(|(g, _)| g).collect();
    (grad, kl)
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
