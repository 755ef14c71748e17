use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};

/// Parameters for non-negative matrix factorization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NmfConfig {
    /// Number of components to factorize into.
    pub rank: usize,
    pub max_iter: usize,
    /// Relative change of the reconstruction error below which iteration stops.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for NmfConfig {
    fn default() -> Self {
        NmfConfig {
            rank: 8,
            max_iter: 500,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

/// Result of a non-negative matrix factorization `V ~ W * H`.
#[derive(Clone, Debug)]
pub struct Nmf {
    /// `pixels x rank` basis activations.
    pub w: DMatrix<f64>,
    /// `rank x features` component spectra.
    pub h: DMatrix<f64>,
    /// Frobenius norm of `V - W * H` at the last iteration.
    pub reconstruction_error: f64,
    pub iterations: usize,
    pub converged: bool,
}

// Guards the multiplicative update denominators against division by zero.
const EPS: f64 = 1e-12;

/// Factorizes a non-negative matrix with Lee-Seung multiplicative updates.
///
/// Both factors are initialized uniformly at random from a seeded generator,
/// scaled so the initial product matches the data magnitude, which makes runs
/// reproducible for a fixed seed. Iteration stops when the relative change of
/// the reconstruction error drops below `tolerance` or `max_iter` is reached.
///
/// # Arguments
///
/// * `v` - The `pixels x features` data matrix, all entries non-negative.
/// * `config` - Factorization parameters.
///
/// # Errors
///
/// Returns an error for a rank of zero, a rank exceeding either data
/// dimension, an empty matrix, or negative data entries.
pub fn factorize(v: &DMatrix<f64>, config: &NmfConfig) -> Result<Nmf, Box<dyn std::error::Error>> {
    let (rows, cols) = v.shape();
    if rows == 0 || cols == 0 {
        return Err("cannot factorize an empty matrix".into());
    }
    if config.rank == 0 || config.rank > rows.min(cols) {
        return Err(format!("rank {} invalid for a {}x{} matrix", config.rank, rows, cols).into());
    }
    if v.iter().any(|&value| value < 0.0) {
        return Err("input matrix contains negative entries".into());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);

    // scale the random init so W * H starts in the magnitude range of V
    let mean = v.sum() / (rows * cols) as f64;
    let scale = (mean.max(EPS) / config.rank as f64).sqrt();

    let mut w = DMatrix::<f64>::from_fn(rows, config.rank, |_, _| rng.gen_range(EPS..1.0) * scale);
    let mut h = DMatrix::<f64>::from_fn(config.rank, cols, |_, _| rng.gen_range(EPS..1.0) * scale);

    let mut previous_error = (v - &w * &h).norm();
    let mut iterations = 0;
    let mut converged = false;

    for iteration in 1..=config.max_iter {
        // H <- H .* (W^T V) ./ (W^T W H)
        let wt = w.transpose();
        let numerator = &wt * v;
        let denominator = &wt * &w * &h;
        h.zip_zip_apply(&numerator, &denominator, |value, num, den| {
            *value *= num / (den + EPS);
        });

        // W <- W .* (V H^T) ./ (W H H^T)
        let ht = h.transpose();
        let numerator = v * &ht;
        let denominator = &w * &h * &ht;
        w.zip_zip_apply(&numerator, &denominator, |value, num, den| {
            *value *= num / (den + EPS);
        });

        iterations = iteration;
        let error = (v - &w * &h).norm();
        let relative_change = (previous_error - error).abs() / previous_error.max(EPS);
        previous_error = error;
        if relative_change < config.tolerance {
            converged = true;
            break;
        }
    }

    Ok(Nmf {
        w,
        h,
        reconstruction_error: previous_error,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn low_rank_matrix(rows: usize, cols: usize, rank: usize) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let w = DMatrix::<f64>::from_fn(rows, rank, |_, _| rng.gen_range(0.0..1.0));
        let h = DMatrix::<f64>::from_fn(rank, cols, |_, _| rng.gen_range(0.0..1.0));
        w * h
    }

    #[test]
    fn test_factorize_reduces_error() {
        let v = low_rank_matrix(30, 20, 3);
        let config = NmfConfig { rank: 3, max_iter: 2000, tolerance: 1e-9, ..Default::default() };

        let initial_error = v.norm();
        let result = factorize(&v, &config).unwrap();

        assert_eq!(result.w.shape(), (30, 3));
        assert_eq!(result.h.shape(), (3, 20));
        // an exactly rank-3 matrix factorizes almost perfectly
        assert!(result.reconstruction_error < 0.05 * initial_error);
        assert!(result.w.iter().all(|&value| value >= 0.0));
        assert!(result.h.iter().all(|&value| value >= 0.0));
    }

    #[test]
    fn test_factorize_deterministic_for_seed() {
        let v = low_rank_matrix(15, 10, 2);
        let config = NmfConfig { rank: 2, max_iter: 50, tolerance: 0.0, ..Default::default() };

        let a = factorize(&v, &config).unwrap();
        let b = factorize(&v, &config).unwrap();

        assert_eq!(a.iterations, b.iterations);
        assert!((a.reconstruction_error - b.reconstruction_error).abs() < 1e-12);
        assert_eq!(a.w, b.w);
    }

    #[test]
    fn test_factorize_rejects_bad_input() {
        let v = DMatrix::<f64>::from_element(4, 4, 1.0);
        assert!(factorize(&v, &NmfConfig { rank: 0, ..Default::default() }).is_err());
        assert!(factorize(&v, &NmfConfig { rank: 5, ..Default::default() }).is_err());

        let negative = DMatrix::<f64>::from_element(4, 4, -1.0);
        assert!(factorize(&negative, &NmfConfig { rank: 2, ..Default::default() }).is_err());
    }
}
