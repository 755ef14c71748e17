use nalgebra::DMatrix;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Serialize, Deserialize};

/// Parameters for k-means clustering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KmeansConfig {
    /// Number of clusters.
    pub k: usize,
    pub max_iter: usize,
    /// Maximum centroid movement below which iteration stops.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        KmeansConfig {
            k: 5,
            max_iter: 300,
            tolerance: 1e-6,
            seed: 42,
        }
    }
}

/// Result of a k-means run.
#[derive(Clone, Debug)]
pub struct Kmeans {
    /// Cluster label per observation, values in `0..k`.
    pub labels: Vec<usize>,
    /// `k x features` cluster centers.
    pub centroids: DMatrix<f64>,
    /// Sum of squared distances of observations to their assigned center.
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[inline]
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn row_to_vec(matrix: &DMatrix<f64>, row: usize) -> Vec<f64> {
    matrix.row(row).iter().cloned().collect()
}

// k-means++ seeding: the first center is drawn uniformly, every further
// center with probability proportional to the squared distance to the
// nearest center chosen so far.
fn seed_centroids(data: &DMatrix<f64>, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = data.nrows();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(row_to_vec(data, rng.gen_range(0..n)));

    let mut distances: Vec<f64> = (0..n)
        .map(|i| squared_distance(&row_to_vec(data, i), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        let next = if total <= 0.0 {
            // all points coincide with a center already, fall back to uniform
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = n - 1;
            for (i, &distance) in distances.iter().enumerate() {
                target -= distance;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = row_to_vec(data, next);
        for i in 0..n {
            let distance = squared_distance(&row_to_vec(data, i), &centroid);
            if distance < distances[i] {
                distances[i] = distance;
            }
        }
        centroids.push(centroid);
    }
    centroids
}

/// Clusters the rows of a matrix into `k` groups.
///
/// Uses k-means++ seeding from a seeded generator, a rayon-parallel
/// assignment step and Lloyd updates. Clusters that run empty are re-seeded
/// from the observation farthest from its assigned center.
///
/// # Arguments
///
/// * `data` - The `observations x features` matrix.
/// * `config` - Clustering parameters.
///
/// # Errors
///
/// Returns an error for `k` of zero, `k` exceeding the number of
/// observations, or an empty matrix.
pub fn cluster(data: &DMatrix<f64>, config: &KmeansConfig) -> Result<Kmeans, Box<dyn std::error::Error>> {
    let (n, features) = data.shape();
    if n == 0 || features == 0 {
        return Err("cannot cluster an empty matrix".into());
    }
    if config.k == 0 || config.k > n {
        return Err(format!("k {} invalid for {} observations", config.k, n).into());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = seed_centroids(data, config.k, &mut rng);

    // row copies once up front, the assignment loop reads them repeatedly
    let rows: Vec<Vec<f64>> = (0..n).map(|i| row_to_vec(data, i)).collect();

    let mut labels = vec![0usize; n];
    let mut iterations = 0;
    let mut converged = false;

    for iteration in 1..=config.max_iter {
        iterations = iteration;

        // assignment step
        labels = rows
            .par_iter()
            .map(|row| {
                centroids
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, centroid)| OrderedFloat(squared_distance(row, centroid)))
                    .map(|(label, _)| label)
                    .unwrap_or(0)
            })
            .collect();

        // update step
        let mut sums = vec![vec![0.0; features]; config.k];
        let mut counts = vec![0usize; config.k];
        for (row, &label) in rows.iter().zip(labels.iter()) {
            counts[label] += 1;
            for (acc, value) in sums[label].iter_mut().zip(row.iter()) {
                *acc += *value;
            }
        }

        let mut shift: f64 = 0.0;
        for label in 0..config.k {
            if counts[label] == 0 {
                // re-seed an empty cluster from the worst represented point
                let farthest = rows
                    .iter()
                    .enumerate()
                    .max_by_key(|(i, row)| OrderedFloat(squared_distance(row, &centroids[labels[*i]])))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                shift = f64::MAX;
                centroids[label] = rows[farthest].clone();
                continue;
            }
            let scale = 1.0 / counts[label] as f64;
            let updated: Vec<f64> = sums[label].iter().map(|value| value * scale).collect();
            shift = shift.max(squared_distance(&updated, &centroids[label]).sqrt());
            centroids[label] = updated;
        }

        if shift < config.tolerance {
            converged = true;
            break;
        }
    }

    let inertia = rows
        .iter()
        .zip(labels.iter())
        .map(|(row, &label)| squared_distance(row, &centroids[label]))
        .sum();

    let centroid_matrix = DMatrix::<f64>::from_fn(config.k, features, |i, j| centroids[i][j]);

    Ok(Kmeans {
        labels,
        centroids: centroid_matrix,
        inertia,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blob_matrix() -> DMatrix<f64> {
        // 10 points near (0, 0), 10 points near (10, 10)
        let mut rows: Vec<f64> = Vec::new();
        for i in 0..10 {
            rows.push(0.1 * i as f64);
            rows.push(0.05 * i as f64);
        }
        for i in 0..10 {
            rows.push(10.0 + 0.1 * i as f64);
            rows.push(10.0 - 0.05 * i as f64);
        }
        DMatrix::<f64>::from_row_slice(20, 2, &rows)
    }

    #[test]
    fn test_cluster_separates_blobs() {
        let data = two_blob_matrix();
        let result = cluster(&data, &KmeansConfig { k: 2, ..Default::default() }).unwrap();

        assert!(result.converged);
        // all points of one blob share a label, and the blobs differ
        let first = result.labels[0];
        assert!(result.labels[..10].iter().all(|&label| label == first));
        assert!(result.labels[10..].iter().all(|&label| label != first));
        assert!(result.inertia < 10.0);
    }

    #[test]
    fn test_cluster_deterministic_for_seed() {
        let data = two_blob_matrix();
        let config = KmeansConfig { k: 3, ..Default::default() };

        let a = cluster(&data, &config).unwrap();
        let b = cluster(&data, &config).unwrap();

        assert_eq!(a.labels, b.labels);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_cluster_rejects_bad_k() {
        let data = two_blob_matrix();
        assert!(cluster(&data, &KmeansConfig { k: 0, ..Default::default() }).is_err());
        assert!(cluster(&data, &KmeansConfig { k: 21, ..Default::default() }).is_err());
    }

    #[test]
    fn test_cluster_k_equals_n() {
        // every observation becomes its own center
        let data = DMatrix::<f64>::from_row_slice(3, 1, &[0.0, 5.0, 10.0]);
        let result = cluster(&data, &KmeansConfig { k: 3, ..Default::default() }).unwrap();
        assert!(result.inertia < 1e-9);
    }
}
