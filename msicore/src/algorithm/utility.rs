/// Smooths a vector with a truncated Gaussian kernel, reflecting at the borders.
///
/// # Arguments
///
/// * `values` - The trace to smooth.
/// * `sigma` - Standard deviation of the kernel in sample units.
/// * `truncate` - Kernel radius in multiples of sigma, e.g. 4.0.
///
/// # Returns
///
/// The smoothed trace. A non-positive sigma returns the input unchanged.
pub fn smooth_gaussian(values: &[f64], sigma: f64, truncate: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.len() < 3 {
        return values.to_vec();
    }

    let radius = (truncate * sigma).ceil() as isize;
    let radius = radius.max(1);

    // build the kernel once and normalize it
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let denom = 2.0 * sigma * sigma;
    for offset in -radius..=radius {
        let x = offset as f64;
        kernel.push((-(x * x) / denom).exp());
    }
    let kernel_sum: f64 = kernel.iter().sum();
    for weight in kernel.iter_mut() {
        *weight /= kernel_sum;
    }

    let n = values.len() as isize;
    let mut smoothed = Vec::with_capacity(values.len());
    for i in 0..n {
        let mut acc = 0.0;
        for (k, weight) in kernel.iter().enumerate() {
            let mut j = i + k as isize - radius;
            // reflect out-of-range indices back into the trace
            if j < 0 {
                j = -j - 1;
            }
            if j >= n {
                j = 2 * n - j - 1;
            }
            acc += values[j as usize] * weight;
        }
        smoothed.push(acc);
    }
    smoothed
}

/// Sub-sample apex offset from a parabola through three equidistant samples.
///
/// Returns the offset of the vertex relative to the center sample, in sample
/// units. Flat triples yield 0.
pub fn quad_subsample(y0: f64, y1: f64, y2: f64) -> f64 {
    let denom = y0 - 2.0 * y1 + y2;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    0.5 * (y0 - y2) / denom
}

/// Median of a slice. Returns 0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Robust noise estimate via the median absolute deviation, scaled to be
/// consistent with the standard deviation of a normal distribution.
pub fn mad_noise(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|value| (value - center).abs()).collect();
    1.4826 * median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_gaussian_preserves_mass() {
        let mut values = vec![0.0; 21];
        values[10] = 100.0;

        let smoothed = smooth_gaussian(&values, 2.0, 4.0);

        // the impulse spreads out but total mass is preserved
        let total: f64 = smoothed.iter().sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert!(smoothed[10] < 100.0);
        assert!(smoothed[10] > smoothed[8]);
    }

    #[test]
    fn test_smooth_gaussian_zero_sigma_is_identity() {
        let values = vec![1.0, 5.0, 2.0];
        assert_eq!(smooth_gaussian(&values, 0.0, 4.0), values);
    }

    #[test]
    fn test_quad_subsample() {
        // symmetric triple, apex dead center
        assert!((quad_subsample(1.0, 2.0, 1.0)).abs() < 1e-12);
        // rising to the right shifts the apex right
        assert!(quad_subsample(1.0, 2.0, 1.5) > 0.0);
        // flat triple
        assert_eq!(quad_subsample(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);

        // constant trace has zero noise
        assert_eq!(mad_noise(&[5.0, 5.0, 5.0, 5.0]), 0.0);
        assert!(mad_noise(&[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]) > 0.0);
    }
}
