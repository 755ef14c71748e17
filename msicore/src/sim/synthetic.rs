use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand::distributions::Distribution;
use serde::{Serialize, Deserialize};
use statrs::distribution::Normal;

use crate::data::cube::MsiCube;

/// Parameters for synthetic MSI dataset generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub rows: usize,
    pub cols: usize,
    pub num_channels: usize,
    pub mz_min: f64,
    pub mz_max: f64,
    /// Number of Gaussian m/z peaks distributed over the axis.
    pub num_peaks: usize,
    /// Standard deviation of the additive baseline noise.
    pub noise_level: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            rows: 16,
            cols: 16,
            num_channels: 512,
            mz_min: 100.0,
            mz_max: 1000.0,
            num_peaks: 8,
            noise_level: 1.0,
            seed: 42,
        }
    }
}

// One synthetic compound: a Gaussian peak on the m/z axis whose abundance
// follows a Gaussian spot in image space.
struct SyntheticPeak {
    channel: f64,
    channel_sigma: f64,
    height: f64,
    spot_x: f64,
    spot_y: f64,
    spot_sigma: f64,
}

/// Generates a synthetic MSI cube with Gaussian peaks, spatially varying
/// abundance patterns and normal-distributed baseline noise.
///
/// Deterministic for a fixed seed.
///
/// # Errors
///
/// Returns an error for zero-sized dimensions or an inverted m/z range.
pub fn generate_cube(config: &SyntheticConfig) -> Result<MsiCube, Box<dyn std::error::Error>> {
    if config.rows == 0 || config.cols == 0 {
        return Err("synthetic cube dimensions must be non-zero".into());
    }
    if config.num_channels < 16 {
        return Err("synthetic cubes need at least 16 channels".into());
    }
    if config.mz_max <= config.mz_min {
        return Err("mz_max must be greater than mz_min".into());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);

    let step = (config.mz_max - config.mz_min) / config.num_channels as f64;
    let mz: Vec<f64> = (0..config.num_channels)
        .map(|i| config.mz_min + i as f64 * step)
        .collect();

    // keep peaks away from the axis borders so smoothing never clips an apex
    let margin = (config.num_channels / 20).max(4) as f64;
    let spot_sigma_max = (config.rows.max(config.cols) as f64 / 2.0).max(1.5);
    let peaks: Vec<SyntheticPeak> = (0..config.num_peaks)
        .map(|_| SyntheticPeak {
            channel: rng.gen_range(margin..config.num_channels as f64 - margin),
            channel_sigma: rng.gen_range(1.0..3.0),
            height: rng.gen_range(50.0..200.0),
            spot_x: rng.gen_range(0.0..config.rows as f64),
            spot_y: rng.gen_range(0.0..config.cols as f64),
            spot_sigma: rng.gen_range(1.0..spot_sigma_max),
        })
        .collect();

    let noise = match config.noise_level > 0.0 {
        true => Some(Normal::new(0.0, config.noise_level)?),
        false => None,
    };

    let mut intensity = Vec::with_capacity(config.rows * config.cols * config.num_channels);
    for x in 0..config.rows {
        for y in 0..config.cols {
            for c in 0..config.num_channels {
                let mut value = 0.0;
                for peak in &peaks {
                    let dc = c as f64 - peak.channel;
                    let spectral = (-(dc * dc) / (2.0 * peak.channel_sigma * peak.channel_sigma)).exp();
                    if spectral < 1e-6 {
                        continue;
                    }
                    let dx = x as f64 - peak.spot_x;
                    let dy = y as f64 - peak.spot_y;
                    let spatial = (-(dx * dx + dy * dy) / (2.0 * peak.spot_sigma * peak.spot_sigma)).exp();
                    value += peak.height * spectral * spatial;
                }
                if let Some(noise) = &noise {
                    value += noise.sample(&mut rng);
                }
                intensity.push(value.max(0.0));
            }
        }
    }

    MsiCube::new(config.rows, config.cols, mz, intensity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::peaks::{global_peaks, PeakPickingConfig};

    #[test]
    fn test_generate_cube_dims() {
        let config = SyntheticConfig { rows: 4, cols: 6, num_channels: 128, ..Default::default() };
        let cube = generate_cube(&config).unwrap();

        assert_eq!(cube.rows, 4);
        assert_eq!(cube.cols, 6);
        assert_eq!(cube.num_channels(), 128);
        assert_eq!(cube.intensity.len(), 4 * 6 * 128);
        assert!(cube.intensity.iter().all(|&value| value >= 0.0));
    }

    #[test]
    fn test_generate_cube_deterministic() {
        let config = SyntheticConfig::default();
        let a = generate_cube(&config).unwrap();
        let b = generate_cube(&config).unwrap();
        assert_eq!(a.intensity, b.intensity);
    }

    #[test]
    fn test_generated_peaks_are_found() {
        // clean cube, every planted peak should be recovered
        let config = SyntheticConfig {
            rows: 8,
            cols: 8,
            num_channels: 256,
            num_peaks: 4,
            noise_level: 0.0,
            seed: 3,
            ..Default::default()
        };
        let cube = generate_cube(&config).unwrap();
        let peaks = global_peaks(&cube, &PeakPickingConfig::default());

        assert!(peaks.len() >= 3, "expected most planted peaks, found {}", peaks.len());
    }

    #[test]
    fn test_generate_cube_rejects_inverted_range() {
        let config = SyntheticConfig { mz_min: 500.0, mz_max: 100.0, ..Default::default() };
        assert!(generate_cube(&config).is_err());
    }
}
