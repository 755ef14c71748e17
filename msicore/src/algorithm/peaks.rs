use bincode::{Decode, Encode};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Serialize, Deserialize};

use crate::algorithm::utility::{mad_noise, quad_subsample, smooth_gaussian};
use crate::data::cube::MsiCube;

/// Parameters for prominence-based peak picking on a smoothed trace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeakPickingConfig {
    /// Standard deviation of the Gaussian smoothing kernel, in channel units.
    pub smooth_sigma: f64,
    /// Kernel radius in multiples of sigma.
    pub truncate: f64,
    /// Minimum prominence in multiples of the estimated noise level.
    pub min_snr: f64,
    /// Minimum distance between neighboring apexes, in channels.
    pub min_distance: usize,
}

impl Default for PeakPickingConfig {
    fn default() -> Self {
        PeakPickingConfig {
            smooth_sigma: 2.0,
            truncate: 4.0,
            min_snr: 3.0,
            min_distance: 3,
        }
    }
}

/// A single detected peak on a 1-D intensity trace.
#[derive(Clone, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct Peak1D {
    /// Apex channel index.
    pub index: usize,
    /// Apex position on the m/z axis, 0 when the trace has no axis attached.
    pub mz: f64,
    pub apex_smoothed: f64,
    pub apex_raw: f64,
    pub prominence: f64,
    /// Integer bracketing of the half-prominence window.
    pub left: usize,
    pub right: usize,
    /// Width at half prominence, in channels, from fractional crossings.
    pub width: f64,
    /// Sub-channel apex offset from parabolic interpolation.
    pub subsample: f64,
}

/// Finds peaks on a raw trace.
///
/// The trace is smoothed, a noise level is estimated from the median absolute
/// deviation of the smoothed trace, and local maxima are kept if their
/// prominence exceeds `min_snr` times that noise level. Neighboring apexes
/// closer than `min_distance` are reduced to the strongest one.
///
/// # Arguments
///
/// * `raw` - The raw intensity trace.
/// * `config` - Picking parameters.
///
/// # Returns
///
/// Peaks ordered by channel index. `mz` is left at 0, callers with an axis
/// use `global_peaks` instead.
pub fn find_peaks(raw: &[f64], config: &PeakPickingConfig) -> Vec<Peak1D> {
    let n = raw.len();
    if n < 3 {
        return Vec::new();
    }

    let smoothed = smooth_gaussian(raw, config.smooth_sigma, config.truncate);
    let noise = mad_noise(&smoothed);
    let min_prominence = config.min_snr * noise;

    let mut candidates: Vec<usize> = Vec::new();
    for i in 1..n - 1 {
        let yi = smoothed[i];
        if yi > smoothed[i - 1] && yi >= smoothed[i + 1] {
            candidates.push(i);
        }
    }

    let mut peaks: Vec<Peak1D> = Vec::new();
    for &i in &candidates {
        let apex = smoothed[i];

        // walk outwards until a higher point ends the peak, tracking the minima
        let mut l = i;
        let mut left_min = apex;
        while l > 0 {
            l -= 1;
            left_min = left_min.min(smoothed[l]);
            if smoothed[l] > apex {
                break;
            }
        }
        let mut r = i;
        let mut right_min = apex;
        while r + 1 < n {
            r += 1;
            right_min = right_min.min(smoothed[r]);
            if smoothed[r] > apex {
                break;
            }
        }

        let baseline = left_min.max(right_min);
        let prominence = apex - baseline;
        if prominence <= 0.0 || prominence < min_prominence {
            continue;
        }

        let half = baseline + 0.5 * prominence;

        // fractional crossings of the half-prominence level
        let mut wl = i;
        while wl > 0 && smoothed[wl] > half {
            wl -= 1;
        }
        let left_cross = if wl < i && wl + 1 < n {
            let y0 = smoothed[wl];
            let y1 = smoothed[wl + 1];
            wl as f64 + if y1 != y0 { (half - y0) / (y1 - y0) } else { 0.0 }
        } else {
            wl as f64
        };

        let mut wr = i;
        while wr + 1 < n && smoothed[wr] > half {
            wr += 1;
        }
        let right_cross = if wr > i {
            let y0 = smoothed[wr - 1];
            let y1 = smoothed[wr];
            (wr - 1) as f64 + if y1 != y0 { (half - y0) / (y1 - y0) } else { 0.0 }
        } else {
            wr as f64
        };

        let width = (right_cross - left_cross).max(0.0);

        let subsample = if i > 0 && i + 1 < n {
            quad_subsample(smoothed[i - 1], smoothed[i], smoothed[i + 1]).clamp(-0.5, 0.5)
        } else {
            0.0
        };

        // enforce the minimum apex distance, the stronger apex wins
        if let Some(last) = peaks.last() {
            if i.abs_diff(last.index) < config.min_distance {
                if apex <= last.apex_smoothed {
                    continue;
                }
                peaks.pop();
            }
        }

        peaks.push(Peak1D {
            index: i,
            mz: 0.0,
            apex_smoothed: apex,
            apex_raw: raw[i],
            prominence,
            left: left_cross.floor().clamp(0.0, (n - 1) as f64) as usize,
            right: right_cross.ceil().clamp(0.0, (n - 1) as f64) as usize,
            width,
            subsample,
        });
    }
    peaks
}

/// Finds the global peaks of an MSI cube on its mean spectrum and resolves
/// apex positions against the cube's m/z axis.
pub fn global_peaks(cube: &MsiCube, config: &PeakPickingConfig) -> Vec<Peak1D> {
    let mean = cube.mean_spectrum();
    let mut peaks = find_peaks(&mean.intensity, config);
    for peak in peaks.iter_mut() {
        peak.mz = cube.mz[peak.index];
    }
    peaks
}

/// Keeps the `n` most intense peaks, returned in channel order.
pub fn top_n_peaks(peaks: Vec<Peak1D>, n: usize) -> Vec<Peak1D> {
    peaks
        .into_iter()
        .sorted_by_key(|peak| std::cmp::Reverse(OrderedFloat(peak.apex_smoothed)))
        .take(n)
        .sorted_by_key(|peak| peak.index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_trace(n: usize, centers: &[(f64, f64, f64)]) -> Vec<f64> {
        // centers: (position, height, sigma)
        (0..n)
            .map(|i| {
                centers.iter().map(|&(pos, height, sigma)| {
                    let d = i as f64 - pos;
                    height * (-(d * d) / (2.0 * sigma * sigma)).exp()
                }).sum()
            })
            .collect()
    }

    #[test]
    fn test_find_peaks_two_gaussians() {
        let trace = gaussian_trace(200, &[(50.0, 100.0, 3.0), (140.0, 60.0, 4.0)]);
        let peaks = find_peaks(&trace, &PeakPickingConfig::default());

        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].index.abs_diff(50) <= 1);
        assert!(peaks[1].index.abs_diff(140) <= 1);
        assert!(peaks[0].apex_smoothed > peaks[1].apex_smoothed);
        assert!(peaks[0].width > 0.0);
    }

    #[test]
    fn test_find_peaks_min_distance() {
        // two apexes only two channels apart collapse into the stronger one
        let mut trace = gaussian_trace(100, &[(50.0, 100.0, 1.0)]);
        trace[52] = 90.0;
        let config = PeakPickingConfig { smooth_sigma: 0.0, min_distance: 5, ..Default::default() };
        let peaks = find_peaks(&trace, &config);

        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 50);
    }

    #[test]
    fn test_find_peaks_short_trace() {
        assert!(find_peaks(&[1.0, 2.0], &PeakPickingConfig::default()).is_empty());
    }

    #[test]
    fn test_global_peaks_resolves_mz() {
        let mz: Vec<f64> = (0..100).map(|i| 100.0 + i as f64 * 0.5).collect();
        let trace = gaussian_trace(100, &[(40.0, 50.0, 2.5)]);

        // 1x1 image, the mean spectrum is the single pixel spectrum
        let cube = MsiCube::new(1, 1, mz, trace).unwrap();
        let peaks = global_peaks(&cube, &PeakPickingConfig::default());

        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].mz - 120.0).abs() <= 0.5);
    }

    #[test]
    fn test_top_n_peaks() {
        let trace = gaussian_trace(300, &[(50.0, 100.0, 3.0), (150.0, 60.0, 3.0), (250.0, 80.0, 3.0)]);
        let peaks = find_peaks(&trace, &PeakPickingConfig::default());
        assert_eq!(peaks.len(), 3);

        let top = top_n_peaks(peaks, 2);
        assert_eq!(top.len(), 2);
        // channel order is preserved after selection by intensity
        assert!(top[0].index < top[1].index);
        assert!(top[0].index.abs_diff(50) <= 1);
        assert!(top[1].index.abs_diff(250) <= 1);
    }
}
