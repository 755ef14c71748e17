use std::fmt;
use std::fmt::{Display, Formatter};
use nalgebra::DMatrix;
use serde::{Serialize, Deserialize};

use crate::data::spectrum::MzSpectrum;

/// A mass spectrometry image: a grid of `rows x cols` pixels where every pixel
/// holds one profile spectrum over a shared m/z axis.
///
/// Intensities are stored flat and pixel-major, i.e. the spectrum of pixel
/// `(x, y)` occupies `intensity[(x * cols + y) * mz.len() ..][.. mz.len()]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MsiCube {
    pub rows: usize,
    pub cols: usize,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl MsiCube {
    /// Constructs a new `MsiCube`.
    ///
    /// # Arguments
    ///
    /// * `rows` - Number of pixel rows of the image.
    /// * `cols` - Number of pixel columns of the image.
    /// * `mz` - The shared m/z axis, sorted ascending.
    /// * `intensity` - Flat pixel-major intensity values of length `rows * cols * mz.len()`.
    ///
    /// # Errors
    ///
    /// Returns an error if any dimension is zero or the intensity length does not
    /// match `rows * cols * mz.len()`.
    pub fn new(rows: usize, cols: usize, mz: Vec<f64>, intensity: Vec<f64>) -> Result<Self, Box<dyn std::error::Error>> {
        if rows == 0 || cols == 0 || mz.is_empty() {
            return Err("MsiCube dimensions must be non-zero".into());
        }
        if intensity.len() != rows * cols * mz.len() {
            return Err(format!(
                "intensity length {} does not match rows * cols * channels = {}",
                intensity.len(), rows * cols * mz.len()
            ).into());
        }
        Ok(MsiCube { rows, cols, mz, intensity })
    }

    pub fn num_pixels(&self) -> usize {
        self.rows * self.cols
    }

    pub fn num_channels(&self) -> usize {
        self.mz.len()
    }

    /// Flat pixel index for image coordinates `(x, y)`.
    #[inline]
    pub fn pixel_index(&self, x: usize, y: usize) -> usize {
        x * self.cols + y
    }

    /// The intensity values of a single pixel.
    ///
    /// # Errors
    ///
    /// Returns an error if `(x, y)` lies outside the image.
    pub fn pixel_slice(&self, x: usize, y: usize) -> Result<&[f64], Box<dyn std::error::Error>> {
        if x >= self.rows || y >= self.cols {
            return Err(format!("pixel ({}, {}) out of bounds for {}x{} image", x, y, self.rows, self.cols).into());
        }
        let n = self.num_channels();
        let start = self.pixel_index(x, y) * n;
        Ok(&self.intensity[start..start + n])
    }

    /// The spectrum of a single pixel as an owned `MzSpectrum`.
    pub fn spectrum_at(&self, x: usize, y: usize) -> Result<MzSpectrum, Box<dyn std::error::Error>> {
        let values = self.pixel_slice(x, y)?;
        Ok(MzSpectrum::new(self.mz.clone(), values.to_vec()))
    }

    /// The mean spectrum over all pixels.
    ///
    /// This is the reduction that global peak finding operates on: averaging
    /// suppresses pixel noise while peaks present across the image remain.
    pub fn mean_spectrum(&self) -> MzSpectrum {
        let n = self.num_channels();
        let mut summed = vec![0.0; n];

        for pixel in self.intensity.chunks_exact(n) {
            for (acc, value) in summed.iter_mut().zip(pixel.iter()) {
                *acc += *value;
            }
        }

        let scale = 1.0 / self.num_pixels() as f64;
        let mean: Vec<f64> = summed.iter().map(|value| value * scale).collect();
        MzSpectrum::new(self.mz.clone(), mean)
    }

    /// A single-channel ion image as a `rows x cols` vector.
    ///
    /// # Arguments
    ///
    /// * `channel` - Index into the m/z axis.
    pub fn ion_image(&self, channel: usize) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
        if channel >= self.num_channels() {
            return Err(format!("channel {} out of bounds for {} channels", channel, self.num_channels()).into());
        }
        let n = self.num_channels();
        Ok(self.intensity.iter().skip(channel).step_by(n).cloned().collect())
    }

    /// Total ion current per pixel as a `rows x cols` vector.
    pub fn tic_image(&self) -> Vec<f64> {
        let n = self.num_channels();
        self.intensity
            .chunks_exact(n)
            .map(|pixel| pixel.iter().sum())
            .collect()
    }

    /// Reduces the cube to a dense `pixels x peaks` matrix by sampling the given
    /// channel indices for every pixel.
    ///
    /// # Arguments
    ///
    /// * `peak_indices` - Channel indices to sample, typically the apex positions
    ///   found by global peak finding.
    pub fn to_peak_matrix(&self, peak_indices: &[usize]) -> Result<DMatrix<f64>, Box<dyn std::error::Error>> {
        let n = self.num_channels();
        for &index in peak_indices {
            if index >= n {
                return Err(format!("peak index {} out of bounds for {} channels", index, n).into());
            }
        }

        let mut matrix = DMatrix::<f64>::zeros(self.num_pixels(), peak_indices.len());
        for (pixel, values) in self.intensity.chunks_exact(n).enumerate() {
            for (column, &index) in peak_indices.iter().enumerate() {
                matrix[(pixel, column)] = values[index];
            }
        }
        Ok(matrix)
    }
}

impl Display for MsiCube {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MsiCube(pixels: {}x{}, channels: {}, mz range: [{:.3}, {:.3}])",
            self.rows, self.cols, self.num_channels(),
            self.mz.first().cloned().unwrap_or(0.0),
            self.mz.last().cloned().unwrap_or(0.0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cube() -> MsiCube {
        // 2x2 pixels, 3 channels
        let mz = vec![100.0, 200.0, 300.0];
        let intensity = vec![
            1.0, 2.0, 3.0,    // (0, 0)
            4.0, 5.0, 6.0,    // (0, 1)
            7.0, 8.0, 9.0,    // (1, 0)
            10.0, 11.0, 12.0, // (1, 1)
        ];
        MsiCube::new(2, 2, mz, intensity).unwrap()
    }

    #[test]
    fn test_rejects_size_mismatch() {
        let result = MsiCube::new(2, 2, vec![100.0, 200.0], vec![0.0; 7]);
        assert!(result.is_err());

        let result = MsiCube::new(0, 2, vec![100.0], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_spectrum_at() {
        let cube = small_cube();
        let spectrum = cube.spectrum_at(1, 0).unwrap();
        assert_eq!(spectrum.mz, vec![100.0, 200.0, 300.0]);
        assert_eq!(spectrum.intensity, vec![7.0, 8.0, 9.0]);

        assert!(cube.spectrum_at(2, 0).is_err());
    }

    #[test]
    fn test_mean_spectrum() {
        let cube = small_cube();
        let mean = cube.mean_spectrum();
        assert_eq!(mean.intensity, vec![5.5, 6.5, 7.5]);
    }

    #[test]
    fn test_ion_and_tic_image() {
        let cube = small_cube();
        assert_eq!(cube.ion_image(1).unwrap(), vec![2.0, 5.0, 8.0, 11.0]);
        assert_eq!(cube.tic_image(), vec![6.0, 15.0, 24.0, 33.0]);
        assert!(cube.ion_image(3).is_err());
    }

    #[test]
    fn test_to_peak_matrix() {
        let cube = small_cube();
        let matrix = cube.to_peak_matrix(&[0, 2]).unwrap();
        assert_eq!(matrix.nrows(), 4);
        assert_eq!(matrix.ncols(), 2);
        assert_eq!(matrix[(0, 0)], 1.0);
        assert_eq!(matrix[(0, 1)], 3.0);
        assert_eq!(matrix[(3, 0)], 10.0);
        assert_eq!(matrix[(3, 1)], 12.0);
    }
}
