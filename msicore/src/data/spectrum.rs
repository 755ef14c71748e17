use std::fmt;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use bincode::{Decode, Encode};
use serde::{Serialize, Deserialize};

/// Types that can be re-binned to a given decimal m/z resolution.
pub trait ToResolution {
    fn to_resolution(&self, resolution: i32) -> Self;
}

/// Represents a single profile mass spectrum with associated m/z values and intensities.
#[derive(Clone, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct MzSpectrum {
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl MzSpectrum {
    /// Constructs a new `MzSpectrum`.
    ///
    /// # Arguments
    ///
    /// * `mz` - A vector of m/z values.
    /// * `intensity` - A vector of intensity values corresponding to the m/z values.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msicore::data::spectrum::MzSpectrum;
    /// let spectrum = MzSpectrum::new(vec![100.0, 200.0], vec![10.0, 20.0]);
    /// assert_eq!(spectrum.mz, vec![100.0, 200.0]);
    /// assert_eq!(spectrum.intensity, vec![10.0, 20.0]);
    /// ```
    pub fn new(mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        assert_eq!(mz.len(), intensity.len(), "m/z and intensity must have the same length");
        MzSpectrum { mz, intensity }
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// Sum of all intensity values, i.e. the total ion current of the spectrum.
    pub fn total_intensity(&self) -> f64 {
        self.intensity.iter().sum()
    }

    pub fn filter_ranged(&self, mz_min: f64, mz_max: f64, intensity_min: f64, intensity_max: f64) -> Self {
        let mut mz_vec: Vec<f64> = Vec::new();
        let mut intensity_vec: Vec<f64> = Vec::new();

        for (mz, intensity) in self.mz.iter().zip(self.intensity.iter()) {
            if mz_min <= *mz && *mz <= mz_max && *intensity >= intensity_min && *intensity <= intensity_max {
                mz_vec.push(*mz);
                intensity_vec.push(*intensity);
            }
        }
        MzSpectrum::new(mz_vec, intensity_vec)
    }

    /// Index of the most intense data point, or `None` for an empty spectrum.
    pub fn base_peak_index(&self) -> Option<usize> {
        self.intensity.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(index, _)| index)
    }
}

impl ToResolution for MzSpectrum {
    /// Bins the spectrum's m/z values to a given resolution and sums the intensities.
    ///
    /// # Arguments
    ///
    /// * `resolution` - The desired resolution in terms of decimal places. For instance, a resolution of 2
    /// would bin m/z values to two decimal places.
    ///
    /// # Returns
    ///
    /// A new `MzSpectrum` where m/z values are binned according to the given resolution.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msicore::data::spectrum::MzSpectrum;
    /// # use msicore::data::spectrum::ToResolution;
    /// let spectrum = MzSpectrum::new(vec![100.123, 100.121, 100.131], vec![10.0, 20.0, 30.0]);
    /// let binned_spectrum = spectrum.to_resolution(2);
    /// assert_eq!(binned_spectrum.mz, vec![100.12, 100.13]);
    /// assert_eq!(binned_spectrum.intensity, vec![30.0, 30.0]);
    /// ```
    fn to_resolution(&self, resolution: i32) -> Self {
        let mut binned: BTreeMap<i64, f64> = BTreeMap::new();
        let factor = 10f64.powi(resolution);

        for (mz, inten) in self.mz.iter().zip(self.intensity.iter()) {
            let key = (mz * factor).round() as i64;
            let entry = binned.entry(key).or_insert(0.0);
            *entry += *inten;
        }

        let mz: Vec<f64> = binned.keys().map(|&key| key as f64 / factor).collect();
        let intensity: Vec<f64> = binned.values().cloned().collect();

        MzSpectrum::new(mz, intensity)
    }
}

impl std::ops::Add for MzSpectrum {
    type Output = Self;
    /// Combines two `MzSpectrum` instances by summing up the intensities of matching m/z values.
    ///
    /// # Description
    /// Each m/z value is quantized to retain at least 6 decimals. If two spectra have m/z values
    /// that quantize to the same integer value, their intensities are summed.
    ///
    /// # Example
    /// ```
    /// # use msicore::data::spectrum::MzSpectrum;
    /// let spectrum1 = MzSpectrum::new(vec![100.523, 101.923], vec![10.0, 20.0]);
    /// let spectrum2 = MzSpectrum::new(vec![101.235, 105.112], vec![15.0, 30.0]);
    ///
    /// let combined = spectrum1 + spectrum2;
    ///
    /// assert_eq!(combined.mz, vec![100.523, 101.235, 101.923, 105.112]);
    /// assert_eq!(combined.intensity, vec![10.0, 15.0, 20.0, 30.0]);
    /// ```
    fn add(self, other: Self) -> MzSpectrum {
        let mut combined_map: BTreeMap<i64, f64> = BTreeMap::new();

        // Helper to quantize mz to an integer key
        let quantize = |mz: f64| -> i64 {
            (mz * 1_000_000.0).round() as i64
        };

        for (mz, intensity) in self.mz.iter().zip(self.intensity.iter()) {
            let key = quantize(*mz);
            let entry = combined_map.entry(key).or_insert(0.0);
            *entry += *intensity;
        }

        for (mz, intensity) in other.mz.iter().zip(other.intensity.iter()) {
            let key = quantize(*mz);
            let entry = combined_map.entry(key).or_insert(0.0);
            *entry += *intensity;
        }

        let mz_combined: Vec<f64> = combined_map.keys().map(|&key| key as f64 / 1_000_000.0).collect();
        let intensity_combined: Vec<f64> = combined_map.values().cloned().collect();

        MzSpectrum::new(mz_combined, intensity_combined)
    }
}

impl std::ops::Mul<f64> for MzSpectrum {
    type Output = Self;
    fn mul(self, scale: f64) -> Self::Output {
        let scaled_intensities: Vec<f64> = self.intensity.iter().map(|i| scale * i).collect();
        Self { mz: self.mz, intensity: scaled_intensities }
    }
}

/// Formats the `MzSpectrum` for display.
impl Display for MzSpectrum {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.base_peak_index() {
            Some(index) => write!(
                f,
                "MzSpectrum(data points: {}, max by intensity: ({:.3}, {}))",
                self.mz.len(), self.mz[index], self.intensity[index]
            ),
            None => write!(f, "MzSpectrum(empty)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_ranged() {
        let spectrum = MzSpectrum::new(vec![100.0, 200.0, 300.0, 400.0], vec![10.0, 0.5, 30.0, 40.0]);
        let filtered = spectrum.filter_ranged(150.0, 450.0, 1.0, 1e9);

        assert_eq!(filtered.mz, vec![300.0, 400.0]);
        assert_eq!(filtered.intensity, vec![30.0, 40.0]);
    }

    #[test]
    fn test_add_merges_matching_mz() {
        let a = MzSpectrum::new(vec![100.0, 200.0], vec![1.0, 2.0]);
        let b = MzSpectrum::new(vec![100.0, 300.0], vec![3.0, 4.0]);

        let combined = a + b;

        assert_eq!(combined.mz, vec![100.0, 200.0, 300.0]);
        assert_eq!(combined.intensity, vec![4.0, 2.0, 4.0]);
    }

    #[test]
    fn test_base_peak_index() {
        let spectrum = MzSpectrum::new(vec![100.0, 200.0, 300.0], vec![5.0, 50.0, 20.0]);
        assert_eq!(spectrum.base_peak_index(), Some(1));

        let empty = MzSpectrum::new(vec![], vec![]);
        assert_eq!(empty.base_peak_index(), None);
    }
}
