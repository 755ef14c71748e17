use serde_json::json;

use msicore::algorithm::peaks::{global_peaks, top_n_peaks, PeakPickingConfig};
use crate::analysis::base::{Analysis, RunTimer};
use crate::data::analysis::{
    AnalysisDependency, AnalysisOutput, AnalysisParameter, AnalysisRecord, DependencyKind,
};
use crate::data::container::ExperimentHandle;
use crate::data::dataset::MsiData;

/// Global peak finding over a stored MSI dataset.
///
/// Peaks are picked on the mean spectrum of the cube, then the cube is
/// reduced to the intensities at the apex channels. Outputs:
///
/// * `peak_mz` - apex m/z values, shape `[peaks]`
/// * `peak_cube` - apex intensities per pixel, shape `[rows, cols, peaks]`
///
/// The structured peak list is additionally stored as a bincode blob named
/// `peak_list`.
pub struct FindPeaksGlobal {
    pub identifier: String,
    /// Index of the source dataset within the experiment.
    pub dataset: usize,
    pub config: PeakPickingConfig,
    /// Optional cap on the number of peaks, keeping the most intense ones.
    pub max_peaks: Option<usize>,
}

impl FindPeaksGlobal {
    pub fn new(identifier: &str, dataset: usize, config: PeakPickingConfig, max_peaks: Option<usize>) -> Self {
        FindPeaksGlobal { identifier: identifier.to_string(), dataset, config, max_peaks }
    }
}

impl Analysis for FindPeaksGlobal {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn analysis_type(&self) -> &str {
        "findpeaks_global"
    }

    fn parameters(&self) -> Vec<AnalysisParameter> {
        vec![
            AnalysisParameter::new("msidata", json!(self.dataset), "index of the source dataset"),
            AnalysisParameter::new("smooth_sigma", json!(self.config.smooth_sigma), "gaussian smoothing sigma in channels"),
            AnalysisParameter::new("truncate", json!(self.config.truncate), "smoothing kernel radius in sigmas"),
            AnalysisParameter::new("min_snr", json!(self.config.min_snr), "minimum prominence over the noise level"),
            AnalysisParameter::new("min_distance", json!(self.config.min_distance), "minimum apex distance in channels"),
            AnalysisParameter::new("max_peaks", json!(self.max_peaks), "optional cap on the number of peaks"),
        ]
    }

    fn execute(&self, experiment: &ExperimentHandle) -> Result<AnalysisRecord, Box<dyn std::error::Error>> {
        let timer = RunTimer::start();

        let dataset = experiment.dataset(self.dataset)?;
        let cube = dataset.cube()?;

        let mut peaks = global_peaks(&cube, &self.config);
        if let Some(max_peaks) = self.max_peaks {
            peaks = top_n_peaks(peaks, max_peaks);
        }

        let indices: Vec<usize> = peaks.iter().map(|peak| peak.index).collect();
        let peak_mz: Vec<f64> = peaks.iter().map(|peak| peak.mz).collect();

        // reduce the cube to the apex channels, row-major over pixels
        let matrix = cube.to_peak_matrix(&indices)?;
        let mut peak_cube = Vec::with_capacity(matrix.nrows() * matrix.ncols());
        for pixel in 0..matrix.nrows() {
            for column in 0..matrix.ncols() {
                peak_cube.push(matrix[(pixel, column)]);
            }
        }

        let peak_list = bincode::encode_to_vec(&peaks, bincode::config::standard())?;

        let mut run_info = timer.finish();
        run_info.push(("num_peaks".to_string(), json!(peaks.len())));

        Ok(AnalysisRecord {
            identifier: self.identifier.clone(),
            analysis_type: self.analysis_type().to_string(),
            parameters: self.parameters(),
            run_info,
            dependencies: vec![AnalysisDependency {
                parameter_name: "msidata".to_string(),
                kind: DependencyKind::Dataset,
                target: self.dataset,
            }],
            outputs: vec![
                AnalysisOutput::new("peak_mz", vec![peak_mz.len()], peak_mz)?,
                AnalysisOutput::new("peak_cube", vec![cube.rows, cube.cols, indices.len()], peak_cube)?,
            ],
            blobs: vec![("peak_list".to_string(), peak_list)],
        })
    }
}
