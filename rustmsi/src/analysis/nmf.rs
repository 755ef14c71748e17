use nalgebra::DMatrix;
use serde_json::json;

use msicore::algorithm::nmf::{factorize, NmfConfig};
use crate::analysis::base::{Analysis, RunTimer};
use crate::data::analysis::{
    AnalysisDependency, AnalysisOutput, AnalysisParameter, AnalysisRecord, DependencyKind,
};
use crate::data::container::ExperimentHandle;

/// Non-negative matrix factorization of the peak matrix produced by a prior
/// peak finding analysis. Outputs:
///
/// * `wmatrix` - per-pixel component activations, shape `[rows, cols, rank]`
/// * `hmatrix` - component spectra over the peaks, shape `[rank, peaks]`
pub struct NmfAnalysis {
    pub identifier: String,
    /// Identifier of the peak finding analysis providing `peak_cube`.
    pub source: String,
    pub config: NmfConfig,
}

impl NmfAnalysis {
    pub fn new(identifier: &str, source: &str, config: NmfConfig) -> Self {
        NmfAnalysis { identifier: identifier.to_string(), source: source.to_string(), config }
    }
}

impl Analysis for NmfAnalysis {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn analysis_type(&self) -> &str {
        "nmf"
    }

    fn parameters(&self) -> Vec<AnalysisParameter> {
        vec![
            AnalysisParameter::new("msidata", json!(self.source), "identifier of the source peak analysis"),
            AnalysisParameter::new("rank", json!(self.config.rank), "number of components"),
            AnalysisParameter::new("max_iter", json!(self.config.max_iter), "maximum number of update iterations"),
            AnalysisParameter::new("tolerance", json!(self.config.tolerance), "relative error change stopping threshold"),
            AnalysisParameter::new("seed", json!(self.config.seed), "random seed for the factor initialization"),
        ]
    }

    fn execute(&self, experiment: &ExperimentHandle) -> Result<AnalysisRecord, Box<dyn std::error::Error>> {
        let timer = RunTimer::start();

        let source = experiment.analysis_by_identifier(&self.source)?;
        let peak_cube = source.output("peak_cube")?;
        if peak_cube.shape.len() != 3 {
            return Err(format!("peak_cube of '{}' has shape {:?}, expected 3 dimensions", self.source, peak_cube.shape).into());
        }
        let (rows, cols, num_peaks) = (peak_cube.shape[0], peak_cube.shape[1], peak_cube.shape[2]);

        let matrix = DMatrix::<f64>::from_row_slice(rows * cols, num_peaks, &peak_cube.data);
        let result = factorize(&matrix, &self.config)?;

        // flatten both factors row-major
        let mut wmatrix = Vec::with_capacity(rows * cols * self.config.rank);
        for pixel in 0..rows * cols {
            for component in 0..self.config.rank {
                wmatrix.push(result.w[(pixel, component)]);
            }
        }
        let mut hmatrix = Vec::with_capacity(self.config.rank * num_peaks);
        for component in 0..self.config.rank {
            for peak in 0..num_peaks {
                hmatrix.push(result.h[(component, peak)]);
            }
        }

        let mut run_info = timer.finish();
        run_info.push(("iterations".to_string(), json!(result.iterations)));
        run_info.push(("converged".to_string(), json!(result.converged)));
        run_info.push(("reconstruction_error".to_string(), json!(result.reconstruction_error)));

        Ok(AnalysisRecord {
            identifier: self.identifier.clone(),
            analysis_type: self.analysis_type().to_string(),
            parameters: self.parameters(),
            run_info,
            dependencies: vec![AnalysisDependency {
                parameter_name: "msidata".to_string(),
                kind: DependencyKind::Analysis,
                target: source.index(),
            }],
            outputs: vec![
                AnalysisOutput::new("wmatrix", vec![rows, cols, self.config.rank], wmatrix)?,
                AnalysisOutput::new("hmatrix", vec![self.config.rank, num_peaks], hmatrix)?,
            ],
            blobs: vec![],
        })
    }
}
