use nalgebra::DMatrix;
use serde_json::json;

use msicore::algorithm::kmeans::{cluster, KmeansConfig};
use crate::analysis::base::{Analysis, RunTimer};
use crate::data::analysis::{
    AnalysisDependency, AnalysisOutput, AnalysisParameter, AnalysisRecord, DependencyKind,
};
use crate::data::container::ExperimentHandle;

/// K-means clustering of the pixels of a peak matrix produced by a prior
/// peak finding analysis. Outputs:
///
/// * `cluster_image` - cluster label per pixel, shape `[rows, cols]`
/// * `cluster_centers` - cluster centers over the peaks, shape `[k, peaks]`
pub struct KmeansAnalysis {
    pub identifier: String,
    /// Identifier of the peak finding analysis providing `peak_cube`.
    pub source: String,
    pub config: KmeansConfig,
}

impl KmeansAnalysis {
    pub fn new(identifier: &str, source: &str, config: KmeansConfig) -> Self {
        KmeansAnalysis { identifier: identifier.to_string(), source: source.to_string(), config }
    }
}

impl Analysis for KmeansAnalysis {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn analysis_type(&self) -> &str {
        "kmeans"
    }

    fn parameters(&self) -> Vec<AnalysisParameter> {
        vec![
            AnalysisParameter::new("msidata", json!(self.source), "identifier of the source peak analysis"),
            AnalysisParameter::new("k", json!(self.config.k), "number of clusters"),
            AnalysisParameter::new("max_iter", json!(self.config.max_iter), "maximum number of Lloyd iterations"),
            AnalysisParameter::new("tolerance", json!(self.config.tolerance), "centroid shift stopping threshold"),
            AnalysisParameter::new("seed", json!(self.config.seed), "random seed for the k-means++ init"),
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
        let result = cluster(&matrix, &self.config)?;

        let cluster_image: Vec<f64> = result.labels.iter().map(|&label| label as f64).collect();
        let mut cluster_centers = Vec::with_capacity(self.config.k * num_peaks);
        for center in 0..self.config.k {
            for peak in 0..num_peaks {
                cluster_centers.push(result.centroids[(center, peak)]);
            }
        }

        let mut run_info = timer.finish();
        run_info.push(("iterations".to_string(), json!(result.iterations)));
        run_info.push(("converged".to_string(), json!(result.converged)));
        run_info.push(("inertia".to_string(), json!(result.inertia)));

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
                AnalysisOutput::new("cluster_image", vec![rows, cols], cluster_image)?,
                AnalysisOutput::new("cluster_centers", vec![self.config.k, num_peaks], cluster_centers)?,
            ],
            blobs: vec![],
        })
    }
}
