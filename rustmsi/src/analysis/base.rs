use std::time::Instant;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::data::analysis::{AnalysisParameter, AnalysisRecord};
use crate::data::container::ExperimentHandle;

/// A runnable analysis step.
///
/// Implementations read their inputs from the experiment (a dataset or a
/// prior analysis), compute, and return a complete `AnalysisRecord` ready for
/// storage, including parameters, run information and dependency links.
pub trait Analysis {
    // User-chosen name of this analysis instance, unique per experiment
    fn identifier(&self) -> &str;
    // Name of the analysis kind, e.g. "findpeaks_global"
    fn analysis_type(&self) -> &str;
    // The input parameters as they will be persisted
    fn parameters(&self) -> Vec<AnalysisParameter>;
    // Run the analysis against the experiment
    fn execute(&self, experiment: &ExperimentHandle) -> Result<AnalysisRecord, Box<dyn std::error::Error>>;
}

/// Captures wall-clock and duration information around an analysis run.
pub struct RunTimer {
    started: Instant,
    start_time: DateTime<Utc>,
}

impl RunTimer {
    pub fn start() -> Self {
        RunTimer { started: Instant::now(), start_time: Utc::now() }
    }

    /// Finishes the timer and returns the standard run-info entries.
    pub fn finish(self) -> Vec<(String, Value)> {
        let execution_time = self.started.elapsed().as_secs_f64();
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        vec![
            ("start_time".to_string(), json!(self.start_time.to_rfc3339())),
            ("end_time".to_string(), json!(Utc::now().to_rfc3339())),
            ("execution_time".to_string(), json!(execution_time)),
            ("hostname".to_string(), json!(hostname)),
            ("writer_version".to_string(), json!(env!("CARGO_PKG_VERSION"))),
        ]
    }
}

/// Executes an analysis and stores its result, returning the analysis index.
///
/// Logs the settings before the run and the execution time afterwards.
pub fn run_and_store(analysis: &dyn Analysis, experiment: &ExperimentHandle) -> Result<usize, Box<dyn std::error::Error>> {
    info!("running {} '{}', inputs:", analysis.analysis_type(), analysis.identifier());
    for parameter in analysis.parameters() {
        info!("   {} = {}", parameter.name, parameter.value);
    }

    let record = analysis.execute(experiment)?;
    let index = experiment.create_analysis(&record)?;

    if let Some((_, seconds)) = record.run_info.iter().find(|(key, _)| key == "execution_time") {
        info!("time to execute analysis: {} s", seconds);
    }
    info!("saved analysis '{}' as index {}", record.identifier, index);
    Ok(index)
}
