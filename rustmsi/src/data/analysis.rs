use std::fmt::Display;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use crate::data::meta::AnalysisMeta;
use crate::data::utility::{decode_f64_blob, encode_f64_blob};

// Compression level for output blobs; outputs are written once and read often.
const OUTPUT_COMPRESSION_LEVEL: i32 = 3;

/// What an analysis dependency points at.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyKind {
    Dataset,
    Analysis,
}

impl DependencyKind {
    pub fn to_str(&self) -> &str {
        match self {
            DependencyKind::Dataset => "dataset",
            DependencyKind::Analysis => "analysis",
        }
    }
}

impl Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl TryFrom<&str> for DependencyKind {
    type Error = String;

    fn try_from(item: &str) -> Result<Self, Self::Error> {
        match item {
            "dataset" => Ok(DependencyKind::Dataset),
            "analysis" => Ok(DependencyKind::Analysis),
            other => Err(format!("unknown dependency kind: {}", other)),
        }
    }
}

/// One input parameter of an executed analysis, stored with its value and a
/// help text describing it.
#[derive(Debug, Clone)]
pub struct AnalysisParameter {
    pub name: String,
    pub value: Value,
    pub help: String,
}

impl AnalysisParameter {
    pub fn new(name: &str, value: Value, help: &str) -> Self {
        AnalysisParameter { name: name.to_string(), value, help: help.to_string() }
    }
}

/// A link from an analysis input to a dataset or a prior analysis of the same
/// experiment.
#[derive(Debug, Clone)]
pub struct AnalysisDependency {
    pub parameter_name: String,
    pub kind: DependencyKind,
    pub target: usize,
}

/// A named n-dimensional output of an analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl AnalysisOutput {
    /// # Errors
    ///
    /// Returns an error if the data length does not match the shape.
    pub fn new(name: &str, shape: Vec<usize>, data: Vec<f64>) -> Result<Self, Box<dyn std::error::Error>> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(format!(
                "output '{}': data length {} does not match shape {:?}",
                name, data.len(), shape
            ).into());
        }
        Ok(AnalysisOutput { name: name.to_string(), shape, data })
    }
}

/// Everything an executed analysis persists into the container: identity,
/// parameters, runtime information, dependency links, numeric outputs and
/// optional structured binary blobs.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRecord {
    pub identifier: String,
    pub analysis_type: String,
    pub parameters: Vec<AnalysisParameter>,
    pub run_info: Vec<(String, Value)>,
    pub dependencies: Vec<AnalysisDependency>,
    pub outputs: Vec<AnalysisOutput>,
    pub blobs: Vec<(String, Vec<u8>)>,
}

/// Writes an analysis record into the container and returns the new analysis
/// index within the experiment.
///
/// All rows are written in one transaction. Identifiers must be unique per
/// experiment and dependency targets must already exist.
pub fn store_analysis(conn: &Connection, experiment_id: i64, record: &AnalysisRecord) -> Result<usize, Box<dyn std::error::Error>> {
    if record.identifier.is_empty() {
        return Err("analysis identifier must not be empty".into());
    }
    if record.analysis_type.is_empty() {
        return Err("analysis type must not be empty".into());
    }

    // reject colliding identifiers instead of renaming them
    let duplicate: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM analyses WHERE experiment_id = ?1 AND identifier = ?2)",
        params![experiment_id, record.identifier],
        |row| row.get(0),
    )?;
    if duplicate {
        return Err(format!(
            "analysis identifier '{}' already exists in experiment {}",
            record.identifier, experiment_id
        ).into());
    }

    let id: i64 = conn.query_row(
        "SELECT COUNT(*) FROM analyses WHERE experiment_id = ?1",
        params![experiment_id],
        |row| row.get(0),
    )?;

    // validate dependency targets before touching the file
    let dataset_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM datasets WHERE experiment_id = ?1",
        params![experiment_id],
        |row| row.get(0),
    )?;
    for dependency in &record.dependencies {
        let valid = match dependency.kind {
            DependencyKind::Dataset => (dependency.target as i64) < dataset_count,
            DependencyKind::Analysis => (dependency.target as i64) < id,
        };
        if !valid {
            return Err(format!(
                "dependency '{}' points at missing {} {}",
                dependency.parameter_name, dependency.kind, dependency.target
            ).into());
        }
    }

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO analyses (experiment_id, id, identifier, analysis_type, created) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![experiment_id, id, record.identifier, record.analysis_type, Utc::now().to_rfc3339()],
    )?;

    for parameter in &record.parameters {
        tx.execute(
            "INSERT INTO analysis_parameters (experiment_id, analysis_id, name, value, help) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![experiment_id, id, parameter.name, serde_json::to_string(&parameter.value)?, parameter.help],
        )?;
    }

    for (key, value) in &record.run_info {
        tx.execute(
            "INSERT INTO analysis_run_info (experiment_id, analysis_id, key, value) VALUES (?1, ?2, ?3, ?4)",
            params![experiment_id, id, key, serde_json::to_string(value)?],
        )?;
    }

    for dependency in &record.dependencies {
        tx.execute(
            "INSERT INTO analysis_dependencies (experiment_id, analysis_id, parameter_name, kind, target_id) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![experiment_id, id, dependency.parameter_name, dependency.kind.to_str(), dependency.target as i64],
        )?;
    }

    for output in &record.outputs {
        let expected: usize = output.shape.iter().product();
        if expected != output.data.len() {
            return Err(format!(
                "output '{}': data length {} does not match shape {:?}",
                output.name, output.data.len(), output.shape
            ).into());
        }
        tx.execute(
            "INSERT INTO analysis_outputs (experiment_id, analysis_id, name, shape, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                experiment_id,
                id,
                output.name,
                serde_json::to_string(&output.shape)?,
                encode_f64_blob(&output.data, OUTPUT_COMPRESSION_LEVEL)?
            ],
        )?;
    }

    for (name, blob) in &record.blobs {
        tx.execute(
            "INSERT INTO analysis_blobs (experiment_id, analysis_id, name, data) VALUES (?1, ?2, ?3, ?4)",
            params![experiment_id, id, name, blob],
        )?;
    }

    tx.commit()?;
    debug!("stored analysis {} ({}) as index {}", record.identifier, record.analysis_type, id);
    Ok(id as usize)
}

/// Read access to one stored analysis.
pub struct StoredAnalysis<'a> {
    conn: &'a Connection,
    pub meta: AnalysisMeta,
}

impl<'a> StoredAnalysis<'a> {
    pub fn new(conn: &'a Connection, experiment_id: i64, analysis_id: i64) -> Result<StoredAnalysis<'a>, Box<dyn std::error::Error>> {
        let result = conn.query_row(
            "SELECT identifier, analysis_type, created FROM analyses WHERE experiment_id = ?1 AND id = ?2",
            params![experiment_id, analysis_id],
            |row| {
                Ok(AnalysisMeta {
                    experiment_id,
                    id: analysis_id,
                    identifier: row.get(0)?,
                    analysis_type: row.get(1)?,
                    created: row.get(2)?,
                })
            },
        );

        match result {
            Ok(meta) => Ok(StoredAnalysis { conn, meta }),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(format!("analysis {} not found in experiment {}", analysis_id, experiment_id).into())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.meta.identifier
    }

    pub fn analysis_type(&self) -> &str {
        &self.meta.analysis_type
    }

    pub fn index(&self) -> usize {
        self.meta.id as usize
    }

    pub fn parameters(&self) -> Result<Vec<AnalysisParameter>, Box<dyn std::error::Error>> {
        let mut statement = self.conn.prepare(
            "SELECT name, value, help FROM analysis_parameters \
             WHERE experiment_id = ?1 AND analysis_id = ?2 ORDER BY name",
        )?;
        let rows: Result<Vec<(String, String, String)>, _> = statement
            .query_map(params![self.meta.experiment_id, self.meta.id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect();

        let mut parameters = Vec::new();
        for (name, value, help) in rows? {
            parameters.push(AnalysisParameter { name, value: serde_json::from_str(&value)?, help });
        }
        Ok(parameters)
    }

    pub fn run_info(&self) -> Result<Vec<(String, Value)>, Box<dyn std::error::Error>> {
        let mut statement = self.conn.prepare(
            "SELECT key, value FROM analysis_run_info \
             WHERE experiment_id = ?1 AND analysis_id = ?2 ORDER BY key",
        )?;
        let rows: Result<Vec<(String, String)>, _> = statement
            .query_map(params![self.meta.experiment_id, self.meta.id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect();

        let mut run_info = Vec::new();
        for (key, value) in rows? {
            run_info.push((key, serde_json::from_str(&value)?));
        }
        Ok(run_info)
    }

    pub fn dependencies(&self) -> Result<Vec<AnalysisDependency>, Box<dyn std::error::Error>> {
        let mut statement = self.conn.prepare(
            "SELECT parameter_name, kind, target_id FROM analysis_dependencies \
             WHERE experiment_id = ?1 AND analysis_id = ?2 ORDER BY parameter_name",
        )?;
        let rows: Result<Vec<(String, String, i64)>, _> = statement
            .query_map(params![self.meta.experiment_id, self.meta.id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect();

        let mut dependencies = Vec::new();
        for (parameter_name, kind, target) in rows? {
            dependencies.push(AnalysisDependency {
                parameter_name,
                kind: DependencyKind::try_from(kind.as_str())?,
                target: target as usize,
            });
        }
        Ok(dependencies)
    }

    pub fn output_names(&self) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let mut statement = self.conn.prepare(
            "SELECT name FROM analysis_outputs WHERE experiment_id = ?1 AND analysis_id = ?2 ORDER BY name",
        )?;
        let rows: Result<Vec<String>, _> = statement
            .query_map(params![self.meta.experiment_id, self.meta.id], |row| row.get(0))?
            .collect();
        Ok(rows?)
    }

    /// Loads a named output, returning its shape and flat data.
    pub fn output(&self, name: &str) -> Result<AnalysisOutput, Box<dyn std::error::Error>> {
        let result = self.conn.query_row(
            "SELECT shape, data FROM analysis_outputs \
             WHERE experiment_id = ?1 AND analysis_id = ?2 AND name = ?3",
            params![self.meta.experiment_id, self.meta.id, name],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
        );

        let (shape, blob) = match result {
            Ok(value) => value,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(format!("analysis '{}' has no output '{}'", self.meta.identifier, name).into());
            }
            Err(error) => return Err(error.into()),
        };

        let shape: Vec<usize> = serde_json::from_str(&shape)?;
        let data = decode_f64_blob(&blob)?;
        AnalysisOutput::new(name, shape, data)
    }

    /// Loads a named structured blob, e.g. a bincode-encoded peak list.
    pub fn blob(&self, name: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        let result = self.conn.query_row(
            "SELECT data FROM analysis_blobs \
             WHERE experiment_id = ?1 AND analysis_id = ?2 AND name = ?3",
            params![self.meta.experiment_id, self.meta.id, name],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match result {
            Ok(blob) => Ok(blob),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(format!("analysis '{}' has no blob '{}'", self.meta.identifier, name).into())
            }
            Err(error) => Err(error.into()),
        }
    }
}
