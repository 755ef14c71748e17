extern crate rusqlite;

use rusqlite::{Connection, Result};
use serde::Serialize;

/// Name stored in the container's global metadata table.
pub const FORMAT_NAME: &str = "rustmsi-container";
/// Bumped when the schema changes incompatibly.
pub const FORMAT_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct GlobalMetadata {
    pub format_name: String,
    pub format_version: i64,
    pub created: String,
    pub writer_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentMeta {
    pub id: i64,
    pub created: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetMeta {
    pub experiment_id: i64,
    pub id: i64,
    pub rows: i64,
    pub cols: i64,
    pub num_channels: i64,
    pub compression_level: i64,
    pub created: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisMeta {
    pub experiment_id: i64,
    pub id: i64,
    pub identifier: String,
    pub analysis_type: String,
    pub created: String,
}

struct GlobalMetaInternal {
    key: String,
    value: String,
}

// Read the key/value global metadata table
pub fn read_global_meta(conn: &Connection) -> Result<GlobalMetadata, Box<dyn std::error::Error>> {
    // execute the query
    let rows: Result<Vec<GlobalMetaInternal>, _> = conn.prepare("SELECT key, value FROM global_metadata")?.query_map([], |row| {
        Ok(GlobalMetaInternal {
            key: row.get(0)?,
            value: row.get(1)?,
        })
    })?.collect();

    let mut global_meta = GlobalMetadata {
        format_name: String::new(),
        format_version: -1,
        created: String::new(),
        writer_version: String::new(),
    };

    // go over the keys and parse values for the global meta data
    for row in rows? {
        match row.key.as_str() {
            "format_name" => global_meta.format_name = row.value,
            "format_version" => global_meta.format_version = row.value.parse::<i64>()?,
            "created" => global_meta.created = row.value,
            "writer_version" => global_meta.writer_version = row.value,
            _ => (),
        }
    }

    Ok(global_meta)
}

pub fn read_experiment_meta(conn: &Connection) -> Result<Vec<ExperimentMeta>, Box<dyn std::error::Error>> {
    // prepare the query
    let query = "SELECT id, created FROM experiments ORDER BY id";

    // execute the query
    let rows: Result<Vec<ExperimentMeta>, _> = conn.prepare(query)?.query_map([], |row| {
        Ok(ExperimentMeta {
            id: row.get(0)?,
            created: row.get(1)?,
        })
    })?.collect();

    Ok(rows?)
}

pub fn read_dataset_meta(conn: &Connection, experiment_id: i64) -> Result<Vec<DatasetMeta>, Box<dyn std::error::Error>> {
    // prepare the query
    let query = "SELECT experiment_id, id, rows, cols, num_channels, compression_level, created \
                 FROM datasets WHERE experiment_id = ?1 ORDER BY id";

    // execute the query
    let rows: Result<Vec<DatasetMeta>, _> = conn.prepare(query)?.query_map([experiment_id], |row| {
        Ok(DatasetMeta {
            experiment_id: row.get(0)?,
            id: row.get(1)?,
            rows: row.get(2)?,
            cols: row.get(3)?,
            num_channels: row.get(4)?,
            compression_level: row.get(5)?,
            created: row.get(6)?,
        })
    })?.collect();

    Ok(rows?)
}

pub fn read_analysis_meta(conn: &Connection, experiment_id: i64) -> Result<Vec<AnalysisMeta>, Box<dyn std::error::Error>> {
    // prepare the query
    let query = "SELECT experiment_id, id, identifier, analysis_type, created \
                 FROM analyses WHERE experiment_id = ?1 ORDER BY id";

    // execute the query
    let rows: Result<Vec<AnalysisMeta>, _> = conn.prepare(query)?.query_map([experiment_id], |row| {
        Ok(AnalysisMeta {
            experiment_id: row.get(0)?,
            id: row.get(1)?,
            identifier: row.get(2)?,
            analysis_type: row.get(3)?,
            created: row.get(4)?,
        })
    })?.collect();

    Ok(rows?)
}
