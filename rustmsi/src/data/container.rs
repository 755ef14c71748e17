use std::path::{Path, PathBuf};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use msicore::data::cube::MsiCube;
use crate::data::analysis::{store_analysis, AnalysisRecord, StoredAnalysis};
use crate::data::dataset::MsiDataset;
use crate::data::meta::{
    read_analysis_meta, read_dataset_meta, read_experiment_meta, read_global_meta,
    AnalysisMeta, DatasetMeta, ExperimentMeta, FORMAT_NAME, FORMAT_VERSION,
};
use crate::data::utility::{compress_spectra, encode_f64_blob};

const SCHEMA: &str = "
CREATE TABLE global_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE experiments (
    id INTEGER PRIMARY KEY,
    created TEXT NOT NULL
);
CREATE TABLE datasets (
    experiment_id INTEGER NOT NULL,
    id INTEGER NOT NULL,
    rows INTEGER NOT NULL,
    cols INTEGER NOT NULL,
    num_channels INTEGER NOT NULL,
    compression_level INTEGER NOT NULL,
    created TEXT NOT NULL,
    mz_axis BLOB NOT NULL,
    PRIMARY KEY (experiment_id, id)
);
CREATE TABLE spectra (
    experiment_id INTEGER NOT NULL,
    dataset_id INTEGER NOT NULL,
    pixel_id INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (experiment_id, dataset_id, pixel_id)
);
CREATE TABLE analyses (
    experiment_id INTEGER NOT NULL,
    id INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    analysis_type TEXT NOT NULL,
    created TEXT NOT NULL,
    PRIMARY KEY (experiment_id, id),
    UNIQUE (experiment_id, identifier)
);
CREATE TABLE analysis_parameters (
    experiment_id INTEGER NOT NULL,
    analysis_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    help TEXT NOT NULL,
    PRIMARY KEY (experiment_id, analysis_id, name)
);
CREATE TABLE analysis_run_info (
    experiment_id INTEGER NOT NULL,
    analysis_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (experiment_id, analysis_id, key)
);
CREATE TABLE analysis_dependencies (
    experiment_id INTEGER NOT NULL,
    analysis_id INTEGER NOT NULL,
    parameter_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    PRIMARY KEY (experiment_id, analysis_id, parameter_name)
);
CREATE TABLE analysis_outputs (
    experiment_id INTEGER NOT NULL,
    analysis_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    shape TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (experiment_id, analysis_id, name)
);
CREATE TABLE analysis_blobs (
    experiment_id INTEGER NOT NULL,
    analysis_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (experiment_id, analysis_id, name)
);
";

/// A container file holding experiments, MSI datasets and analysis results.
///
/// The container is a single SQLite database; spectra and analysis outputs
/// are stored as zstd-compressed binary blobs next to the metadata tables.
pub struct MsiContainer {
    pub conn: Connection,
    pub path: PathBuf,
}

impl MsiContainer {
    /// Creates a new container file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<MsiContainer, Box<dyn std::error::Error>> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(format!("container already exists: {}", path.display()).into());
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;

        // write the global metadata
        let pairs = [
            ("format_name", FORMAT_NAME.to_string()),
            ("format_version", FORMAT_VERSION.to_string()),
            ("created", Utc::now().to_rfc3339()),
            ("writer_version", env!("CARGO_PKG_VERSION").to_string()),
        ];
        for (key, value) in pairs {
            conn.execute("INSERT INTO global_metadata (key, value) VALUES (?1, ?2)", params![key, value])?;
        }

        info!("created container {}", path.display());
        Ok(MsiContainer { conn, path })
    }

    /// Opens an existing container read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MsiContainer, Box<dyn std::error::Error>> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    /// Opens an existing container read-only.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<MsiContainer, Box<dyn std::error::Error>> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn open_with_flags<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<MsiContainer, Box<dyn std::error::Error>> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(format!("container not found: {}", path.display()).into());
        }

        let conn = Connection::open_with_flags(&path, flags)?;

        // reject foreign or newer files up front
        let global_meta = read_global_meta(&conn)?;
        if global_meta.format_name != FORMAT_NAME {
            return Err(format!("not a rustmsi container: {}", path.display()).into());
        }
        if global_meta.format_version > FORMAT_VERSION {
            return Err(format!(
                "container version {} is newer than supported version {}",
                global_meta.format_version, FORMAT_VERSION
            ).into());
        }

        Ok(MsiContainer { conn, path })
    }

    pub fn global_meta(&self) -> Result<crate::data::meta::GlobalMetadata, Box<dyn std::error::Error>> {
        read_global_meta(&self.conn)
    }

    pub fn experiment_count(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM experiments", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn experiments(&self) -> Result<Vec<ExperimentMeta>, Box<dyn std::error::Error>> {
        read_experiment_meta(&self.conn)
    }

    /// Adds a new experiment group and returns its index.
    ///
    /// Indices are dense and 0-based in creation order, the container-level
    /// counterpart of the original entry numbering.
    pub fn create_experiment(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let id = self.experiment_count()? as i64;
        self.conn.execute(
            "INSERT INTO experiments (id, created) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )?;
        debug!("created experiment {}", id);
        Ok(id as usize)
    }

    /// Returns a handle for the experiment with the given index.
    pub fn experiment(&self, index: usize) -> Result<ExperimentHandle<'_>, Box<dyn std::error::Error>> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM experiments WHERE id = ?1)",
            params![index as i64],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(format!("experiment {} not found in {}", index, self.path.display()).into());
        }
        Ok(ExperimentHandle { conn: &self.conn, id: index as i64 })
    }
}

/// A lightweight handle on one experiment group of an open container.
pub struct ExperimentHandle<'a> {
    pub conn: &'a Connection,
    pub id: i64,
}

impl<'a> ExperimentHandle<'a> {
    pub fn dataset_count(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM datasets WHERE experiment_id = ?1",
            params![self.id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn datasets(&self) -> Result<Vec<DatasetMeta>, Box<dyn std::error::Error>> {
        read_dataset_meta(self.conn, self.id)
    }

    /// Stores a cube as a new MSI dataset of this experiment and returns the
    /// dataset index.
    ///
    /// The m/z axis is stored once per dataset, pixel spectra are compressed
    /// in parallel and written in one transaction, so a failed import leaves
    /// no partial dataset behind.
    pub fn add_dataset(&self, cube: &MsiCube, compression_level: i32) -> Result<usize, Box<dyn std::error::Error>> {
        let id = self.dataset_count()? as i64;

        let num_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let blobs = compress_spectra(cube, compression_level, num_threads)?;
        let mz_blob = encode_f64_blob(&cube.mz, compression_level)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO datasets (experiment_id, id, rows, cols, num_channels, compression_level, created, mz_axis) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.id,
                id,
                cube.rows as i64,
                cube.cols as i64,
                cube.num_channels() as i64,
                compression_level as i64,
                Utc::now().to_rfc3339(),
                mz_blob
            ],
        )?;
        {
            let mut statement = tx.prepare(
                "INSERT INTO spectra (experiment_id, dataset_id, pixel_id, data) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (pixel_id, blob) in blobs.iter().enumerate() {
                statement.execute(params![self.id, id, pixel_id as i64, blob])?;
            }
        }
        tx.commit()?;

        info!(
            "stored dataset {} of experiment {} ({}x{} pixels, {} channels)",
            id, self.id, cube.rows, cube.cols, cube.num_channels()
        );
        Ok(id as usize)
    }

    /// Returns a lazy reader for the dataset with the given index.
    pub fn dataset(&self, index: usize) -> Result<MsiDataset<'a>, Box<dyn std::error::Error>> {
        MsiDataset::new(self.conn, self.id, index as i64)
    }

    /// Persists an executed analysis and returns its index.
    pub fn create_analysis(&self, record: &AnalysisRecord) -> Result<usize, Box<dyn std::error::Error>> {
        store_analysis(self.conn, self.id, record)
    }

    pub fn analysis_count(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM analyses WHERE experiment_id = ?1",
            params![self.id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn analyses(&self) -> Result<Vec<AnalysisMeta>, Box<dyn std::error::Error>> {
        read_analysis_meta(self.conn, self.id)
    }

    /// Identifiers of all analyses of this experiment, in index order.
    pub fn analysis_identifiers(&self) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        Ok(self.analyses()?.into_iter().map(|meta| meta.identifier).collect())
    }

    /// Returns a reader for the analysis with the given index.
    pub fn analysis(&self, index: usize) -> Result<StoredAnalysis<'a>, Box<dyn std::error::Error>> {
        StoredAnalysis::new(self.conn, self.id, index as i64)
    }

    /// Looks an analysis up by its identifier string.
    pub fn analysis_by_identifier(&self, identifier: &str) -> Result<StoredAnalysis<'a>, Box<dyn std::error::Error>> {
        let id: Option<i64> = self.conn.query_row(
            "SELECT id FROM analyses WHERE experiment_id = ?1 AND identifier = ?2",
            params![self.id, identifier],
            |row| row.get(0),
        ).map(Some).or_else(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

        match id {
            Some(id) => StoredAnalysis::new(self.conn, self.id, id),
            None => Err(format!("no analysis with identifier '{}' in experiment {}", identifier, self.id).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::MsiData;
    use tempfile::tempdir;

    fn test_cube() -> MsiCube {
        let mz: Vec<f64> = (0..16).map(|i| 100.0 + i as f64).collect();
        let intensity: Vec<f64> = (0..4 * 3 * 16).map(|i| (i % 17) as f64).collect();
        MsiCube::new(4, 3, mz, intensity).unwrap()
    }

    #[test]
    fn test_create_open_and_reject() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.msi");

        let container = MsiContainer::create(&path).unwrap();
        assert_eq!(container.experiment_count().unwrap(), 0);
        drop(container);

        // creating twice fails, opening works
        assert!(MsiContainer::create(&path).is_err());
        let container = MsiContainer::open(&path).unwrap();
        let meta = container.global_meta().unwrap();
        assert_eq!(meta.format_name, FORMAT_NAME);
        assert_eq!(meta.format_version, FORMAT_VERSION);

        // a missing file cannot be opened
        assert!(MsiContainer::open(dir.path().join("missing.msi")).is_err());
    }

    #[test]
    fn test_experiment_indices_are_dense() {
        let dir = tempdir().unwrap();
        let container = MsiContainer::create(dir.path().join("test.msi")).unwrap();

        assert_eq!(container.create_experiment().unwrap(), 0);
        assert_eq!(container.create_experiment().unwrap(), 1);
        assert_eq!(container.experiment_count().unwrap(), 2);
        assert!(container.experiment(2).is_err());
    }

    #[test]
    fn test_dataset_roundtrip() {
        let dir = tempdir().unwrap();
        let container = MsiContainer::create(dir.path().join("test.msi")).unwrap();
        container.create_experiment().unwrap();
        let experiment = container.experiment(0).unwrap();

        let cube = test_cube();
        let index = experiment.add_dataset(&cube, 3).unwrap();
        assert_eq!(index, 0);
        assert_eq!(experiment.dataset_count().unwrap(), 1);

        let dataset = experiment.dataset(0).unwrap();
        let restored = dataset.cube().unwrap();
        assert_eq!(restored.rows, cube.rows);
        assert_eq!(restored.cols, cube.cols);
        assert_eq!(restored.mz, cube.mz);
        assert_eq!(restored.intensity, cube.intensity);
    }
}
