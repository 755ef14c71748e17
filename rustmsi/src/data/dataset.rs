use rusqlite::{params, Connection};

use msicore::data::cube::MsiCube;
use msicore::data::spectrum::MzSpectrum;
use crate::data::meta::DatasetMeta;
use crate::data::utility::decode_f64_blob;

/// Read access to one stored MSI dataset.
pub trait MsiData {
    // Image dimensions as (rows, cols, channels)
    fn dims(&self) -> (usize, usize, usize);
    // The shared m/z axis of the dataset
    fn mz_axis(&self) -> &[f64];
    // The spectrum of a single pixel
    fn spectrum(&self, x: usize, y: usize) -> Result<MzSpectrum, Box<dyn std::error::Error>>;
    // The full cube, decoded into memory
    fn cube(&self) -> Result<MsiCube, Box<dyn std::error::Error>>;
}

/// A connection-backed dataset that decodes pixel blobs on demand.
///
/// Metadata and the m/z axis are loaded eagerly on construction, spectra stay
/// in the container until requested.
pub struct MsiDataset<'a> {
    conn: &'a Connection,
    pub meta: DatasetMeta,
    mz: Vec<f64>,
}

impl<'a> MsiDataset<'a> {
    pub fn new(conn: &'a Connection, experiment_id: i64, dataset_id: i64) -> Result<MsiDataset<'a>, Box<dyn std::error::Error>> {
        let result = conn.query_row(
            "SELECT rows, cols, num_channels, compression_level, created, mz_axis \
             FROM datasets WHERE experiment_id = ?1 AND id = ?2",
            params![experiment_id, dataset_id],
            |row| {
                Ok((
                    DatasetMeta {
                        experiment_id,
                        id: dataset_id,
                        rows: row.get(0)?,
                        cols: row.get(1)?,
                        num_channels: row.get(2)?,
                        compression_level: row.get(3)?,
                        created: row.get(4)?,
                    },
                    row.get::<_, Vec<u8>>(5)?,
                ))
            },
        );

        let (meta, mz_blob) = match result {
            Ok(value) => value,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(format!("dataset {} not found in experiment {}", dataset_id, experiment_id).into());
            }
            Err(error) => return Err(error.into()),
        };

        let mz = decode_f64_blob(&mz_blob)?;
        if mz.len() != meta.num_channels as usize {
            return Err(format!(
                "m/z axis length {} disagrees with dataset metadata ({} channels)",
                mz.len(), meta.num_channels
            ).into());
        }

        Ok(MsiDataset { conn, meta, mz })
    }
}

impl<'a> MsiData for MsiDataset<'a> {
    fn dims(&self) -> (usize, usize, usize) {
        (self.meta.rows as usize, self.meta.cols as usize, self.meta.num_channels as usize)
    }

    fn mz_axis(&self) -> &[f64] {
        &self.mz
    }

    fn spectrum(&self, x: usize, y: usize) -> Result<MzSpectrum, Box<dyn std::error::Error>> {
        let (rows, cols, _) = self.dims();
        if x >= rows || y >= cols {
            return Err(format!("pixel ({}, {}) out of bounds for {}x{} image", x, y, rows, cols).into());
        }
        let pixel_id = (x * cols + y) as i64;

        let blob: Vec<u8> = self.conn.query_row(
            "SELECT data FROM spectra WHERE experiment_id = ?1 AND dataset_id = ?2 AND pixel_id = ?3",
            params![self.meta.experiment_id, self.meta.id, pixel_id],
            |row| row.get(0),
        )?;

        let intensity = decode_f64_blob(&blob)?;
        Ok(MzSpectrum::new(self.mz.clone(), intensity))
    }

    fn cube(&self) -> Result<MsiCube, Box<dyn std::error::Error>> {
        let (rows, cols, num_channels) = self.dims();

        let mut statement = self.conn.prepare(
            "SELECT pixel_id, data FROM spectra \
             WHERE experiment_id = ?1 AND dataset_id = ?2 ORDER BY pixel_id",
        )?;
        let blobs: Result<Vec<(i64, Vec<u8>)>, _> = statement
            .query_map(params![self.meta.experiment_id, self.meta.id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect();
        let blobs = blobs?;

        if blobs.len() != rows * cols {
            return Err(format!(
                "dataset {} holds {} spectra, expected {}",
                self.meta.id, blobs.len(), rows * cols
            ).into());
        }

        let mut intensity = Vec::with_capacity(rows * cols * num_channels);
        for (pixel_id, blob) in blobs {
            let values = decode_f64_blob(&blob)?;
            if values.len() != num_channels {
                return Err(format!("pixel {} holds {} channels, expected {}", pixel_id, values.len(), num_channels).into());
            }
            intensity.extend_from_slice(&values);
        }

        MsiCube::new(rows, cols, self.mz.clone(), intensity)
    }
}
