use std::fs;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use msicore::data::cube::MsiCube;
use crate::data::utility::encode_f32_bytes;

// Analyze 7.5 header constants: total size, and the offset of the i16
// dimension block (dim[0] = rank, dim[1] = rows, dim[2] = cols).
const HDR_SIZE: usize = 348;
const HDR_DIM_OFFSET: usize = 40;

/// An instrument-export raw MSI file triple:
///
/// * `<stem>.hdr` - Analyze-style dimension header
/// * `<stem>.t2m` - little-endian f32 m/z axis
/// * `<stem>.img` - little-endian i16 intensities, pixel-major
pub struct ImgRawFile {
    pub stem: PathBuf,
    pub rows: usize,
    pub cols: usize,
    pub num_channels: usize,
}

impl ImgRawFile {
    /// Opens a raw file triple and validates it.
    ///
    /// # Arguments
    ///
    /// * `path` - The bare stem or the path of any of the three files.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the three files is missing, the header
    /// dimensions are not positive, or the img size does not match
    /// `rows * cols * channels * 2` bytes.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ImgRawFile, Box<dyn std::error::Error>> {
        let stem = path.as_ref().with_extension("");

        for extension in ["hdr", "t2m", "img"] {
            let file = stem.with_extension(extension);
            if !file.is_file() {
                return Err(format!("raw file part not found: {}", file.display()).into());
            }
        }

        // read the dimension block of the header
        let header = fs::read(stem.with_extension("hdr"))?;
        if header.len() < HDR_SIZE {
            return Err(format!("header too short: {} bytes, expected {}", header.len(), HDR_SIZE).into());
        }
        let mut cursor = Cursor::new(&header[HDR_DIM_OFFSET..HDR_DIM_OFFSET + 6]);
        let _rank = cursor.read_i16::<LittleEndian>()?;
        let rows = cursor.read_i16::<LittleEndian>()?;
        let cols = cursor.read_i16::<LittleEndian>()?;
        if rows <= 0 || cols <= 0 {
            return Err(format!("invalid image dimensions in header: {}x{}", rows, cols).into());
        }
        let rows = rows as usize;
        let cols = cols as usize;

        // the m/z axis length follows from the t2m file size
        let t2m_len = fs::metadata(stem.with_extension("t2m"))?.len() as usize;
        if t2m_len == 0 || t2m_len % 4 != 0 {
            return Err(format!("t2m size {} is not a non-empty multiple of 4", t2m_len).into());
        }
        let num_channels = t2m_len / 4;

        let img_len = fs::metadata(stem.with_extension("img"))?.len() as usize;
        let expected = rows * cols * num_channels * 2;
        if img_len != expected {
            return Err(format!(
                "img size {} does not match {}x{} pixels with {} channels (expected {})",
                img_len, rows, cols, num_channels, expected
            ).into());
        }

        Ok(ImgRawFile { stem, rows, cols, num_channels })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.num_channels)
    }

    /// Reads the m/z axis from the t2m file.
    pub fn read_mz_axis(&self) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
        let bytes = fs::read(self.stem.with_extension("t2m"))?;
        let mut axis = vec![0f32; bytes.len() / 4];
        LittleEndian::read_f32_into(&bytes, &mut axis);
        Ok(axis.iter().map(|&value| value as f64).collect())
    }

    /// Reads the full intensity cube from the img file.
    pub fn read_cube(&self) -> Result<MsiCube, Box<dyn std::error::Error>> {
        let mz = self.read_mz_axis()?;

        let mut file = File::open(self.stem.with_extension("img"))?;
        let mut bytes = Vec::with_capacity(self.rows * self.cols * self.num_channels * 2);
        file.read_to_end(&mut bytes)?;

        let mut values = vec![0i16; bytes.len() / 2];
        LittleEndian::read_i16_into(&bytes, &mut values);
        let intensity: Vec<f64> = values.iter().map(|&value| value as f64).collect();

        MsiCube::new(self.rows, self.cols, mz, intensity)
    }
}

/// Writes a cube as a raw file triple, the inverse of `ImgRawFile::open` +
/// `read_cube`. Intensities are clamped into the i16 range.
///
/// # Arguments
///
/// * `stem` - Target path without extension.
/// * `cube` - The cube to export.
pub fn write_img_triple<P: AsRef<Path>>(stem: P, cube: &MsiCube) -> Result<(), Box<dyn std::error::Error>> {
    let stem = stem.as_ref().with_extension("");

    // header: zeroed Analyze block with size and dimensions filled in
    let mut header = vec![0u8; HDR_SIZE];
    LittleEndian::write_i32(&mut header[..4], HDR_SIZE as i32);
    let mut cursor = Cursor::new(&mut header[HDR_DIM_OFFSET..HDR_DIM_OFFSET + 6]);
    cursor.write_i16::<LittleEndian>(2)?;
    cursor.write_i16::<LittleEndian>(cube.rows as i16)?;
    cursor.write_i16::<LittleEndian>(cube.cols as i16)?;
    fs::write(stem.with_extension("hdr"), header)?;

    // m/z axis
    let axis: Vec<f32> = cube.mz.iter().map(|&value| value as f32).collect();
    fs::write(stem.with_extension("t2m"), encode_f32_bytes(&axis))?;

    // intensities
    let mut img = File::create(stem.with_extension("img"))?;
    let mut bytes = Vec::with_capacity(cube.intensity.len() * 2);
    for &value in cube.intensity.iter() {
        let clamped = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        bytes.write_i16::<LittleEndian>(clamped)?;
    }
    img.write_all(&bytes)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_cube() -> MsiCube {
        let mz = vec![100.0, 150.0, 200.0, 250.0];
        let intensity: Vec<f64> = (0..3 * 2 * 4).map(|i| i as f64).collect();
        MsiCube::new(3, 2, mz, intensity).unwrap()
    }

    #[test]
    fn test_write_and_open_roundtrip() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("sample");

        let cube = test_cube();
        write_img_triple(&stem, &cube).unwrap();

        // opening works with the stem and with any member of the triple
        let raw = ImgRawFile::open(stem.with_extension("img")).unwrap();
        assert_eq!(raw.dims(), (3, 2, 4));

        let restored = raw.read_cube().unwrap();
        assert_eq!(restored.rows, cube.rows);
        assert_eq!(restored.cols, cube.cols);
        assert_eq!(restored.intensity, cube.intensity);
        for (a, b) in restored.mz.iter().zip(cube.mz.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_open_missing_part() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("sample");
        write_img_triple(&stem, &test_cube()).unwrap();
        fs::remove_file(stem.with_extension("t2m")).unwrap();

        assert!(ImgRawFile::open(&stem).is_err());
    }

    #[test]
    fn test_open_size_mismatch() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("sample");
        write_img_triple(&stem, &test_cube()).unwrap();

        // truncate the img file by one pixel spectrum
        let bytes = fs::read(stem.with_extension("img")).unwrap();
        fs::write(stem.with_extension("img"), &bytes[..bytes.len() - 8]).unwrap();

        assert!(ImgRawFile::open(&stem).is_err());
    }
}
