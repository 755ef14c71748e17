use std::io;
use std::io::{Read, Write};
use byteorder::{ByteOrder, LittleEndian};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use msicore::data::cube::MsiCube;

/// Decompresses a ZSTD compressed byte array
///
/// # Arguments
///
/// * `compressed_data` - A byte slice that holds the compressed data
///
/// # Returns
///
/// * `decompressed_data` - A vector of u8 that holds the decompressed data
///
pub fn zstd_decompress(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

/// Compresses a byte array using ZSTD
///
/// # Arguments
///
/// * `decompressed_data` - A byte slice that holds the decompressed data
///
/// # Returns
///
/// * `compressed_data` - A vector of u8 that holds the compressed data
///
pub fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    let compressed_data = encoder.finish()?;
    Ok(compressed_data)
}

/// Encodes an f64 array as a container blob: a little-endian u32 header with
/// the uncompressed byte length, followed by the zstd-compressed little-endian
/// f64 payload.
pub fn encode_f64_blob(values: &[f64], compression_level: i32) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut raw = vec![0u8; values.len() * 8];
    LittleEndian::write_f64_into(values, &mut raw);

    let compressed = zstd_compress(&raw, compression_level)?;

    let mut blob = Vec::with_capacity(compressed.len() + 4);
    blob.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Decodes a blob written by `encode_f64_blob`.
pub fn decode_f64_blob(blob: &[u8]) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    if blob.len() < 4 {
        return Err("blob too short for length header".into());
    }
    let expected_len = LittleEndian::read_u32(&blob[..4]) as usize;
    if expected_len % 8 != 0 {
        return Err("blob payload length is not a multiple of 8".into());
    }

    let raw = zstd_decompress(&blob[4..])?;
    if raw.len() != expected_len {
        return Err(format!("blob length mismatch: header says {}, payload has {}", expected_len, raw.len()).into());
    }

    let mut values = vec![0f64; raw.len() / 8];
    LittleEndian::read_f64_into(&raw, &mut values);
    Ok(values)
}

/// Encodes an f32 array as little-endian bytes without compression, the raw
/// layout of the instrument-export m/z axis files.
pub fn encode_f32_bytes(values: &[f32]) -> Vec<u8> {
    let mut raw = vec![0u8; values.len() * 4];
    LittleEndian::write_f32_into(values, &mut raw);
    raw
}

/// Compresses all pixel spectra of a cube in parallel, returning one blob per
/// pixel in pixel-major order.
///
/// # Arguments
///
/// * `cube` - The cube to compress.
/// * `compression_level` - The zstd compression level.
/// * `num_threads` - Size of the rayon thread pool used for the batch.
pub fn compress_spectra(cube: &MsiCube, compression_level: i32, num_threads: usize) -> Result<Vec<Vec<u8>>, Box<dyn std::error::Error>> {
    let pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;
    let n = cube.num_channels();

    let result: Result<Vec<Vec<u8>>, String> = pool.install(|| {
        cube.intensity
            .par_chunks_exact(n)
            .map(|pixel| encode_f64_blob(pixel, compression_level).map_err(|e| e.to_string()))
            .collect()
    });
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let data = b"a reasonably compressible sequence sequence sequence sequence";
        let compressed = zstd_compress(data, 3).unwrap();
        let decompressed = zstd_decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_f64_blob_roundtrip() {
        let values: Vec<f64> = (0..1000).map(|i| (i as f64).sin() * 100.0).collect();
        let blob = encode_f64_blob(&values, 3).unwrap();
        let decoded = decode_f64_blob(&blob).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_f64_blob_empty() {
        let blob = encode_f64_blob(&[], 1).unwrap();
        let decoded = decode_f64_blob(&blob).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        assert!(decode_f64_blob(&[1, 2]).is_err());

        let blob = encode_f64_blob(&[1.0, 2.0, 3.0], 3).unwrap();
        // tamper with the header so it disagrees with the payload
        let mut tampered = blob.clone();
        tampered[0] = tampered[0].wrapping_add(8);
        assert!(decode_f64_blob(&tampered).is_err());
    }

    #[test]
    fn test_compress_spectra_one_blob_per_pixel() {
        let mz = vec![100.0, 200.0, 300.0];
        let intensity: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let cube = MsiCube::new(2, 2, mz, intensity).unwrap();

        let blobs = compress_spectra(&cube, 3, 2).unwrap();
        assert_eq!(blobs.len(), 4);
        assert_eq!(decode_f64_blob(&blobs[3]).unwrap(), vec![9.0, 10.0, 11.0]);
    }
}
