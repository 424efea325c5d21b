//! NIfTI file I/O
//!
//! Loads 3D and 4D NIfTI-1 volumes (.nii and .nii.gz, gzip auto-detected)
//! into the crate's flat Fortran-order containers and writes them back out.
//! Writing is needed both at the pipeline boundary and to hand intermediate
//! series to the external registration tool.

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{QcError, Result};
use crate::volume::{Volume3D, Volume4D};

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("File too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

fn parse_object(bytes: &[u8]) -> Result<InMemNiftiObject> {
    if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder)
            .map_err(|e| QcError::InvalidInput(format!("Failed to read gzipped NIfTI: {}", e)))
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| QcError::InvalidInput(format!("Failed to read NIfTI: {} ({})", e, info)))
    }
}

/// Get affine transformation matrix from header
///
/// Prefers the sform when set, otherwise falls back to identity scaled by
/// voxel size.
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        crate::volume::scaled_identity_affine((
            header.pixdim[1] as f64,
            header.pixdim[2] as f64,
            header.pixdim[3] as f64,
        ))
    }
}

/// Load a 4D NIfTI series from bytes
///
/// A 3D input is accepted as a single-frame series (nt = 1).
///
/// # Arguments
/// * `bytes` - Raw file contents (.nii or .nii.gz)
///
/// # Returns
/// The series as a `Volume4D`
pub fn load_series(bytes: &[u8]) -> Result<Volume4D> {
    let obj = parse_object(bytes)?;
    let header = obj.header();

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let affine = get_affine(header);

    let volume = obj.into_volume();
    let array: Array<f64, _> = volume
        .into_ndarray()
        .map_err(|e| QcError::InvalidInput(format!("Failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(QcError::InvalidInput(format!(
            "Expected at least 3D volume, got {}D",
            shape.len()
        )));
    }

    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let nt = if shape.len() >= 4 { shape[3] } else { 1 };

    // Extract in Fortran order (x fastest) to match the NIfTI convention
    let mut data = Vec::with_capacity(nx * ny * nz * nt);
    if shape.len() == 3 {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(array[[i, j, k]]);
                }
            }
        }
    } else {
        for t in 0..nt {
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        data.push(array[[i, j, k, t]]);
                    }
                }
            }
        }
    }

    Ok(Volume4D::new(data, (nx, ny, nz), nt, voxel_size, affine))
}

/// Load a single 3D volume from bytes
///
/// 4D inputs are rejected so a label or template volume cannot silently be
/// a time-series.
pub fn load_volume(bytes: &[u8]) -> Result<Volume3D> {
    let series = load_series(bytes)?;
    if series.nt != 1 {
        return Err(QcError::InvalidInput(format!(
            "Expected 3D volume, got {} frames",
            series.nt
        )));
    }
    Ok(Volume3D {
        data: series.data,
        dims: series.dims,
        voxel_size: series.voxel_size,
        affine: series.affine,
    })
}

/// Build a NIfTI-1 single-file byte buffer (float32 data)
fn build_nifti_bytes(
    data: &[f64],
    dims: (usize, usize, usize),
    nt: usize,
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Vec<u8> {
    let (nx, ny, nz) = dims;
    let (vsx, vsy, vsz) = voxel_size;

    // NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let ndim: i16 = if nt > 1 { 4 } else { 3 };
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4-byte extension flag)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            let val = affine[row * 4 + col] as f32;
            header[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + data.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }

    buffer
}

fn maybe_gzip(bytes: Vec<u8>, path: &Path) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        Ok(encoder.finish()?)
    } else {
        Ok(bytes)
    }
}

/// Read a 4D NIfTI series from a filesystem path
pub fn read_series(path: &Path) -> Result<Volume4D> {
    if !path.is_file() {
        return Err(QcError::MissingInput(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    load_series(&bytes)
}

/// Read a 3D NIfTI volume from a filesystem path
pub fn read_volume(path: &Path) -> Result<Volume3D> {
    if !path.is_file() {
        return Err(QcError::MissingInput(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    load_volume(&bytes)
}

/// Save a 4D series to a file (.nii, or .nii.gz if the path ends that way)
pub fn write_series(path: &Path, vol: &Volume4D) -> Result<()> {
    let bytes = build_nifti_bytes(&vol.data, vol.dims, vol.nt, vol.voxel_size, &vol.affine);
    let bytes = maybe_gzip(bytes, path)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Save a 3D volume to a file (.nii, or .nii.gz if the path ends that way)
pub fn write_volume(path: &Path, vol: &Volume3D) -> Result<()> {
    let bytes = build_nifti_bytes(&vol.data, vol.dims, 1, vol.voxel_size, &vol.affine);
    let bytes = maybe_gzip(bytes, path)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::scaled_identity_affine;

    fn test_series(nt: usize) -> Volume4D {
        let dims = (4, 3, 2);
        let n = dims.0 * dims.1 * dims.2;
        let data: Vec<f64> = (0..n * nt).map(|i| i as f64 * 0.5).collect();
        Volume4D::new(data, dims, nt, (1.0, 2.0, 3.0), scaled_identity_affine((1.0, 2.0, 3.0)))
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x00]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_series_roundtrip() {
        let vol = test_series(5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.nii");

        write_series(&path, &vol).unwrap();
        let loaded = read_series(&path).unwrap();

        assert_eq!(loaded.dims, vol.dims);
        assert_eq!(loaded.nt, 5);
        assert!((loaded.voxel_size.1 - 2.0).abs() < 1e-5);
        for i in 0..vol.data.len() {
            assert!(
                (loaded.data[i] - vol.data[i]).abs() < 0.01,
                "data mismatch at {}: {} vs {}",
                i,
                loaded.data[i],
                vol.data[i]
            );
        }
    }

    #[test]
    fn test_series_roundtrip_gz() {
        let vol = test_series(3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.nii.gz");

        write_series(&path, &vol).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(is_gzip(&bytes), "file should be gzip compressed");

        let loaded = read_series(&path).unwrap();
        assert_eq!(loaded.nt, 3);
        assert_eq!(loaded.data.len(), vol.data.len());
    }

    #[test]
    fn test_volume_roundtrip() {
        let series = test_series(1);
        let vol = Volume3D {
            data: series.data.clone(),
            dims: series.dims,
            voxel_size: series.voxel_size,
            affine: series.affine,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii");

        write_volume(&path, &vol).unwrap();
        let loaded = read_volume(&path).unwrap();

        assert_eq!(loaded.dims, vol.dims);
        for i in 0..16 {
            assert!(
                (loaded.affine[i] - vol.affine[i]).abs() < 0.01,
                "affine[{}] mismatch",
                i
            );
        }
    }

    #[test]
    fn test_load_volume_rejects_4d() {
        let vol = test_series(4);
        let bytes = build_nifti_bytes(&vol.data, vol.dims, vol.nt, vol.voxel_size, &vol.affine);
        let result = load_volume(&bytes);
        assert!(result.is_err(), "4D input should be rejected as 3D volume");
    }

    #[test]
    fn test_load_invalid_bytes() {
        assert!(load_series(&[0u8; 10]).is_err());
        assert!(load_series(&[0x1f, 0x8b, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_series(Path::new("/tmp/does_not_exist_qc_core.nii"));
        match result {
            Err(QcError::MissingInput(p)) => {
                assert!(p.to_string_lossy().contains("does_not_exist"));
            }
            Err(e) => panic!("expected MissingInput, got {}", e),
            Ok(_) => panic!("expected MissingInput, got a volume"),
        }
    }

    #[test]
    fn test_header_fields() {
        let vol = test_series(2);
        let bytes = build_nifti_bytes(&vol.data, vol.dims, vol.nt, vol.voxel_size, &vol.affine);

        assert_eq!(&bytes[344..348], b"n+1\0");
        let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(sizeof_hdr, 348);

        // dim[0] = 4 for a multi-frame series
        let ndim = i16::from_le_bytes([bytes[40], bytes[41]]);
        assert_eq!(ndim, 4);
        let nt = i16::from_le_bytes([bytes[48], bytes[49]]);
        assert_eq!(nt, 2);

        let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
        assert_eq!(datatype, 16);
    }
}
