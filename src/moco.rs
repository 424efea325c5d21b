//! Motion estimation and framewise displacement
//!
//! Phantom series use closed-form center-of-mass registration: a rigid
//! spherical phantom cannot rotate detectably, so a translation-only
//! estimate is adequate and avoids the noise sensitivity of iterative
//! optimization. Live series delegate full rigid-body registration to the
//! external tool.
//!
//! Framewise displacement follows Power et al., "Spurious but systematic
//! correlations in functional connectivity MRI networks arise from subject
//! motion", NeuroImage 59:2142-2154 (2012),
//! https://doi.org/10.1016/j.neuroimage.2011.10.018
//! with low-pass filtering of the FD trace per Gratton et al., NeuroImage
//! 217:116866 (2020), https://doi.org/10.1016/j.neuroimage.2020.116866

use std::path::Path;

use rayon::prelude::*;

use crate::error::{QcError, Result};
use crate::filters::{butter_lowpass, filtfilt};
use crate::nifti_io;
use crate::registration::{parse_par_table, RegistrationTools};
use crate::utils::percentile;
use crate::volume::{idx3d, Volume4D};

/// Effective head/phantom radius converting rotation to an equivalent
/// surface displacement (Power 2012)
pub const FD_RADIUS_MM: f64 = 50.0;

/// Cutoff frequency of the FD low-pass filter (Hz)
pub const FD_LPF_CUTOFF_HZ: f64 = 0.2;

/// Order of the FD low-pass filter
pub const FD_LPF_ORDER: usize = 5;

/// Acquisition mode selecting the motion and ROI strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcqMode {
    /// Rigid calibration phantom (uniform sphere)
    Phantom,
    /// In-vivo resting-state / functional acquisition
    Live,
}

impl AcqMode {
    /// Parse a mode tag; unrecognized tags are rejected
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "phantom" => Ok(AcqMode::Phantom),
            "live" => Ok(AcqMode::Live),
            other => Err(QcError::InvalidInput(format!(
                "unknown acquisition mode '{}'",
                other
            ))),
        }
    }
}

/// Per-frame rigid motion record, MCFLIRT column convention
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionParams {
    /// Rotation about x (radians)
    pub rx: f64,
    /// Rotation about y (radians)
    pub ry: f64,
    /// Rotation about z (radians)
    pub rz: f64,
    /// Translation along x (mm)
    pub dx: f64,
    /// Translation along y (mm)
    pub dy: f64,
    /// Translation along z (mm)
    pub dz: f64,
}

impl MotionParams {
    /// The identity record (reference frame)
    pub fn zero() -> Self {
        MotionParams::default()
    }
}

/// Per-frame motion table with derived framewise displacement
///
/// Frame 0 is the reference and always holds the identity record. The FD
/// columns are empty until [`moco_postprocess`] fills them.
#[derive(Clone, Debug, Default)]
pub struct MotionTable {
    /// One rigid record per frame
    pub params: Vec<MotionParams>,
    /// Framewise displacement (mm), one value per frame
    pub fd_mm: Vec<f64>,
    /// Low-pass filtered framewise displacement (mm)
    pub fd_lpf_mm: Vec<f64>,
}

impl MotionTable {
    /// Build a raw table from per-frame records
    pub fn from_params(params: Vec<MotionParams>) -> Self {
        MotionTable {
            params,
            fd_mm: Vec::new(),
            fd_lpf_mm: Vec::new(),
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when the table holds no frames
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Intensity-weighted center of mass of one frame (voxel coordinates)
fn center_of_mass(frame: &[f64], nx: usize, ny: usize, nz: usize) -> (f64, f64, f64) {
    let mut total = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sz = 0.0;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let w = frame[idx3d(i, j, k, nx, ny)];
                total += w;
                sx += w * i as f64;
                sy += w * j as f64;
                sz += w * k as f64;
            }
        }
    }

    if total <= 0.0 {
        // Degenerate frame: fall back to the geometric center
        return (
            (nx as f64 - 1.0) / 2.0,
            (ny as f64 - 1.0) / 2.0,
            (nz as f64 - 1.0) / 2.0,
        );
    }

    (sx / total, sy / total, sz / total)
}

/// Translate a frame by a sub-voxel shift
///
/// out[x] = in[x - shift], sampled with trilinear interpolation and
/// edge-clamped (nearest) boundary handling so edge voxels do not ring.
fn shift_frame(
    frame: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    shift: (f64, f64, f64),
) -> Vec<f64> {
    let mut out = vec![0.0; frame.len()];

    let clamp = |v: f64, n: usize| v.max(0.0).min(n as f64 - 1.0);

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let x = clamp(i as f64 - shift.0, nx);
                let y = clamp(j as f64 - shift.1, ny);
                let z = clamp(k as f64 - shift.2, nz);

                let x0 = x.floor() as usize;
                let y0 = y.floor() as usize;
                let z0 = z.floor() as usize;
                let x1 = (x0 + 1).min(nx - 1);
                let y1 = (y0 + 1).min(ny - 1);
                let z1 = (z0 + 1).min(nz - 1);

                let fx = x - x0 as f64;
                let fy = y - y0 as f64;
                let fz = z - z0 as f64;

                let c000 = frame[idx3d(x0, y0, z0, nx, ny)];
                let c100 = frame[idx3d(x1, y0, z0, nx, ny)];
                let c010 = frame[idx3d(x0, y1, z0, nx, ny)];
                let c110 = frame[idx3d(x1, y1, z0, nx, ny)];
                let c001 = frame[idx3d(x0, y0, z1, nx, ny)];
                let c101 = frame[idx3d(x1, y0, z1, nx, ny)];
                let c011 = frame[idx3d(x0, y1, z1, nx, ny)];
                let c111 = frame[idx3d(x1, y1, z1, nx, ny)];

                let c00 = c000 + (c100 - c000) * fx;
                let c10 = c010 + (c110 - c010) * fx;
                let c01 = c001 + (c101 - c001) * fx;
                let c11 = c011 + (c111 - c011) * fx;

                let c0 = c00 + (c10 - c00) * fy;
                let c1 = c01 + (c11 - c01) * fy;

                out[idx3d(i, j, k, nx, ny)] = c0 + (c1 - c0) * fz;
            }
        }
    }

    out
}

/// Center-of-mass motion correction for phantom series
///
/// Intensities are clipped to the [p1, p99] range before computing centroids
/// so spikes and ghosting cannot drag the estimate. Each frame after the
/// first is translated onto the frame-0 centroid; rotations are fixed at
/// zero. Frames are processed in parallel.
///
/// # Arguments
/// * `series` - Raw 4D series
///
/// # Returns
/// Motion-corrected series of identical shape and the per-frame table
pub fn moco_phantom(series: &Volume4D) -> (Volume4D, MotionTable) {
    let (nx, ny, nz) = series.dims;
    let (vsx, vsy, vsz) = series.voxel_size;
    let nt = series.nt;

    if nt <= 1 {
        return (
            series.clone(),
            MotionTable::from_params(vec![MotionParams::zero(); nt.max(1)]),
        );
    }

    // Robust clip range over the whole series
    let p1 = percentile(&series.data, 1.0);
    let p99 = percentile(&series.data, 99.0);
    let clip = |v: f64| v.clamp(p1, p99);

    let frame0_clipped: Vec<f64> = series.frame(0).iter().map(|&v| clip(v)).collect();
    let com_0 = center_of_mass(&frame0_clipped, nx, ny, nz);

    // Each frame depends only on itself and the fixed reference
    let corrected: Vec<(Vec<f64>, MotionParams)> = (1..nt)
        .into_par_iter()
        .map(|t| {
            let frame = series.frame(t);
            let clipped: Vec<f64> = frame.iter().map(|&v| clip(v)).collect();
            let com_t = center_of_mass(&clipped, nx, ny, nz);

            let com_d = (com_0.0 - com_t.0, com_0.1 - com_t.1, com_0.2 - com_t.2);
            let shifted = shift_frame(frame, nx, ny, nz, com_d);

            let params = MotionParams {
                dx: com_d.0 * vsx,
                dy: com_d.1 * vsy,
                dz: com_d.2 * vsz,
                ..MotionParams::zero()
            };
            (shifted, params)
        })
        .collect();

    let mut data = Vec::with_capacity(series.data.len());
    data.extend_from_slice(series.frame(0));
    let mut params = vec![MotionParams::zero()];
    for (frame, p) in corrected {
        data.extend_from_slice(&frame);
        params.push(p);
    }

    let moco = Volume4D::new(data, series.dims, nt, series.voxel_size, series.affine);
    (moco, MotionTable::from_params(params))
}

/// External rigid-body motion correction for live series
///
/// Writes the raw series into the scoped work directory, invokes the
/// motion-correction tool once for the whole series, then loads the
/// corrected volume and parameter table back.
///
/// # Arguments
/// * `series` - Raw 4D series
/// * `tools` - External registration binaries
/// * `work_dir` - Scoped working directory for intermediate files
///
/// # Returns
/// Motion-corrected series and the per-frame table
pub fn moco_live(
    series: &Volume4D,
    tools: &RegistrationTools,
    work_dir: &Path,
) -> Result<(Volume4D, MotionTable)> {
    let in_file = work_dir.join("qc.nii.gz");
    let out_stub = work_dir.join("qc_mcf");

    nifti_io::write_series(&in_file, series)?;
    tools.motion_correct(&in_file, &out_stub)?;

    let moco = nifti_io::read_series(&out_stub.with_extension("nii.gz"))?;
    if moco.dims != series.dims || moco.nt != series.nt {
        return Err(QcError::InvalidInput(format!(
            "motion-corrected series shape {:?} x {} does not match input {:?} x {}",
            moco.dims, moco.nt, series.dims, series.nt
        )));
    }

    let rows = parse_par_table(&out_stub.with_extension("par"))?;
    if rows.len() != series.nt {
        return Err(QcError::InvalidInput(format!(
            "motion table has {} rows for {} frames",
            rows.len(),
            series.nt
        )));
    }

    let params = rows
        .into_iter()
        .map(|[rx, ry, rz, dx, dy, dz]| MotionParams { rx, ry, rz, dx, dy, dz })
        .collect();

    Ok((moco, MotionTable::from_params(params)))
}

/// Power framewise displacement from per-frame rigid records
///
/// Backward first differences with FD[0] = 0; rotations are converted to
/// surface displacement at the 50 mm effective radius.
fn calc_fd(params: &[MotionParams]) -> Vec<f64> {
    let nt = params.len();
    let mut fd = vec![0.0; nt];

    for t in 1..nt {
        let a = &params[t - 1];
        let b = &params[t];
        fd[t] = (b.dx - a.dx).abs()
            + (b.dy - a.dy).abs()
            + (b.dz - a.dz).abs()
            + FD_RADIUS_MM * ((b.rx - a.rx).abs() + (b.ry - a.ry).abs() + (b.rz - a.rz).abs());
    }

    fd
}

/// Augment a raw motion table with FD and low-pass filtered FD
///
/// The filter is zero-phase (forward-backward) so displacement spikes are
/// not smeared asymmetrically in time. Phantom runs skip the filter: there
/// is no physiological contamination to remove, so fd_lpf stays all zero.
///
/// # Arguments
/// * `table` - Raw motion table
/// * `tr_s` - Frame repetition time in seconds
/// * `mode` - Acquisition mode
///
/// # Returns
/// The table with fd_mm and fd_lpf_mm filled
pub fn moco_postprocess(mut table: MotionTable, tr_s: f64, mode: AcqMode) -> MotionTable {
    table.fd_mm = calc_fd(&table.params);

    table.fd_lpf_mm = match mode {
        AcqMode::Phantom => vec![0.0; table.len()],
        AcqMode::Live => {
            let fs = 1.0 / tr_s;
            let (b, a) = butter_lowpass(FD_LPF_ORDER, FD_LPF_CUTOFF_HZ, fs);
            filtfilt(&b, &a, &table.fd_mm)
        }
    };

    table
}
