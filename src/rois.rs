//! ROI label construction
//!
//! Partitions the temporal-mean volume into signal, Nyquist-ghost and
//! background-air regions. Phantom series are segmented directly by
//! thresholding and morphology; live series warp a pre-built template label
//! map onto the reference volume via the external registration tool.
//!
//! The Nyquist ghost is the reconstruction artifact appearing as a faint
//! copy of the object displaced by half the field of view along the
//! phase-encode axis, so its region is placed by circularly rolling the
//! signal mask by ny/2.

use std::path::Path;

use crate::error::{QcError, Result};
use crate::morphology::{binary_dilate_iter, binary_erode, face_edge_element, roll_phase_axis};
use crate::nifti_io;
use crate::registration::RegistrationTools;
use crate::utils::percentile;
use crate::volume::Volume3D;

/// Label value for the signal region
pub const LABEL_SIGNAL: u8 = 1;
/// Label value for the Nyquist ghost region
pub const LABEL_GHOST: u8 = 2;
/// Label value for background air
pub const LABEL_AIR: u8 = 3;

/// Signal threshold as a fraction of the 99th intensity percentile
///
/// The percentile anchor keeps the threshold stable under hot-pixel
/// outliers, unlike a fraction of the raw maximum.
const SIGNAL_THRESHOLD_FRACTION: f64 = 0.1;

/// Tunables for the phantom ROI builder
#[derive(Clone, Debug)]
pub struct RoiParams {
    /// Radius of the iterated face+edge structuring element
    pub element_radius: i32,
    /// Erosion iterations; dilation runs twice as many
    pub erode_iterations: usize,
}

impl Default for RoiParams {
    fn default() -> Self {
        RoiParams {
            element_radius: 1,
            erode_iterations: 1,
        }
    }
}

/// Exclusive three-way ROI partition of a reference volume
#[derive(Clone, Debug)]
pub struct RoiLabels {
    /// Per-voxel labels (LABEL_SIGNAL / LABEL_GHOST / LABEL_AIR)
    pub labels: Vec<u8>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-physical affine
    pub affine: [f64; 16],
}

impl RoiLabels {
    /// Voxel count for one label
    pub fn count(&self, label: u8) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Convert to a float volume (for writing alongside other outputs)
    pub fn to_volume(&self) -> Volume3D {
        Volume3D {
            data: self.labels.iter().map(|&l| l as f64).collect(),
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine: self.affine,
        }
    }
}

/// Merge signal and ghost masks into the exclusive label volume
///
/// Ghost voxels overlapping the signal mask are discarded so the two regions
/// stay disjoint; everything else is background air.
fn merge_labels(reference: &Volume3D, signal: &[u8], ghost: &[u8]) -> RoiLabels {
    let labels: Vec<u8> = signal
        .iter()
        .zip(ghost.iter())
        .map(|(&s, &g)| {
            if s != 0 {
                LABEL_SIGNAL
            } else if g != 0 {
                LABEL_GHOST
            } else {
                LABEL_AIR
            }
        })
        .collect();

    RoiLabels {
        labels,
        dims: reference.dims,
        voxel_size: reference.voxel_size,
        affine: reference.affine,
    }
}

/// Build ROI labels for a phantom series by thresholding and morphology
///
/// The signal mask is opened (erode once) then grown back (dilate twice),
/// removing thin spurious connections while recovering the bulk region.
/// The ghost region is the eroded mask rolled by half the field of view
/// along the phase-encode axis, minus any overlap with the grown signal
/// mask.
///
/// # Arguments
/// * `tmean` - Temporal-mean reference volume
/// * `params` - Builder tunables
///
/// # Returns
/// The exclusive label partition, or `EmptySegmentation` when the threshold
/// leaves no signal voxels
pub fn roi_labels_phantom(tmean: &Volume3D, params: &RoiParams) -> Result<RoiLabels> {
    let (nx, ny, nz) = tmean.dims;

    let threshold = percentile(&tmean.data, 99.0) * SIGNAL_THRESHOLD_FRACTION;
    log::debug!("signal threshold = {:.3}", threshold);

    let signal_mask: Vec<u8> = tmean
        .data
        .iter()
        .map(|&v| if v > threshold { 1 } else { 0 })
        .collect();

    if signal_mask.iter().all(|&m| m == 0) {
        return Err(QcError::EmptySegmentation(
            "no voxels above signal threshold".to_string(),
        ));
    }

    let element = face_edge_element(params.element_radius);

    let mut eroded = signal_mask;
    for _ in 0..params.erode_iterations {
        eroded = binary_erode(&eroded, nx, ny, nz, &element);
    }
    if eroded.iter().all(|&m| m == 0) {
        return Err(QcError::EmptySegmentation(
            "signal mask vanished under erosion".to_string(),
        ));
    }

    let dilated = binary_dilate_iter(&eroded, nx, ny, nz, &element, 2 * params.erode_iterations);

    let ghost = roll_phase_axis(&eroded, nx, ny, nz, ny / 2);

    Ok(merge_labels(tmean, &dilated, &ghost))
}

/// Template volume pair used for live-mode ROI construction
#[derive(Clone, Debug)]
pub struct TemplateRois {
    /// Anatomical template image (registration source)
    pub image: std::path::PathBuf,
    /// Co-registered label map for the template
    pub labels: std::path::PathBuf,
    /// Template label ID marking the signal region
    pub signal_label: u8,
}

/// Build ROI labels for a live series by warping a template label map
///
/// The template image is rigidly registered to the reference volume (at
/// most 6 degrees of freedom) and the transform is applied to the template
/// label map with nearest-neighbour resampling. The warped signal label is
/// remapped to the standard scheme and the ghost region is derived by the
/// same half-FOV roll used in phantom mode.
///
/// # Arguments
/// * `tmean` - Temporal-mean reference volume
/// * `template` - Template image and label map
/// * `tools` - External registration binaries
/// * `work_dir` - Scoped working directory
pub fn roi_labels_live(
    tmean: &Volume3D,
    template: &TemplateRois,
    tools: &RegistrationTools,
    work_dir: &Path,
) -> Result<RoiLabels> {
    let (nx, ny, nz) = tmean.dims;

    if !template.image.is_file() {
        return Err(QcError::MissingInput(template.image.clone()));
    }
    if !template.labels.is_file() {
        return Err(QcError::MissingInput(template.labels.clone()));
    }

    let ref_file = work_dir.join("tmean.nii.gz");
    let matrix = work_dir.join("template_to_ref.mat");
    let warped = work_dir.join("labels_warped.nii.gz");

    nifti_io::write_volume(&ref_file, tmean)?;
    tools.register(&template.image, &ref_file, &matrix, 6)?;
    tools.apply_transform_labels(&template.labels, &ref_file, &matrix, &warped)?;

    let warped_labels = nifti_io::read_volume(&warped)?;
    if warped_labels.dims != tmean.dims {
        return Err(QcError::InvalidInput(format!(
            "warped label volume shape {:?} does not match reference {:?}",
            warped_labels.dims, tmean.dims
        )));
    }

    let signal: Vec<u8> = warped_labels
        .data
        .iter()
        .map(|&v| {
            // Nearest-neighbour resampling keeps label values integral
            if (v - template.signal_label as f64).abs() < 0.5 {
                1
            } else {
                0
            }
        })
        .collect();

    if signal.iter().all(|&m| m == 0) {
        return Err(QcError::EmptySegmentation(
            "warped template contains no signal voxels".to_string(),
        ));
    }

    let ghost = roll_phase_axis(&signal, nx, ny, nz, ny / 2);

    Ok(merge_labels(tmean, &signal, &ghost))
}
