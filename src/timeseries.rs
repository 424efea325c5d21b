//! ROI timeseries extraction
//!
//! Reduces the motion-corrected 4D series to one spatial-mean trace per ROI
//! category. Each frame is a single accumulation pass over the label volume;
//! frames carry no state between them and are processed in parallel.

use rayon::prelude::*;

use crate::error::{QcError, Result};
use crate::rois::{RoiLabels, LABEL_AIR, LABEL_GHOST, LABEL_SIGNAL};
use crate::volume::Volume4D;

/// Spatial-mean intensity traces, one value per frame per ROI
#[derive(Clone, Debug)]
pub struct RoiTraces {
    /// Signal region trace
    pub signal: Vec<f64>,
    /// Nyquist ghost region trace
    pub ghost: Vec<f64>,
    /// Background air trace
    pub air: Vec<f64>,
}

/// Extract per-ROI spatial-mean traces from a motion-corrected series
///
/// Voxels labeled outside the three defined categories (the reserved
/// "undefined" value) are ignored. A category with no voxels yields an
/// all-zero trace; downstream metric guards treat its baseline as
/// unavailable.
///
/// # Arguments
/// * `series` - Motion-corrected 4D series
/// * `rois` - Label partition with the same spatial shape
///
/// # Returns
/// One trace of length `series.nt` per ROI category
pub fn extract_traces(series: &Volume4D, rois: &RoiLabels) -> Result<RoiTraces> {
    if series.dims != rois.dims {
        return Err(QcError::InvalidInput(format!(
            "series shape {:?} does not match ROI shape {:?}",
            series.dims, rois.dims
        )));
    }

    let mut counts = [0usize; 3];
    for &l in &rois.labels {
        match l {
            LABEL_SIGNAL => counts[0] += 1,
            LABEL_GHOST => counts[1] += 1,
            LABEL_AIR => counts[2] += 1,
            _ => {}
        }
    }

    let means: Vec<[f64; 3]> = (0..series.nt)
        .into_par_iter()
        .map(|t| {
            let frame = series.frame(t);
            let mut sums = [0.0f64; 3];
            for (v, &l) in frame.iter().zip(rois.labels.iter()) {
                match l {
                    LABEL_SIGNAL => sums[0] += v,
                    LABEL_GHOST => sums[1] += v,
                    LABEL_AIR => sums[2] += v,
                    _ => {}
                }
            }
            [
                if counts[0] > 0 { sums[0] / counts[0] as f64 } else { 0.0 },
                if counts[1] > 0 { sums[1] / counts[1] as f64 } else { 0.0 },
                if counts[2] > 0 { sums[2] / counts[2] as f64 } else { 0.0 },
            ]
        })
        .collect();

    Ok(RoiTraces {
        signal: means.iter().map(|m| m[0]).collect(),
        ghost: means.iter().map(|m| m[1]).collect(),
        air: means.iter().map(|m| m[2]).collect(),
    })
}
