//! qc-core: quality-control metrics for 4D MRI stability series
//!
//! Computes objective scanner QC metrics from a 4D time-series (rigid
//! phantom or resting-state acquisition): motion estimation, ROI
//! segmentation, per-ROI trace extraction, warm-up/drift model fitting,
//! spike detection and metric aggregation.
//!
//! # Modules
//! - `volume`: 3D/4D volume containers and temporal reductions
//! - `nifti_io`: NIfTI-1 file I/O
//! - `moco`: motion estimation and framewise displacement
//! - `registration`: external rigid-registration tool interop
//! - `morphology`: 3D binary erosion, dilation and circular roll
//! - `rois`: signal / ghost / air ROI label construction
//! - `timeseries`: per-ROI spatial-mean trace extraction
//! - `detrend`: warm-up + drift model fitting and spike detection
//! - `filters`: Butterworth design and zero-phase filtering
//! - `metrics`: named-metric aggregation
//! - `pipeline`: per-series orchestration

// Core containers
pub mod error;
pub mod volume;

// Pipeline stages
pub mod detrend;
pub mod filters;
pub mod metrics;
pub mod moco;
pub mod morphology;
pub mod rois;
pub mod timeseries;

// Orchestration
pub mod pipeline;

// I/O and external interop
pub mod nifti_io;
pub mod registration;

// Shared numerics
pub mod utils;

pub use error::{QcError, Result};
