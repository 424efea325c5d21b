//! Per-series QC orchestration
//!
//! Runs the full analysis chain for one 4D series: motion estimation,
//! temporal summary volumes, ROI construction, trace extraction, model
//! fitting and metric aggregation. The run is synchronous; live mode
//! acquires a scoped working directory for the external registration tool
//! and releases it on every exit path.
//!
//! A diverged fit is the only recoverable failure: the affected ROI's
//! metrics are reported as unavailable and the run continues. Everything
//! else aborts the series.

use crate::detrend::{fit_explin, FitResult};
use crate::error::{QcError, Result};
use crate::metrics::{compute_metrics, MetricSet, RoiFits};
use crate::moco::{moco_live, moco_phantom, moco_postprocess, AcqMode, MotionTable};
use crate::registration::RegistrationTools;
use crate::rois::{roi_labels_live, roi_labels_phantom, RoiLabels, RoiParams, TemplateRois};
use crate::timeseries::{extract_traces, RoiTraces};
use crate::volume::{Volume3D, Volume4D};

/// Configuration for one QC run
///
/// External-tool locations and the live-mode template are explicit inputs;
/// nothing is discovered from the environment.
#[derive(Clone, Debug)]
pub struct QcConfig {
    /// Acquisition mode selecting the motion and ROI strategies
    pub mode: AcqMode,
    /// Frame repetition time in seconds
    pub tr_s: f64,
    /// ROI builder tunables
    pub roi: RoiParams,
    /// External registration binaries (required in live mode)
    pub tools: Option<RegistrationTools>,
    /// Anatomical template and label map (required in live mode)
    pub template: Option<TemplateRois>,
}

impl QcConfig {
    /// Configuration for a phantom run, which needs no external tools
    pub fn phantom(tr_s: f64) -> Self {
        QcConfig {
            mode: AcqMode::Phantom,
            tr_s,
            roi: RoiParams::default(),
            tools: None,
            template: None,
        }
    }

    /// Configuration for a live run
    pub fn live(tr_s: f64, tools: RegistrationTools, template: TemplateRois) -> Self {
        QcConfig {
            mode: AcqMode::Live,
            tr_s,
            roi: RoiParams::default(),
            tools: Some(tools),
            template: Some(template),
        }
    }
}

/// Full artifact set from one series run
///
/// Handed untouched to report rendering and dataset aggregation.
#[derive(Clone, Debug)]
pub struct QcOutputs {
    /// Temporal mean of the motion-corrected series
    pub tmean: Volume3D,
    /// Temporal standard deviation of the motion-corrected series
    pub tsd: Volume3D,
    /// Exclusive ROI partition
    pub rois: RoiLabels,
    /// Per-ROI spatial-mean traces
    pub traces: RoiTraces,
    /// Per-ROI fit outcomes
    pub fits: RoiFits,
    /// Motion table with framewise displacement filled
    pub motion: MotionTable,
    /// Named scalar metrics
    pub metrics: MetricSet,
}

/// Fit one ROI trace, downgrading divergence to an absent result
fn fit_or_warn(name: &str, trace: &[f64]) -> Option<FitResult> {
    match fit_explin(trace) {
        Ok(fit) => Some(fit),
        Err(e) => {
            log::warn!("{} trace fit failed, metrics unavailable: {}", name, e);
            None
        }
    }
}

/// Run the QC engine on one 4D series
///
/// # Arguments
/// * `series` - Raw 4D series
/// * `config` - Run configuration
///
/// # Returns
/// All per-series artifacts, or the first fatal error
pub fn run_series(series: &Volume4D, config: &QcConfig) -> Result<QcOutputs> {
    let (nx, ny, nz) = series.dims;
    if nx == 0 || ny == 0 || nz == 0 || series.nt == 0 {
        return Err(QcError::InvalidInput(format!(
            "degenerate series shape {:?} x {} frames",
            series.dims, series.nt
        )));
    }
    if !(config.tr_s.is_finite() && config.tr_s > 0.0) {
        return Err(QcError::InvalidInput(format!(
            "repetition time must be positive, got {}",
            config.tr_s
        )));
    }

    log::info!(
        "QC run: {:?} series, {}x{}x{} x {} frames, TR {:.3} s",
        config.mode,
        nx,
        ny,
        nz,
        series.nt,
        config.tr_s
    );

    // Resolve the mode-dependent strategy once, up front. Live mode owns a
    // private working directory for external-tool files, dropped (and
    // deleted) on every exit path so a failed run leaves no partial
    // artifacts.
    enum Strategy<'a> {
        Phantom,
        Live {
            tools: &'a RegistrationTools,
            template: &'a TemplateRois,
            work: tempfile::TempDir,
        },
    }

    let strategy = match config.mode {
        AcqMode::Phantom => Strategy::Phantom,
        AcqMode::Live => {
            let tools = config.tools.as_ref().ok_or_else(|| {
                QcError::InvalidInput("live mode requires registration tools".to_string())
            })?;
            let template = config.template.as_ref().ok_or_else(|| {
                QcError::InvalidInput("live mode requires an ROI template".to_string())
            })?;
            Strategy::Live {
                tools,
                template,
                work: tempfile::tempdir()?,
            }
        }
    };

    log::info!("estimating motion");
    let (moco, raw_motion) = match &strategy {
        Strategy::Phantom => moco_phantom(series),
        Strategy::Live { tools, work, .. } => moco_live(series, tools, work.path())?,
    };

    log::info!("computing temporal summary volumes");
    let tmean = moco.temporal_mean();
    let tsd = moco.temporal_sd();

    log::info!("building ROI labels");
    let rois = match &strategy {
        Strategy::Phantom => roi_labels_phantom(&tmean, &config.roi)?,
        Strategy::Live {
            tools,
            template,
            work,
        } => roi_labels_live(&tmean, template, tools, work.path())?,
    };
    log::debug!(
        "ROI voxels: signal {}, ghost {}, air {}",
        rois.count(crate::rois::LABEL_SIGNAL),
        rois.count(crate::rois::LABEL_GHOST),
        rois.count(crate::rois::LABEL_AIR)
    );

    log::info!("extracting ROI traces");
    let traces = extract_traces(&moco, &rois)?;

    log::info!("fitting detrend models");
    let fits = RoiFits {
        signal: fit_or_warn("signal", &traces.signal),
        ghost: fit_or_warn("ghost", &traces.ghost),
        air: fit_or_warn("air", &traces.air),
    };

    log::info!("post-processing motion table");
    let motion = moco_postprocess(raw_motion, config.tr_s, config.mode);

    let metrics = compute_metrics(&fits, &motion);
    log::info!(
        "metrics: sfnr {:?}, drift {:?} %/frame, max FD {:.3} mm",
        metrics.sfnr,
        metrics.drift_pct,
        metrics.max_fd_mm
    );

    Ok(QcOutputs {
        tmean,
        tsd,
        rois,
        traces,
        fits,
        motion,
        metrics,
    })
}
