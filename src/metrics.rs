//! QC metric aggregation
//!
//! Combines the per-ROI fit results and the motion table into the flat
//! named-metric set handed to reporting and trend aggregation. Every ratio
//! is guarded: a diverged fit or a near-zero denominator makes the metric
//! absent rather than NaN or infinite.

use serde::Serialize;

use crate::detrend::FitResult;
use crate::moco::MotionTable;

/// Denominators smaller than this are treated as unavailable
const MIN_DENOM: f64 = 1e-9;

/// Half-normal bias factor relating the air-region mean to the underlying
/// Gaussian noise sigma: sigma = mean * sqrt(pi / 2)
const HALF_NORMAL_FACTOR: f64 = 1.2533141373155003;

/// Per-ROI fit outcomes
///
/// A slot is `None` when the fit diverged for that ROI; its metrics are
/// then reported as unavailable while the others continue.
#[derive(Clone, Debug, Default)]
pub struct RoiFits {
    /// Signal region fit
    pub signal: Option<FitResult>,
    /// Nyquist ghost region fit
    pub ghost: Option<FitResult>,
    /// Background air region fit
    pub air: Option<FitResult>,
}

/// Named scalar QC metrics for one series
///
/// Serialized as JSON at the reporting boundary; absent metrics are omitted
/// from the output entirely.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricSet {
    /// Signal-to-fluctuation-noise ratio (signal baseline / air baseline)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sfnr: Option<f64>,
    /// Signal-to-noise ratio with the half-normal noise-floor correction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    /// Signal baseline / ghost baseline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig_art_ratio: Option<f64>,
    /// Percent drift per frame (100 * slope / baseline)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_pct: Option<f64>,
    /// Warm-up transient amplitude as a percentage of baseline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_amp_pct: Option<f64>,
    /// Warm-up time constant in frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_time_frames: Option<f64>,
    /// Spike count in the signal trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_spikes: Option<usize>,
    /// Spike count in the ghost trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ghost_spikes: Option<usize>,
    /// Spike count in the air trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_spikes: Option<usize>,
    /// Maximum absolute x translation over the run (mm)
    pub max_abs_dx_mm: f64,
    /// Maximum absolute y translation over the run (mm)
    pub max_abs_dy_mm: f64,
    /// Maximum absolute z translation over the run (mm)
    pub max_abs_dz_mm: f64,
    /// Maximum framewise displacement over the run (mm)
    pub max_fd_mm: f64,
}

/// Ratio with a denominator guard
fn guarded_ratio(num: f64, denom: f64) -> Option<f64> {
    if denom.abs() < MIN_DENOM {
        None
    } else {
        Some(num / denom)
    }
}

fn max_abs(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, |m, v| m.max(v.abs()))
}

/// Aggregate fit results and motion statistics into the metric set
///
/// # Arguments
/// * `fits` - Per-ROI fit outcomes (diverged fits are `None`)
/// * `motion` - Post-processed motion table with FD filled
///
/// # Returns
/// The metric set; unavailable metrics are absent, never NaN
pub fn compute_metrics(fits: &RoiFits, motion: &MotionTable) -> MetricSet {
    let mut m = MetricSet {
        max_abs_dx_mm: max_abs(motion.params.iter().map(|p| p.dx)),
        max_abs_dy_mm: max_abs(motion.params.iter().map(|p| p.dy)),
        max_abs_dz_mm: max_abs(motion.params.iter().map(|p| p.dz)),
        max_fd_mm: max_abs(motion.fd_mm.iter().copied()),
        ..MetricSet::default()
    };

    m.signal_spikes = fits.signal.as_ref().map(|f| f.spike_count);
    m.ghost_spikes = fits.ghost.as_ref().map(|f| f.spike_count);
    m.air_spikes = fits.air.as_ref().map(|f| f.spike_count);

    if let Some(signal) = &fits.signal {
        let baseline = signal.params.offset;

        if let Some(air) = &fits.air {
            m.sfnr = guarded_ratio(baseline, air.params.offset);
            m.snr = guarded_ratio(baseline, air.params.offset * HALF_NORMAL_FACTOR);
        }
        if let Some(ghost) = &fits.ghost {
            m.sig_art_ratio = guarded_ratio(baseline, ghost.params.offset);
        }

        m.drift_pct = guarded_ratio(100.0 * signal.params.slope, baseline);
        m.warmup_amp_pct = guarded_ratio(100.0 * signal.params.amp, baseline);
        m.warmup_time_frames = Some(signal.params.tau);
    }

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detrend::ExpLinParams;
    use crate::moco::{MotionParams, MotionTable};

    fn fit_with(amp: f64, tau: f64, slope: f64, offset: f64, spikes: usize) -> FitResult {
        FitResult {
            params: ExpLinParams { amp, tau, slope, offset },
            residuals: vec![0.0; 10],
            sigma: 0.0,
            spike_mask: vec![false; 10],
            spike_count: spikes,
            detrended: vec![offset; 10],
        }
    }

    fn motion_table() -> MotionTable {
        let params = vec![
            MotionParams::zero(),
            MotionParams { dx: -1.5, dy: 0.2, dz: 0.0, ..MotionParams::zero() },
            MotionParams { dx: 0.5, dy: -0.8, dz: 0.3, ..MotionParams::zero() },
        ];
        let mut table = MotionTable::from_params(params);
        table.fd_mm = vec![0.0, 1.7, 3.3];
        table.fd_lpf_mm = vec![0.0; 3];
        table
    }

    #[test]
    fn test_full_metric_set() {
        let fits = RoiFits {
            signal: Some(fit_with(5.0, 10.0, 0.01, 1000.0, 0)),
            ghost: Some(fit_with(0.0, 1.0, 0.0, 20.0, 1)),
            air: Some(fit_with(0.0, 1.0, 0.0, 4.0, 2)),
        };
        let m = compute_metrics(&fits, &motion_table());

        assert!((m.sfnr.unwrap() - 250.0).abs() < 1e-9);
        assert!((m.sig_art_ratio.unwrap() - 50.0).abs() < 1e-9);
        assert!((m.snr.unwrap() - 1000.0 / (4.0 * HALF_NORMAL_FACTOR)).abs() < 1e-9);
        assert!((m.drift_pct.unwrap() - 0.001).abs() < 1e-12);
        assert!((m.warmup_amp_pct.unwrap() - 0.5).abs() < 1e-12);
        assert!((m.warmup_time_frames.unwrap() - 10.0).abs() < 1e-12);
        assert_eq!(m.signal_spikes, Some(0));
        assert_eq!(m.ghost_spikes, Some(1));
        assert_eq!(m.air_spikes, Some(2));
        assert!((m.max_abs_dx_mm - 1.5).abs() < 1e-12);
        assert!((m.max_abs_dy_mm - 0.8).abs() < 1e-12);
        assert!((m.max_abs_dz_mm - 0.3).abs() < 1e-12);
        assert!((m.max_fd_mm - 3.3).abs() < 1e-12);
    }

    #[test]
    fn test_near_zero_air_baseline_suppresses_ratios() {
        let fits = RoiFits {
            signal: Some(fit_with(0.0, 1.0, 0.0, 1000.0, 0)),
            ghost: Some(fit_with(0.0, 1.0, 0.0, 20.0, 0)),
            air: Some(fit_with(0.0, 1.0, 0.0, 1e-12, 0)),
        };
        let m = compute_metrics(&fits, &motion_table());

        assert!(m.sfnr.is_none(), "sfnr must be absent, not inf");
        assert!(m.snr.is_none());
        assert!(m.sig_art_ratio.is_some(), "ghost ratio unaffected by air");
    }

    #[test]
    fn test_diverged_signal_fit_suppresses_signal_metrics() {
        let fits = RoiFits {
            signal: None,
            ghost: Some(fit_with(0.0, 1.0, 0.0, 20.0, 3)),
            air: Some(fit_with(0.0, 1.0, 0.0, 4.0, 0)),
        };
        let m = compute_metrics(&fits, &motion_table());

        assert!(m.sfnr.is_none());
        assert!(m.sig_art_ratio.is_none());
        assert!(m.drift_pct.is_none());
        assert!(m.warmup_time_frames.is_none());
        assert!(m.signal_spikes.is_none());
        // Ghost and motion statistics survive
        assert_eq!(m.ghost_spikes, Some(3));
        assert!((m.max_fd_mm - 3.3).abs() < 1e-12);
    }

    #[test]
    fn test_empty_motion_table_yields_zero_maxima() {
        let fits = RoiFits::default();
        let m = compute_metrics(&fits, &MotionTable::default());
        assert_eq!(m.max_abs_dx_mm, 0.0);
        assert_eq!(m.max_fd_mm, 0.0);
    }

    #[test]
    fn test_absent_metrics_omitted_from_json() {
        let fits = RoiFits {
            signal: Some(fit_with(5.0, 10.0, 0.01, 1000.0, 0)),
            ghost: None,
            air: Some(fit_with(0.0, 1.0, 0.0, 4.0, 0)),
        };
        let m = compute_metrics(&fits, &motion_table());
        let json = serde_json::to_string(&m).unwrap();

        assert!(json.contains("\"sfnr\""));
        assert!(!json.contains("sig_art_ratio"), "absent metric must be omitted: {}", json);
        assert!(json.contains("max_fd_mm"));
    }
}
