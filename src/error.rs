//! Error types for the QC engine
//!
//! One variant per failure class. `FitDivergence` is recoverable at the
//! pipeline level (the affected ROI's metrics are reported as unavailable);
//! every other variant is fatal for the series being analyzed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the QC pipeline and its stages
#[derive(Debug, Error)]
pub enum QcError {
    /// Required input file or volume is absent
    #[error("missing input: {0}")]
    MissingInput(PathBuf),

    /// Input volume or parameter table is malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// ROI builder produced a degenerate (empty) signal mask
    #[error("empty segmentation: {0}")]
    EmptySegmentation(String),

    /// Nonlinear model fit failed to converge
    #[error("fit divergence: {0}")]
    FitDivergence(String),

    /// External registration tool failed
    #[error("external tool failure ({tool}, exit {status}): {stderr}")]
    ExternalToolFailure {
        /// Tool binary name
        tool: String,
        /// Exit status description
        status: String,
        /// Captured stderr from the tool
        stderr: String,
    },

    /// Filesystem error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, QcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QcError::EmptySegmentation("signal mask has no voxels".to_string());
        assert!(err.to_string().contains("empty segmentation"));

        let err = QcError::ExternalToolFailure {
            tool: "mcflirt".to_string(),
            status: "1".to_string(),
            stderr: "no such file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mcflirt"), "message should name the tool: {}", msg);
        assert!(msg.contains("no such file"), "message should carry stderr: {}", msg);
    }
}
