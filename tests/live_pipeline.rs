//! Live-mode pipeline failure-path tests
//!
//! Live runs delegate registration to external binaries that are not
//! available in the test environment, so these tests exercise the fatal
//! error paths: tool failures and incomplete configuration.

mod common;

use std::path::PathBuf;

use qc_core::moco::AcqMode;
use qc_core::pipeline::{run_series, QcConfig};
use qc_core::registration::RegistrationTools;
use qc_core::rois::{RoiParams, TemplateRois};
use qc_core::QcError;

use common::phantom_series;

fn missing_tools() -> RegistrationTools {
    RegistrationTools {
        mcflirt: PathBuf::from("/nonexistent/bin/mcflirt"),
        flirt: PathBuf::from("/nonexistent/bin/flirt"),
    }
}

fn missing_template() -> TemplateRois {
    TemplateRois {
        image: PathBuf::from("/nonexistent/template.nii.gz"),
        labels: PathBuf::from("/nonexistent/labels.nii.gz"),
        signal_label: 1,
    }
}

#[test]
fn test_unavailable_tool_is_fatal() {
    let series = phantom_series((16, 16, 8), 6, 500.0, 2.0, 3);
    let config = QcConfig::live(2.0, missing_tools(), missing_template());

    match run_series(&series, &config) {
        Err(QcError::ExternalToolFailure { tool, .. }) => {
            assert_eq!(tool, "mcflirt", "motion correction fails first");
        }
        Err(e) => panic!("expected ExternalToolFailure, got {}", e),
        Ok(_) => panic!("expected ExternalToolFailure, got outputs"),
    }
}

#[test]
fn test_live_without_template_rejected() {
    let series = phantom_series((16, 16, 8), 6, 500.0, 2.0, 4);
    let config = QcConfig {
        mode: AcqMode::Live,
        tr_s: 2.0,
        roi: RoiParams::default(),
        tools: Some(missing_tools()),
        template: None,
    };

    // Configuration is validated before any external tool is spawned
    match run_series(&series, &config) {
        Err(QcError::InvalidInput(msg)) => {
            assert!(msg.contains("template"), "message: {}", msg)
        }
        Err(e) => panic!("expected InvalidInput, got {}", e),
        Ok(_) => panic!("expected InvalidInput, got outputs"),
    }
}
