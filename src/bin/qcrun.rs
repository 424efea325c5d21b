//! QC runner
//!
//! Analyzes one 4D NIfTI series and prints the metric set as JSON.
//!
//! Usage:
//!   qcrun <series.nii[.gz]> --tr <seconds> [--mode phantom|live]
//!         [--save-rois <labels.nii.gz>]
//!         [--mcflirt <path> --flirt <path>]
//!         [--template <image.nii.gz> --template-labels <labels.nii.gz>]
//!         [--signal-label <id>]

use std::path::PathBuf;
use std::process::ExitCode;

use qc_core::moco::AcqMode;
use qc_core::pipeline::{run_series, QcConfig};
use qc_core::registration::RegistrationTools;
use qc_core::rois::{RoiParams, TemplateRois};
use qc_core::{nifti_io, QcError, Result};

struct Args {
    input: PathBuf,
    tr_s: f64,
    mode: AcqMode,
    rois_out: Option<PathBuf>,
    mcflirt: Option<PathBuf>,
    flirt: Option<PathBuf>,
    template: Option<PathBuf>,
    template_labels: Option<PathBuf>,
    signal_label: u8,
}

fn usage() -> String {
    "usage: qcrun <series.nii[.gz]> --tr <seconds> [--mode phantom|live] \
     [--save-rois <labels.nii.gz>] [--mcflirt <path> --flirt <path>] \
     [--template <image> --template-labels <labels>] [--signal-label <id>]"
        .to_string()
}

fn parse_args() -> Result<Args> {
    let mut input = None;
    let mut tr_s = None;
    let mut mode = AcqMode::Phantom;
    let mut rois_out = None;
    let mut mcflirt = None;
    let mut flirt = None;
    let mut template = None;
    let mut template_labels = None;
    let mut signal_label = 1u8;

    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        let mut value = |name: &str| {
            argv.next()
                .ok_or_else(|| QcError::InvalidInput(format!("{} requires a value", name)))
        };
        match arg.as_str() {
            "--tr" => {
                let v = value("--tr")?;
                tr_s = Some(v.parse::<f64>().map_err(|_| {
                    QcError::InvalidInput(format!("bad repetition time '{}'", v))
                })?);
            }
            "--mode" => mode = AcqMode::from_str(&value("--mode")?)?,
            "--save-rois" => rois_out = Some(PathBuf::from(value("--save-rois")?)),
            "--mcflirt" => mcflirt = Some(PathBuf::from(value("--mcflirt")?)),
            "--flirt" => flirt = Some(PathBuf::from(value("--flirt")?)),
            "--template" => template = Some(PathBuf::from(value("--template")?)),
            "--template-labels" => {
                template_labels = Some(PathBuf::from(value("--template-labels")?))
            }
            "--signal-label" => {
                let v = value("--signal-label")?;
                signal_label = v.parse::<u8>().map_err(|_| {
                    QcError::InvalidInput(format!("bad template label id '{}'", v))
                })?;
            }
            "-h" | "--help" => return Err(QcError::InvalidInput(usage())),
            other if input.is_none() && !other.starts_with('-') => {
                input = Some(PathBuf::from(other));
            }
            other => {
                return Err(QcError::InvalidInput(format!(
                    "unrecognized argument '{}'\n{}",
                    other,
                    usage()
                )));
            }
        }
    }

    let input = input.ok_or_else(|| QcError::InvalidInput(usage()))?;
    let tr_s = tr_s.ok_or_else(|| QcError::InvalidInput(usage()))?;

    Ok(Args {
        input,
        tr_s,
        mode,
        rois_out,
        mcflirt,
        flirt,
        template,
        template_labels,
        signal_label,
    })
}

fn build_config(args: &Args) -> Result<QcConfig> {
    let tools = match (&args.mcflirt, &args.flirt) {
        (Some(mcflirt), Some(flirt)) => Some(RegistrationTools {
            mcflirt: mcflirt.clone(),
            flirt: flirt.clone(),
        }),
        (None, None) => None,
        _ => {
            return Err(QcError::InvalidInput(
                "--mcflirt and --flirt must be given together".to_string(),
            ));
        }
    };

    let template = match (&args.template, &args.template_labels) {
        (Some(image), Some(labels)) => Some(TemplateRois {
            image: image.clone(),
            labels: labels.clone(),
            signal_label: args.signal_label,
        }),
        (None, None) => None,
        _ => {
            return Err(QcError::InvalidInput(
                "--template and --template-labels must be given together".to_string(),
            ));
        }
    };

    if args.mode == AcqMode::Live && (tools.is_none() || template.is_none()) {
        return Err(QcError::InvalidInput(
            "live mode requires --mcflirt/--flirt and --template/--template-labels".to_string(),
        ));
    }

    Ok(QcConfig {
        mode: args.mode,
        tr_s: args.tr_s,
        roi: RoiParams::default(),
        tools,
        template,
    })
}

fn run() -> Result<()> {
    let args = parse_args()?;
    let config = build_config(&args)?;

    log::info!("loading {}", args.input.display());
    let series = nifti_io::read_series(&args.input)?;

    let outputs = run_series(&series, &config)?;

    if let Some(path) = &args.rois_out {
        nifti_io::write_volume(path, &outputs.rois.to_volume())?;
        log::info!("wrote ROI labels to {}", path.display());
    }

    let json = serde_json::to_string_pretty(&outputs.metrics)
        .map_err(|e| QcError::InvalidInput(format!("metric serialization failed: {}", e)))?;
    println!("{}", json);

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("qcrun: {}", e);
            ExitCode::FAILURE
        }
    }
}
