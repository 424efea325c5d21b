//! External rigid-body registration interop
//!
//! Live (non-phantom) series delegate motion correction and template
//! alignment to FSL-style command-line tools (mcflirt / flirt). This module
//! owns subprocess invocation, output validation, and parsing of the
//! 6-column rigid parameter table ([rx ry rz dx dy dz], rotations in
//! radians, translations in mm). Tool locations are explicit configuration;
//! nothing is discovered from environment variables.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{QcError, Result};

/// Locations of the external registration binaries
#[derive(Clone, Debug)]
pub struct RegistrationTools {
    /// Motion-correction tool (mcflirt-compatible CLI)
    pub mcflirt: PathBuf,
    /// Volume-registration tool (flirt-compatible CLI)
    pub flirt: PathBuf,
}

/// Run a registration command, mapping any failure to `ExternalToolFailure`
fn run_tool(tool: &Path, args: &[&str]) -> Result<()> {
    let tool_name = tool
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| tool.to_string_lossy().into_owned());

    log::debug!("running {} {}", tool.display(), args.join(" "));

    let output = Command::new(tool).args(args).output().map_err(|e| {
        QcError::ExternalToolFailure {
            tool: tool_name.clone(),
            status: "failed to spawn".to_string(),
            stderr: e.to_string(),
        }
    })?;

    if !output.status.success() {
        let status = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "terminated by signal".to_string());
        return Err(QcError::ExternalToolFailure {
            tool: tool_name,
            status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}

/// Check that a tool actually produced its advertised output file
fn require_output(tool: &Path, path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(QcError::ExternalToolFailure {
        tool: tool
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        status: "0".to_string(),
        stderr: format!("expected output file missing: {}", path.display()),
    })
}

impl RegistrationTools {
    /// Motion-correct a 4D series
    ///
    /// Writes `<out_stub>.nii.gz` (corrected series) and `<out_stub>.par`
    /// (per-frame rigid parameters).
    pub fn motion_correct(&self, in_file: &Path, out_stub: &Path) -> Result<()> {
        let in_str = in_file.to_string_lossy().into_owned();
        let out_str = out_stub.to_string_lossy().into_owned();
        run_tool(&self.mcflirt, &["-in", &in_str, "-out", &out_str, "-plots"])?;

        require_output(&self.mcflirt, &out_stub.with_extension("nii.gz"))?;
        require_output(&self.mcflirt, &out_stub.with_extension("par"))?;
        Ok(())
    }

    /// Rigidly register `input` to `reference`, writing the transform matrix
    ///
    /// Degrees of freedom are capped at 6 so partial-coverage acquisitions
    /// cannot mis-estimate scale.
    pub fn register(&self, input: &Path, reference: &Path, matrix_out: &Path, dof: u32) -> Result<()> {
        let in_str = input.to_string_lossy().into_owned();
        let ref_str = reference.to_string_lossy().into_owned();
        let mat_str = matrix_out.to_string_lossy().into_owned();
        let dof_str = dof.min(6).to_string();
        run_tool(
            &self.flirt,
            &["-in", &in_str, "-ref", &ref_str, "-omat", &mat_str, "-dof", &dof_str],
        )?;
        require_output(&self.flirt, matrix_out)?;
        Ok(())
    }

    /// Apply a saved transform with nearest-neighbour resampling
    ///
    /// Nearest-neighbour preserves discrete label values through the warp.
    pub fn apply_transform_labels(
        &self,
        input: &Path,
        reference: &Path,
        matrix: &Path,
        output: &Path,
    ) -> Result<()> {
        let in_str = input.to_string_lossy().into_owned();
        let ref_str = reference.to_string_lossy().into_owned();
        let mat_str = matrix.to_string_lossy().into_owned();
        let out_str = output.to_string_lossy().into_owned();
        run_tool(
            &self.flirt,
            &[
                "-in", &in_str,
                "-ref", &ref_str,
                "-applyxfm",
                "-init", &mat_str,
                "-interp", "nearestneighbour",
                "-out", &out_str,
            ],
        )?;
        require_output(&self.flirt, output)?;
        Ok(())
    }
}

/// Parse a 6-column rigid motion parameter table
///
/// One whitespace-separated row per frame in MCFLIRT column order:
/// [rx ry rz dx dy dz], rotations in radians, translations in mm.
pub fn parse_par_table(path: &Path) -> Result<Vec<[f64; 6]>> {
    if !path.is_file() {
        return Err(QcError::MissingInput(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;

    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cols: Vec<f64> = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    QcError::InvalidInput(format!(
                        "bad motion parameter '{}' at {}:{}",
                        tok,
                        path.display(),
                        lineno + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if cols.len() != 6 {
            return Err(QcError::InvalidInput(format!(
                "expected 6 motion columns, got {} at {}:{}",
                cols.len(),
                path.display(),
                lineno + 1
            )));
        }

        rows.push([cols[0], cols[1], cols[2], cols[3], cols[4], cols[5]]);
    }

    Ok(rows)
}
