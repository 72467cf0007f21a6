//! Conversion of legacy mzXML input through ProteoWizard's `msconvert`.
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_MSCONVERT: &str = "msconvert";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Failed to run {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} failed with {status}")]
    ExitFailure { program: String, status: ExitStatus },
    #[error("{program} did not generate the expected file {}", .path.display())]
    MissingOutput { program: String, path: PathBuf },
}

/// Whether `path` is in a format that must be converted before it can be read
pub fn requires_conversion(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("mzxml"))
        .unwrap_or(false)
}

/// Where `msconvert` writes the mzML version of `path`
pub fn converted_path(path: &Path) -> PathBuf {
    path.with_extension("mzML")
}

/// Convert `path` to a centroided, 64-bit, zlib compressed mzML file next to it
/// and return the new file's path.
///
/// There is no retry. A failure to launch the program, a non-zero exit or a missing
/// output file are all errors.
pub fn convert_to_mzml(program: &str, path: &Path) -> Result<PathBuf, ConversionError> {
    let outdir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let expected = converted_path(path);
    info!("Converting {} to mzML with {program}", path.display());

    let mut command = Command::new(program);
    command
        .arg(path)
        .args(["--mzML", "--64", "--zlib"])
        .arg("--outdir")
        .arg(&outdir)
        .args(["--filter", "peakPicking true 1-"]);
    debug!("Running {command:?}");

    let status = command
        .status()
        .map_err(|source| ConversionError::LaunchFailed {
            program: program.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(ConversionError::ExitFailure {
            program: program.to_string(),
            status,
        });
    }
    if !expected.exists() {
        return Err(ConversionError::MissingOutput {
            program: program.to_string(),
            path: expected,
        });
    }
    Ok(expected)
}
