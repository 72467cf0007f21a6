use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use thiserror::Error;

use mzdata::io::MassSpectrometryFormat;
use mzdata::meta::ProcessingMethod;
use mzdata::params::Param;
use mzdata::prelude::*;
use mzdata::spectrum::bindata::ArrayRetrievalError;
use mzpeaks::Tolerance;

use tracing::{debug, info, warn};

use mzoscfix::{
    CorrectionOutcome, CorrectionParams, DetectionParams, OscillationCorrector, RunError,
    RunStore, DEFAULT_REFERENCE_MZ, DEFAULT_TARGETS,
};
use mzoscfix::reconstruct::DEFAULT_INTENSITY_THRESHOLD;
use mzoscfix::spectral::DEFAULT_WINDOW_SIZE;

use crate::args::{
    format_tolerance, non_negative_float_f64, parse_tolerance, unit_interval_f64, TuningParams,
};
use crate::convert::{convert_to_mzml, requires_conversion, ConversionError, DEFAULT_MSCONVERT};
use crate::export::write_channels_to_path;
use crate::store::MzDataRunStore;

pub const CONFIG_FILE_NAME: &str = "mzoscfixer.toml";
pub const ENV_PREFIX: &str = "MZOSCFIXER_";

#[derive(Debug, Error)]
pub enum MZOscFixerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("The input file {0} does not exist")]
    InputFileNotFound(String),
    #[error("The input file format for {0} was either unknown or not supported ({1:?})")]
    FormatUnknownOrNotSupportedError(String, MassSpectrometryFormat),
    #[error("The output file format for {0} was either unknown or not supported ({1:?})")]
    OutputFormatUnknownOrNotSupportedError(String, MassSpectrometryFormat),
    #[error("Spectrum {0} holds deconvoluted peaks, which cannot be corrected")]
    UnsupportedPeakData(String),
    #[error("Failed to read a spectrum's data arrays: {0}")]
    ArrayRetrievalError(
        #[source]
        #[from]
        ArrayRetrievalError,
    ),
    #[error("The input run is malformed: {0}")]
    RunError(
        #[source]
        #[from]
        RunError,
    ),
    #[error("Failed to convert the input file: {0}")]
    ConversionError(
        #[source]
        #[from]
        ConversionError,
    ),
    #[error("Failed to write the exported traces: {0}")]
    CsvError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        Box<figment::Error>,
    ),
}

impl From<figment::Error> for MZOscFixerError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigurationError(Box::new(value))
    }
}

/// Remove the carrier-frequency intensity oscillation from a mass spectrometry run.
///
/// Read an mzML file (or an mzXML file, converted with `msconvert`), estimate the
/// oscillation from a reference channel, subtract it from every oscillating channel
/// and write out a corrected mzML file.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZOscFixer {
    /// The path to read the input run from
    #[arg()]
    pub input_file: PathBuf,

    /// The path to write the output file to, or if '-' is passed, write to STDOUT.
    ///
    /// If a path is specified, the output format is inferred, otherwise mzML is assumed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzoscfixer.toml` in the working directory.
    /// Environment variables prefixed with `MZOSCFIXER_` will be read too. Values
    /// from these sources take precedence over the command line.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// The m/z of the channel the oscillation's phase is estimated from
    #[arg(short = 'r', long = "reference-mz", default_value_t = DEFAULT_REFERENCE_MZ)]
    pub reference_mz: f64,

    /// The m/z of channels to always correct, comma separated
    #[arg(
        short = 'c',
        long = "target-mz",
        value_delimiter = ',',
        default_values_t = DEFAULT_TARGETS.to_vec(),
    )]
    pub target_mzs: Vec<f64>,

    /// The mass accuracy used to match peaks to channels, as `<n>ppm`, `<n>da` or `<n>` in Daltons
    #[arg(
        short = 'e',
        long = "tolerance",
        default_value = "0.1da",
        value_parser = parse_tolerance,
    )]
    #[serde(with = "crate::args::tolerance_serde")]
    pub tolerance: Tolerance,

    /// The number of scans in each spectral analysis window
    #[arg(
        short = 'w',
        long = "window-size",
        default_value_t = DEFAULT_WINDOW_SIZE,
    )]
    pub window_size: usize,

    /// Corrected intensities below this fraction of the largest residual magnitude
    /// across all corrected channels are zeroed
    #[arg(
        long = "intensity-threshold",
        default_value_t = DEFAULT_INTENSITY_THRESHOLD,
        value_parser = unit_interval_f64,
    )]
    #[serde(deserialize_with = "crate::args::deserialize_unit_interval")]
    pub intensity_threshold: f64,

    /// The minimum importance score for an automatically detected channel
    #[arg(
        short = 'i',
        long = "importance-threshold",
        default_value_t = 0.1,
        value_parser = non_negative_float_f64,
    )]
    pub importance_threshold: f64,

    /// The maximum number of channels to add by automatic detection
    #[arg(short = 'm', long = "max-detected", default_value_t = 500)]
    pub max_detected: usize,

    /// Only correct the reference and target channels, skipping automatic detection
    #[arg(long = "no-detection")]
    pub disable_detection: bool,

    /// Write the trace, model and residual of every corrected channel to this CSV file
    #[arg(short = 'x', long = "export-xics")]
    pub export_xics: Option<PathBuf>,

    /// The program used to convert mzXML input to mzML
    #[arg(long = "msconvert", default_value = DEFAULT_MSCONVERT)]
    pub msconvert: String,

    /// Log at the DEBUG level unless `RUST_LOG` says otherwise
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[arg(skip)]
    #[serde(default)]
    pub tuning: TuningParams,
}

impl MZOscFixer {
    /// Layer the configuration file in the working directory, the file passed with
    /// `--config-file` and `MZOSCFIXER_` environment variables over these arguments.
    pub fn configure(self) -> Result<Self, MZOscFixerError> {
        let mut config =
            Figment::from(Serialized::defaults(&self)).merge(Toml::file(CONFIG_FILE_NAME));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed(ENV_PREFIX));
        Ok(config.extract()?)
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZOscFixerError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    pub fn correction_params(&self) -> CorrectionParams {
        CorrectionParams {
            reference_mz: self.reference_mz,
            targets: self.target_mzs.clone(),
            tolerance: self.tolerance,
            window_size: self.window_size,
            polynomial_degree: self.tuning.polynomial_degree,
            intensity_threshold: self.intensity_threshold,
            detection: DetectionParams {
                enabled: !self.disable_detection,
                importance_threshold: self.importance_threshold,
                max_channels: self.max_detected,
                intensity_floor: self.tuning.intensity_floor,
                decimal_precision: self.tuning.decimal_precision,
            },
        }
    }

    fn make_processing_method(&self) -> ProcessingMethod {
        let mut processing = ProcessingMethod::default();
        processing.add_param(Param::new_key_value(
            "reference_mz",
            self.reference_mz.to_string(),
        ));
        for mz in self.target_mzs.iter() {
            processing.add_param(Param::new_key_value("target_mz", mz.to_string()));
        }
        processing.add_param(Param::new_key_value(
            "tolerance",
            format_tolerance(&self.tolerance),
        ));
        processing.add_param(Param::new_key_value(
            "window_size",
            self.window_size.to_string(),
        ));
        processing.add_param(Param::new_key_value(
            "polynomial_degree",
            self.tuning.polynomial_degree.to_string(),
        ));
        processing.add_param(Param::new_key_value(
            "intensity_threshold",
            self.intensity_threshold.to_string(),
        ));
        if self.disable_detection {
            processing.add_param(Param::new_key_value("channel_detection", "false"));
        } else {
            processing.add_param(Param::new_key_value(
                "importance_threshold",
                self.importance_threshold.to_string(),
            ));
            processing.add_param(Param::new_key_value(
                "max_detected",
                self.max_detected.to_string(),
            ));
        }
        processing.order = i8::MAX;
        processing
    }

    pub fn main(&self) -> Result<(), MZOscFixerError> {
        info!(
            "mzoscfixer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.output_file.display());
        self.create_threadpool()?.install(|| self.run_workflow())
    }

    fn resolve_input(&self) -> Result<PathBuf, MZOscFixerError> {
        if !self.input_file.exists() {
            return Err(MZOscFixerError::InputFileNotFound(
                self.input_file.to_string_lossy().to_string(),
            ));
        }
        if requires_conversion(&self.input_file) {
            Ok(convert_to_mzml(&self.msconvert, &self.input_file)?)
        } else {
            Ok(self.input_file.clone())
        }
    }

    fn report(&self, outcome: &CorrectionOutcome) {
        let prog = &outcome.progress;
        if let Some(err) = outcome.reference_error.as_ref() {
            warn!(
                "Could not estimate the oscillation from {:.4}: {err}. The run was not corrected",
                self.reference_mz
            );
        }
        if let Some(detection) = outcome.detection.as_ref() {
            info!(
                "Candidates: {} | Evaluated: {} | Failed: {} | Accepted: {}",
                detection.candidates,
                detection.evaluated,
                detection.failed,
                detection.detected.len()
            );
            if detection.capped {
                warn!(
                    "Channel detection stopped at the limit of {} channels",
                    self.max_detected
                );
            }
        }
        info!(
            "Channels Corrected: {} | Dropped: {}",
            prog.channels_corrected, prog.channels_dropped
        );
        info!(
            "Intensities Replaced: {} | Zeroed: {}",
            prog.intensities_replaced, prog.intensities_zeroed
        );
    }

    fn run_workflow(&self) -> Result<(), MZOscFixerError> {
        let start = Instant::now();
        let input = self.resolve_input()?;

        let mut store =
            MzDataRunStore::new().with_processing_method(self.make_processing_method());
        let run = store.load(&input)?;
        info!("Scans: {}", run.len());

        let corrector = OscillationCorrector::new(self.correction_params());
        let outcome = corrector.correct_run(&run);
        let processing_elapsed = Instant::now() - start;
        self.report(&outcome);

        store.store(&outcome.run, &self.output_file)?;

        if let Some(path) = self.export_xics.as_ref() {
            info!(
                "Writing traces of {} channels to {}",
                outcome.channels.len(),
                path.display()
            );
            write_channels_to_path(path, &run.times(), &outcome.channels)?;
        }

        let elapsed = Instant::now() - start;
        info!("Processing Elapsed Time: {:0.3?}", processing_elapsed);
        if (elapsed.as_secs_f64() - processing_elapsed.as_secs_f64()) > 2.0 {
            info!("Total Elapsed Time: {:0.3?}", elapsed);
        }
        Ok(())
    }
}
