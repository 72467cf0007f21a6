//! * High level APIs for running a complete oscillation correction pass
use mzpeaks::Tolerance;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::correction::ChannelCorrection;
use crate::detector::{DetectionOutcome, DetectionParams, OscillationDetector};
use crate::error::EstimationError;
use crate::phase::{PhaseSynthesizer, DEFAULT_POLYNOMIAL_DEGREE};
use crate::progress::CorrectionProgress;
use crate::reconstruct::{reconstruct_run, ReconstructionSummary, DEFAULT_INTENSITY_THRESHOLD};
use crate::reference::PhaseReference;
use crate::run::Run;
use crate::spectral::{SpectralEstimator, DEFAULT_WINDOW_SIZE};
use crate::targets::TargetChannelSet;

/// The m/z of the channel whose oscillation is used as the shared phase reference
/// when none is given
pub const DEFAULT_REFERENCE_MZ: f64 = 922.098;

/// The channels corrected in every run when none are given
pub const DEFAULT_TARGETS: [f64; 6] = [60.07, 65.1, 95.1, 96.085, 110.1173, 922.098];

/// All of the parameters of a correction pass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrectionParams {
    /// The m/z of the channel the shared phase is estimated from
    pub reference_mz: f64,
    /// The channels to correct in addition to whatever detection finds
    pub targets: Vec<f64>,
    /// The mass accuracy used to match peaks to channels
    pub tolerance: Tolerance,
    /// The number of scans per spectral analysis window
    pub window_size: usize,
    /// The degree of the polynomial smoothing the instantaneous frequency
    pub polynomial_degree: usize,
    /// The fraction of the largest residual magnitude a corrected intensity must
    /// reach to be kept
    pub intensity_threshold: f64,
    pub detection: DetectionParams,
}

impl Default for CorrectionParams {
    fn default() -> Self {
        Self {
            reference_mz: DEFAULT_REFERENCE_MZ,
            targets: DEFAULT_TARGETS.to_vec(),
            tolerance: Tolerance::Da(0.1),
            window_size: DEFAULT_WINDOW_SIZE,
            polynomial_degree: DEFAULT_POLYNOMIAL_DEGREE,
            intensity_threshold: DEFAULT_INTENSITY_THRESHOLD,
            detection: DetectionParams::default(),
        }
    }
}

/// Everything a correction pass produced for one run.
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    /// The corrected run, or a copy of the input if nothing could be corrected
    pub run: Run,
    pub reference: Option<PhaseReference>,
    /// Why the reference phase could not be established, if it could not
    pub reference_error: Option<EstimationError>,
    pub detection: Option<DetectionOutcome>,
    /// The corrected channels in ascending m/z order
    pub channels: Vec<ChannelCorrection>,
    /// The channels that could not be modeled and why
    pub dropped: Vec<(f64, EstimationError)>,
    pub reconstruction: ReconstructionSummary,
    pub progress: CorrectionProgress,
}

impl CorrectionOutcome {
    fn passthrough(run: &Run, reference_error: EstimationError) -> Self {
        Self {
            run: run.clone(),
            reference: None,
            reference_error: Some(reference_error),
            detection: None,
            channels: Vec::new(),
            dropped: Vec::new(),
            reconstruction: ReconstructionSummary::default(),
            progress: CorrectionProgress {
                runs: 1,
                reference_failures: 1,
                ..Default::default()
            },
        }
    }

    /// The correction of the channel nearest `mz`, if one was corrected within `tolerance`
    pub fn channel(&self, mz: f64, tolerance: Tolerance) -> Option<&ChannelCorrection> {
        self.channels
            .iter()
            .filter(|c| crate::targets::within_tolerance(mz, c.mz, tolerance))
            .min_by(|a, b| (a.mz - mz).abs().total_cmp(&(b.mz - mz).abs()))
    }
}

/// Runs the full correction pipeline over runs with a fixed set of parameters.
///
/// The FFT plan for the analysis window is built once and reused for every run.
#[derive(Debug, Clone)]
pub struct OscillationCorrector {
    params: CorrectionParams,
    estimator: SpectralEstimator,
    synthesizer: PhaseSynthesizer,
    detector: OscillationDetector,
}

impl Default for OscillationCorrector {
    fn default() -> Self {
        Self::new(CorrectionParams::default())
    }
}

impl OscillationCorrector {
    pub fn new(params: CorrectionParams) -> Self {
        let estimator = SpectralEstimator::new(params.window_size);
        let synthesizer = PhaseSynthesizer::new(params.polynomial_degree);
        let detector = OscillationDetector::new(params.detection, params.tolerance);
        Self {
            params,
            estimator,
            synthesizer,
            detector,
        }
    }

    pub fn params(&self) -> &CorrectionParams {
        &self.params
    }

    /// The seeded target set, before detection
    pub fn seed_targets(&self) -> TargetChannelSet {
        TargetChannelSet::from_masses(self.params.targets.iter().copied(), self.params.tolerance)
    }

    /// Estimate the shared frequency track and phase from the reference channel
    pub fn establish_reference(&self, run: &Run) -> Result<PhaseReference, EstimationError> {
        PhaseReference::establish(
            run,
            self.params.reference_mz,
            self.params.tolerance,
            &self.estimator,
            &self.synthesizer,
        )
    }

    /// Model and subtract the oscillation of the channel at `mz`
    pub fn correct_channel(
        &self,
        run: &Run,
        reference: &PhaseReference,
        mz: f64,
    ) -> Result<ChannelCorrection, EstimationError> {
        reference.model_channel(run, mz, self.params.tolerance)
    }

    /// Grow `seeds` with the channels of `run` that carry the reference oscillation
    pub fn detect_oscillating_channels(
        &self,
        run: &Run,
        reference: &PhaseReference,
        seeds: &TargetChannelSet,
    ) -> DetectionOutcome {
        self.detector.detect(run, reference, seeds)
    }

    /// Correct each of `targets`, returning the successes in m/z order and the failures
    pub fn correct_channels(
        &self,
        run: &Run,
        reference: &PhaseReference,
        targets: &TargetChannelSet,
    ) -> (Vec<ChannelCorrection>, Vec<(f64, EstimationError)>) {
        let results: Vec<Result<ChannelCorrection, (f64, EstimationError)>> = targets
            .sorted()
            .into_par_iter()
            .map(|mz| {
                self.correct_channel(run, reference, mz)
                    .map_err(|err| (mz, err))
            })
            .collect();

        let mut channels = Vec::with_capacity(results.len());
        let mut dropped = Vec::new();
        for result in results {
            match result {
                Ok(channel) => {
                    debug!(
                        "Corrected m/z {:0.4} with amplitude {:0.4}",
                        channel.mz, channel.amplitude
                    );
                    channels.push(channel)
                }
                Err((mz, err)) => {
                    warn!("Dropping channel m/z {mz:0.4}: {err}");
                    dropped.push((mz, err));
                }
            }
        }
        (channels, dropped)
    }

    /// Run the complete pipeline on `run`: establish the reference phase, detect
    /// further oscillating channels, correct every target channel and rebuild the
    /// run from the residuals.
    ///
    /// Only the reference estimate can prevent correction. If it fails, the run is
    /// returned unchanged and the reason is kept in
    /// [`CorrectionOutcome::reference_error`].
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn correct_run(&self, run: &Run) -> CorrectionOutcome {
        let reference = match self.establish_reference(run) {
            Ok(reference) => reference,
            Err(err) => {
                warn!(
                    "Could not establish the reference phase from m/z {:0.4}, leaving the run uncorrected: {err}",
                    self.params.reference_mz
                );
                return CorrectionOutcome::passthrough(run, err);
            }
        };

        let seeds = self.seed_targets();
        let detection = self.detect_oscillating_channels(run, &reference, &seeds);
        let (channels, dropped) = self.correct_channels(run, &reference, &detection.targets);
        let (corrected, reconstruction) = reconstruct_run(
            run,
            &channels,
            self.params.tolerance,
            self.params.intensity_threshold,
        );

        let progress = CorrectionProgress {
            runs: 1,
            reference_failures: 0,
            channels_corrected: channels.len(),
            channels_dropped: dropped.len(),
            candidates_evaluated: detection.evaluated,
            candidates_failed: detection.failed,
            candidates_accepted: detection.detected.len(),
            intensities_replaced: reconstruction.replaced,
            intensities_zeroed: reconstruction.zeroed,
        };
        info!(
            "Corrected {} channels ({} dropped), replaced {} intensities",
            progress.channels_corrected, progress.channels_dropped, progress.intensities_replaced
        );

        CorrectionOutcome {
            run: corrected,
            reference: Some(reference),
            reference_error: None,
            detection: Some(detection),
            channels,
            dropped,
            reconstruction,
            progress,
        }
    }
}
