//! The reference channel whose oscillation defines the phase shared by every
//! other channel of a run.
use mzpeaks::Tolerance;
use tracing::debug;

use crate::correction::ChannelCorrection;
use crate::error::EstimationError;
use crate::phase::{PhaseFunction, PhaseSynthesizer};
use crate::run::Run;
use crate::spectral::{FrequencyTrack, SpectralEstimator};
use crate::xic::{extract_trace, Trace};

/// The frequency track and phase function estimated from the reference channel
/// of one run.
///
/// A [`PhaseReference`] is only meaningful for the run it was established from.
/// Modeling a trace of a different length fails with
/// [`EstimationError::LengthMismatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReference {
    pub mz: f64,
    pub times: Vec<f64>,
    pub trace: Trace,
    pub track: FrequencyTrack,
    pub phase: PhaseFunction,
}

impl PhaseReference {
    #[tracing::instrument(level = "debug", skip(run, estimator, synthesizer))]
    pub fn establish(
        run: &Run,
        mz: f64,
        tolerance: Tolerance,
        estimator: &SpectralEstimator,
        synthesizer: &PhaseSynthesizer,
    ) -> Result<Self, EstimationError> {
        let times = run.times();
        let trace = extract_trace(run, mz, tolerance);
        let track = estimator.estimate(&trace, &times)?;
        let phase = synthesizer.synthesize(&track, &times)?;
        debug!(
            "Reference m/z {mz:0.4} has {} defined frequency samples over {} scans",
            track.defined_count(),
            times.len()
        );
        Ok(Self {
            mz,
            times,
            trace,
            track,
            phase,
        })
    }

    pub fn sampling_interval(&self) -> f64 {
        self.track.sampling_interval()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Model an already extracted trace against this reference
    pub fn model_trace(&self, mz: f64, trace: Trace) -> Result<ChannelCorrection, EstimationError> {
        ChannelCorrection::from_trace(mz, trace, &self.track, &self.phase)
    }

    /// Extract and model the trace of `mz` from `run`
    pub fn model_channel(
        &self,
        run: &Run,
        mz: f64,
        tolerance: Tolerance,
    ) -> Result<ChannelCorrection, EstimationError> {
        ChannelCorrection::from_run(run, mz, tolerance, &self.track, &self.phase)
    }
}
