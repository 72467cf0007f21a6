//! Model the oscillation of a single channel and subtract it from its trace.
use mzpeaks::Tolerance;

use crate::amplitude::estimate_amplitude;
use crate::error::EstimationError;
use crate::phase::PhaseFunction;
use crate::run::Run;
use crate::spectral::FrequencyTrack;
use crate::stats::variance;
use crate::xic::{extract_trace, Trace};

/// Added to the trace variance so a silent channel has zero, not undefined, importance
pub const IMPORTANCE_EPSILON: f64 = 1e-8;

/// `amplitude * sin(phase)` at every sample of the phase function
pub fn model_oscillation(amplitude: f64, phase: &PhaseFunction) -> Vec<f64> {
    phase.phase().iter().map(|p| amplitude * p.sin()).collect()
}

/// `trace - model`, elementwise. Negative values are kept as-is.
pub fn subtract_model(trace: &[f64], model: &[f64]) -> Result<Vec<f64>, EstimationError> {
    if trace.len() != model.len() {
        return Err(EstimationError::LengthMismatch {
            expected: model.len(),
            found: trace.len(),
        });
    }
    Ok(trace.iter().zip(model.iter()).map(|(t, m)| t - m).collect())
}

/// The share of a trace's variance explained by its oscillation model
pub fn importance(model: &[f64], trace: &[f64]) -> f64 {
    variance(model) / (variance(trace) + IMPORTANCE_EPSILON)
}

/// The outcome of modeling one mass channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCorrection {
    pub mz: f64,
    pub amplitude: f64,
    pub trace: Trace,
    pub model: Vec<f64>,
    pub residual: Vec<f64>,
}

impl ChannelCorrection {
    /// Model `trace` with the shared reference `track` and `phase`.
    pub fn from_trace(
        mz: f64,
        trace: Trace,
        track: &FrequencyTrack,
        phase: &PhaseFunction,
    ) -> Result<Self, EstimationError> {
        let amplitude = estimate_amplitude(&trace, track)?;
        let model = model_oscillation(amplitude, phase);
        let residual = subtract_model(&trace, &model)?;
        Ok(Self {
            mz,
            amplitude,
            trace,
            model,
            residual,
        })
    }

    /// Extract the trace for `mz` from `run` and model it.
    pub fn from_run(
        run: &Run,
        mz: f64,
        tolerance: Tolerance,
        track: &FrequencyTrack,
        phase: &PhaseFunction,
    ) -> Result<Self, EstimationError> {
        let trace = extract_trace(run, mz, tolerance);
        Self::from_trace(mz, trace, track, phase)
    }

    pub fn importance(&self) -> f64 {
        importance(&self.model, &self.trace)
    }

    /// The residual variance as a fraction of the original trace variance
    pub fn residual_variance_ratio(&self) -> f64 {
        variance(&self.residual) / (variance(&self.trace) + IMPORTANCE_EPSILON)
    }

    /// The largest residual magnitude of this channel
    pub fn max_abs_residual(&self) -> f64 {
        self.residual.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    pub fn len(&self) -> usize {
        self.trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }
}
