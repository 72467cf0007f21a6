/*! Error types for estimation stages that may fail on a single channel */
use thiserror::Error;

/// A spectral or amplitude estimate that could not produce a usable value.
///
/// These errors are local to one channel. The engine drops the channel, logs the
/// reason and carries on with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    #[error("Need at least {required} samples for a window of that size, found {found}")]
    InsufficientSamples { found: usize, required: usize },
    #[error("The time axis does not have a positive sampling interval")]
    InvalidSamplingInterval,
    #[error("None of the {windows} analysis windows had a dominant positive frequency")]
    NoDominantFrequency { windows: usize },
    #[error("No segment of the trace produced a valid local amplitude")]
    NoValidAmplitude,
    #[error("Expected {expected} values but found {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// A failure while evaluating one candidate channel for oscillation. The candidate
/// is treated as not oscillating.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandidateAnalysisError {
    #[error("Failed to model m/z {mz:0.4}: {source}")]
    Estimation {
        mz: f64,
        #[source]
        source: EstimationError,
    },
    #[error("The importance of m/z {mz:0.4} was not finite")]
    NonFiniteImportance { mz: f64 },
}

impl CandidateAnalysisError {
    pub fn mz(&self) -> f64 {
        match self {
            Self::Estimation { mz, .. } => *mz,
            Self::NonFiniteImportance { mz } => *mz,
        }
    }
}
