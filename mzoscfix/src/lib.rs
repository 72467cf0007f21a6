//! `mzoscfix` removes a periodic carrier oscillation that modulates ion intensities
//! over the retention time of a mass spectrometry run.
//!
//! The oscillation is estimated once from a reference channel: a sliding window FFT
//! gives its dominant frequency over time ([`spectral`]), which is smoothed and
//! integrated into a phase shared by every channel ([`phase`]). Each target channel
//! then gets its own robust amplitude ([`amplitude`]), a sinusoidal model and a
//! residual ([`correction`]). Channels that carry the oscillation can be found
//! automatically ([`detector`]), and the residuals are written back into the peaks of
//! the run ([`reconstruct`]).
//!
//! [`OscillationCorrector`] runs the whole pass.
pub mod amplitude;
pub mod api;
pub mod correction;
pub mod detector;
pub mod error;
pub mod phase;
pub mod progress;
pub mod reconstruct;
pub mod reference;
pub mod run;
pub mod spectral;
pub mod stats;
pub mod targets;
pub mod xic;

pub use crate::api::{
    CorrectionOutcome, CorrectionParams, OscillationCorrector, DEFAULT_REFERENCE_MZ,
    DEFAULT_TARGETS,
};
pub use crate::correction::ChannelCorrection;
pub use crate::detector::{DetectionOutcome, DetectionParams, DetectedChannel};
pub use crate::error::{CandidateAnalysisError, EstimationError};
pub use crate::phase::PhaseFunction;
pub use crate::progress::CorrectionProgress;
pub use crate::reconstruct::ReconstructionSummary;
pub use crate::reference::PhaseReference;
pub use crate::run::{Run, RunError, RunStore, Scan};
pub use crate::spectral::{FrequencySample, FrequencyTrack};
pub use crate::targets::TargetChannelSet;
pub use crate::xic::Trace;
