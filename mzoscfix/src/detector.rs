//! Automatic discovery of mass channels that carry the reference oscillation.
use itertools::Itertools;
use mzpeaks::Tolerance;
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::error::CandidateAnalysisError;
use crate::reference::PhaseReference;
use crate::run::Run;
use crate::targets::TargetChannelSet;
use crate::xic::extract_trace;

/// How many candidates each worker thread evaluates between merges
const CANDIDATES_PER_THREAD: usize = 16;

/// Parameters controlling oscillating channel detection
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionParams {
    /// Whether to look for channels beyond the seeded targets at all
    pub enabled: bool,
    /// The share of a channel's variance its model must explain to be accepted
    pub importance_threshold: f64,
    /// The most channels detection may add to the target set
    pub max_channels: usize,
    /// Only peaks at least this intense contribute candidate masses
    pub intensity_floor: f64,
    /// The number of decimal places candidate masses are rounded to
    pub decimal_precision: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            enabled: true,
            importance_threshold: 0.1,
            max_channels: 500,
            intensity_floor: 1.0,
            decimal_precision: 2,
        }
    }
}

/// Round `mz` to `decimal_precision` decimal places
pub fn round_mz(mz: f64, decimal_precision: u32) -> f64 {
    let scale = 10f64.powi(decimal_precision as i32);
    (mz * scale).round() / scale
}

/// Every distinct rounded m/z observed at or above `intensity_floor` anywhere in
/// `run`, in ascending order.
pub fn candidate_masses(run: &Run, intensity_floor: f64, decimal_precision: u32) -> Vec<f64> {
    let scale = 10f64.powi(decimal_precision as i32);
    run.iter()
        .flat_map(|scan| scan.iter())
        .filter(|(_, inten)| *inten as f64 >= intensity_floor)
        .map(|(mz, _)| (mz * scale).round() as i64)
        .sorted_unstable()
        .dedup()
        .map(|k| k as f64 / scale)
        .collect()
}

/// A channel accepted by the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedChannel {
    pub mz: f64,
    pub importance: f64,
}

/// The grown target set and a record of how it was grown.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    /// The seeds followed by the detected channels in ascending m/z order
    pub targets: TargetChannelSet,
    pub detected: Vec<DetectedChannel>,
    /// The number of distinct rounded masses above the intensity floor
    pub candidates: usize,
    pub evaluated: usize,
    pub failed: usize,
    /// Whether detection stopped early because `max_channels` was reached
    pub capped: bool,
}

impl DetectionOutcome {
    fn unchanged(targets: TargetChannelSet, candidates: usize) -> Self {
        Self {
            targets,
            detected: Vec::new(),
            candidates,
            evaluated: 0,
            failed: 0,
            capped: false,
        }
    }
}

/// Score how much of the variance of the trace of `mz` is explained by the
/// reference oscillation.
pub fn evaluate_candidate(
    run: &Run,
    reference: &PhaseReference,
    mz: f64,
    tolerance: Tolerance,
) -> Result<f64, CandidateAnalysisError> {
    let trace = extract_trace(run, mz, tolerance);
    let channel = reference
        .model_trace(mz, trace)
        .map_err(|source| CandidateAnalysisError::Estimation { mz, source })?;
    let importance = channel.importance();
    if importance.is_finite() {
        Ok(importance)
    } else {
        Err(CandidateAnalysisError::NonFiniteImportance { mz })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillationDetector {
    pub params: DetectionParams,
    pub tolerance: Tolerance,
}

impl OscillationDetector {
    pub fn new(params: DetectionParams, tolerance: Tolerance) -> Self {
        Self { params, tolerance }
    }

    /// Grow `seeds` with every candidate channel whose importance exceeds the
    /// threshold, visiting candidates in ascending m/z order.
    ///
    /// Candidates are scored in parallel a batch at a time, but accepted in m/z
    /// order, so the result does not depend on the number of threads. A candidate
    /// within tolerance of a seed or of a channel accepted before it is skipped.
    /// A candidate that fails to be modeled is logged and counted, never fatal.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn detect(
        &self,
        run: &Run,
        reference: &PhaseReference,
        seeds: &TargetChannelSet,
    ) -> DetectionOutcome {
        let mut targets = seeds.clone();
        if !self.params.enabled {
            return DetectionOutcome::unchanged(targets, 0);
        }
        let candidates = candidate_masses(
            run,
            self.params.intensity_floor,
            self.params.decimal_precision,
        );
        debug!("Found {} candidate masses", candidates.len());
        if self.params.max_channels == 0 {
            return DetectionOutcome::unchanged(targets, candidates.len());
        }

        let mut detected = Vec::new();
        let mut evaluated = 0;
        let mut failed = 0;
        let mut capped = false;

        let batch_size = (rayon::current_num_threads() * CANDIDATES_PER_THREAD).max(1);
        'batches: for batch in candidates.chunks(batch_size) {
            let pending: Vec<f64> = batch
                .iter()
                .copied()
                .filter(|mz| !targets.contains(*mz))
                .collect();
            let scored: Vec<(f64, Result<f64, CandidateAnalysisError>)> = pending
                .par_iter()
                .map(|mz| (*mz, evaluate_candidate(run, reference, *mz, self.tolerance)))
                .collect();

            for (mz, result) in scored {
                if targets.contains(mz) {
                    continue;
                }
                evaluated += 1;
                match result {
                    Ok(importance) if importance > self.params.importance_threshold => {
                        trace!("Accepted m/z {mz:0.4} with importance {importance:0.4}");
                        targets.insert(mz);
                        detected.push(DetectedChannel { mz, importance });
                        if detected.len() >= self.params.max_channels {
                            capped = true;
                            break 'batches;
                        }
                    }
                    Ok(importance) => {
                        trace!("Rejected m/z {mz:0.4} with importance {importance:0.4}");
                    }
                    Err(err) => {
                        failed += 1;
                        warn!("Skipping candidate: {err}");
                    }
                }
            }
        }

        info!(
            "Detected {} oscillating channels from {} candidates ({} evaluated, {} failed{})",
            detected.len(),
            candidates.len(),
            evaluated,
            failed,
            if capped { ", capped" } else { "" }
        );
        DetectionOutcome {
            targets,
            detected,
            candidates: candidates.len(),
            evaluated,
            failed,
            capped,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phase::PhaseFunction;
    use crate::run::Scan;
    use crate::spectral::{FrequencySample, FrequencyTrack};

    /// A reference whose frequency track never found an oscillation, so no channel
    /// can be modeled against it
    fn silent_reference(run: &Run) -> PhaseReference {
        let times = run.times();
        let n = times.len();
        let samples = times
            .iter()
            .step_by(2)
            .map(|t| FrequencySample::new(*t, None))
            .collect();
        PhaseReference {
            mz: 922.098,
            times,
            trace: vec![0.0; n],
            track: FrequencyTrack::new(samples, 1.0),
            phase: PhaseFunction::new(vec![0.0; n], vec![0.0; n]),
        }
    }

    #[test_log::test]
    fn test_failed_candidates_are_not_oscillating() {
        let scans = (0..10)
            .map(|i| {
                let t = i as f64;
                Scan::new(i, t, vec![200.0, 300.0], vec![50.0 + t as f32, 80.0 - t as f32])
            })
            .collect();
        let run = Run::new(scans).unwrap();
        let reference = silent_reference(&run);
        let seeds = TargetChannelSet::new(Tolerance::Da(0.1));

        let detector = OscillationDetector::new(DetectionParams::default(), Tolerance::Da(0.1));
        let outcome = detector.detect(&run, &reference, &seeds);
        assert_eq!(outcome.candidates, 2);
        assert_eq!(outcome.evaluated, 2);
        assert_eq!(outcome.failed, outcome.evaluated);
        assert!(outcome.detected.is_empty());
        assert!(!outcome.capped);
        assert_eq!(outcome.targets, seeds);

        let err = evaluate_candidate(&run, &reference, 200.0, Tolerance::Da(0.1)).unwrap_err();
        assert_eq!(err.mz(), 200.0);
        assert!(matches!(
            err,
            CandidateAnalysisError::Estimation {
                source: crate::error::EstimationError::NoValidAmplitude,
                ..
            }
        ));
    }

    #[test]
    fn test_candidate_masses() {
        let run = Run::new(vec![
            Scan::new(0, 0.0, vec![100.001, 100.004, 200.0], vec![5.0, 2.0, 0.5]),
            Scan::new(1, 1.0, vec![99.996, 150.25], vec![1.0, 3.0]),
        ])
        .unwrap();
        assert_eq!(candidate_masses(&run, 1.0, 2), vec![100.0, 150.25]);
        assert_eq!(candidate_masses(&run, 0.0, 0), vec![100.0, 150.0, 200.0]);
        assert_eq!(round_mz(922.0981, 2), 922.1);
    }
}
