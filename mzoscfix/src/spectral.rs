//! Sliding-window estimation of the dominant oscillation frequency of a trace.
use std::fmt::Debug;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::{debug, trace};

use crate::error::EstimationError;
use crate::run::sampling_interval;

/// The number of samples per analysis window used when none is specified
pub const DEFAULT_WINDOW_SIZE: usize = 70;

/// The smallest window with at least one strictly positive frequency bin
pub const MIN_WINDOW_SIZE: usize = 3;

/// Magnitudes at or below this fraction of the window's absolute sum are
/// indistinguishable from rounding noise left over by mean-centering.
const SILENT_WINDOW_RATIO: f64 = 1e-12;

/// The dominant frequency of one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySample {
    /// The mean retention time of the window
    pub time: f64,
    /// The strongest strictly positive frequency, or `None` if the window had no
    /// spectral peak at all
    pub frequency: Option<f64>,
}

impl FrequencySample {
    pub fn new(time: f64, frequency: Option<f64>) -> Self {
        Self { time, frequency }
    }

    /// The frequency, if it is defined and strictly positive
    pub fn positive_frequency(&self) -> Option<f64> {
        self.frequency.filter(|f| *f > 0.0)
    }
}

/// A sparse series of window-level dominant frequencies along a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTrack {
    samples: Vec<FrequencySample>,
    sampling_interval: f64,
}

impl FrequencyTrack {
    pub fn new(samples: Vec<FrequencySample>, sampling_interval: f64) -> Self {
        Self {
            samples,
            sampling_interval,
        }
    }

    pub fn samples(&self) -> &[FrequencySample] {
        &self.samples
    }

    /// The mean time between consecutive samples of the trace the track was built from
    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate over `(time, frequency)` for samples with a positive frequency
    pub fn defined(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.samples
            .iter()
            .filter_map(|s| s.positive_frequency().map(|f| (s.time, f)))
    }

    pub fn defined_count(&self) -> usize {
        self.defined().count()
    }
}

/// Computes a [`FrequencyTrack`] from windows of `window_size` samples overlapping by
/// half a window. A trailing window that would run past the end of the trace is
/// dropped.
#[derive(Clone)]
pub struct SpectralEstimator {
    window_size: usize,
    fft: Arc<dyn Fft<f64>>,
}

impl Debug for SpectralEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralEstimator")
            .field("window_size", &self.window_size)
            .finish()
    }
}

impl Default for SpectralEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SpectralEstimator {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(MIN_WINDOW_SIZE);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        Self { window_size, fft }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn step(&self) -> usize {
        (self.window_size / 2).max(1)
    }

    /// Estimate the dominant frequency of every full window of `trace`.
    ///
    /// Fails with [`EstimationError::NoDominantFrequency`] when no window has a
    /// positive-frequency peak, which is reported separately from a legitimately
    /// small frequency.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn estimate(
        &self,
        trace: &[f64],
        times: &[f64],
    ) -> Result<FrequencyTrack, EstimationError> {
        if trace.len() != times.len() {
            return Err(EstimationError::LengthMismatch {
                expected: times.len(),
                found: trace.len(),
            });
        }
        if trace.len() < self.window_size {
            return Err(EstimationError::InsufficientSamples {
                found: trace.len(),
                required: self.window_size,
            });
        }
        let dt = sampling_interval(times).ok_or(EstimationError::InvalidSamplingInterval)?;

        let mut buffer = vec![Complex::new(0.0, 0.0); self.window_size];
        let samples: Vec<FrequencySample> = (0..=(trace.len() - self.window_size))
            .step_by(self.step())
            .map(|start| {
                let end = start + self.window_size;
                let time = times[start..end].iter().sum::<f64>() / self.window_size as f64;
                let frequency = self.dominant_frequency(&trace[start..end], dt, &mut buffer);
                trace!("Window {start}-{end} @ {time:0.3}: {frequency:?}");
                FrequencySample::new(time, frequency)
            })
            .collect();

        let track = FrequencyTrack::new(samples, dt);
        if track.defined_count() == 0 {
            return Err(EstimationError::NoDominantFrequency {
                windows: track.len(),
            });
        }
        debug!(
            "Estimated {} of {} window frequencies",
            track.defined_count(),
            track.len()
        );
        Ok(track)
    }

    /// The strongest strictly positive frequency of a mean-centered window.
    fn dominant_frequency(
        &self,
        segment: &[f64],
        sampling_interval: f64,
        buffer: &mut [Complex<f64>],
    ) -> Option<f64> {
        let n = segment.len();
        let mu = segment.iter().sum::<f64>() / n as f64;
        for (slot, value) in buffer.iter_mut().zip(segment.iter()) {
            *slot = Complex::new(value - mu, 0.0);
        }
        self.fft.process(buffer);

        // The Nyquist bin of an even-length window is not a positive frequency
        let last_positive = (n - 1) / 2;
        let mut best_bin = 0;
        let mut best_magnitude = 0.0;
        for (k, value) in buffer.iter().enumerate().take(last_positive + 1).skip(1) {
            let magnitude = value.norm();
            if magnitude > best_magnitude {
                best_magnitude = magnitude;
                best_bin = k;
            }
        }

        let scale: f64 = segment.iter().map(|v| v.abs()).sum();
        let silent = best_magnitude <= scale * SILENT_WINDOW_RATIO;
        if best_bin == 0 || !best_magnitude.is_finite() || silent {
            None
        } else {
            Some(best_bin as f64 / (n as f64 * sampling_interval))
        }
    }
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;

    use super::*;

    fn linear_times(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn test_constant_frequency() {
        let times = linear_times(401, 0.025);
        let trace: Vec<f64> = times
            .iter()
            .map(|t| 10.0 + (2.0 * PI * 3.0 * t).sin())
            .collect();
        let estimator = SpectralEstimator::new(40);
        let track = estimator.estimate(&trace, &times).unwrap();
        // Windows start every 20 samples and the last must end at or before 401
        assert_eq!(track.len(), 19);
        assert_eq!(track.defined_count(), 19);
        for (_, f) in track.defined() {
            assert!((f - 3.0).abs() < 1e-9, "{f}");
        }
        let first = track.samples()[0];
        assert!((first.time - 0.4875).abs() < 1e-9, "{}", first.time);
    }

    #[test]
    fn test_window_boundaries() {
        let times = linear_times(80, 0.5);
        let trace: Vec<f64> = times.iter().map(|t| (2.0 * PI * 0.25 * t).sin()).collect();
        let estimator = SpectralEstimator::new(40);
        let track = estimator.estimate(&trace, &times).unwrap();
        assert_eq!(track.len(), 3);

        let trace = &trace[..79];
        let track = estimator.estimate(trace, &times[..79]).unwrap();
        assert_eq!(track.len(), 2);
    }

    #[test]
    fn test_flat_trace_is_degenerate() {
        let times = linear_times(100, 0.1);
        let trace = vec![0.1; 100];
        let estimator = SpectralEstimator::new(20);
        match estimator.estimate(&trace, &times) {
            Err(EstimationError::NoDominantFrequency { windows }) => assert_eq!(windows, 9),
            other => panic!("Expected a degenerate estimate, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let estimator = SpectralEstimator::new(70);
        let times = linear_times(50, 0.2);
        let trace = vec![1.0; 50];
        assert_eq!(
            estimator.estimate(&trace, &times),
            Err(EstimationError::InsufficientSamples {
                found: 50,
                required: 70
            })
        );
        assert!(matches!(
            estimator.estimate(&trace[..10], &times),
            Err(EstimationError::LengthMismatch { .. })
        ));
        let times = vec![1.0; 80];
        let trace: Vec<f64> = (0..80).map(|i| (i % 2) as f64).collect();
        assert_eq!(
            estimator.estimate(&trace, &times),
            Err(EstimationError::InvalidSamplingInterval)
        );
        assert_eq!(SpectralEstimator::new(1).window_size(), MIN_WINDOW_SIZE);
    }
}
