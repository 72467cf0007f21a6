//! Robust estimation of the oscillation amplitude carried by a single trace.
use tracing::trace;

use crate::error::EstimationError;
use crate::spectral::FrequencyTrack;
use crate::stats::{percentile, percentile_sorted};

/// The percentile of the local amplitudes reported as the channel amplitude
pub const AMPLITUDE_PERCENTILE: f64 = 75.0;

/// Half the interquartile range of `segment`, a spread measure that ignores the
/// isolated spikes a max-min range would pick up.
pub fn half_interquartile_range(segment: &[f64]) -> Option<f64> {
    let mut sorted = segment.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q25 = percentile_sorted(&sorted, 25.0)?;
    let q75 = percentile_sorted(&sorted, 75.0)?;
    let value = (q75 - q25) / 2.0;
    value.is_finite().then_some(value)
}

/// The bounds `[start, end)` of the segment of a trace of length `n` belonging to
/// the `index`-th of `segments` frequency samples, one local period wide.
fn segment_bounds(index: usize, segments: usize, n: usize, period: f64) -> (usize, usize) {
    let center = (index * (n / segments)) as f64;
    let half = period / 2.0;
    let start = (center - half).max(0.0) as usize;
    let end = (center + half).min(n as f64) as usize;
    (start, end.max(start))
}

/// Estimate the amplitude of the oscillation in `trace` using the frequency
/// samples of the shared reference track.
///
/// The trace is cut into one segment per frequency sample, each as wide as the
/// local period `1 / (frequency * dt)` in samples. Samples without a positive
/// frequency and segments that come out empty are skipped. The result is the 75th
/// percentile of the per-segment half interquartile ranges.
pub fn estimate_amplitude(trace: &[f64], track: &FrequencyTrack) -> Result<f64, EstimationError> {
    let n = trace.len();
    let segments = track.len();
    let dt = track.sampling_interval();
    if n == 0 || segments == 0 {
        return Err(EstimationError::NoValidAmplitude);
    }
    if !(dt.is_finite() && dt > 0.0) {
        return Err(EstimationError::InvalidSamplingInterval);
    }

    let local_amplitudes: Vec<f64> = track
        .samples()
        .iter()
        .enumerate()
        .filter_map(|(i, sample)| {
            let frequency = sample.positive_frequency()?;
            let period = (1.0 / (frequency * dt)).trunc();
            if !period.is_finite() {
                return None;
            }
            let (start, end) = segment_bounds(i, segments, n, period);
            if start >= end {
                return None;
            }
            let local = half_interquartile_range(&trace[start..end]);
            trace!("Segment {i} [{start}, {end}) amplitude {local:?}");
            local
        })
        .collect();

    percentile(&local_amplitudes, AMPLITUDE_PERCENTILE).ok_or(EstimationError::NoValidAmplitude)
}

#[cfg(test)]
mod test {
    use std::f64::consts::TAU;

    use super::*;
    use crate::spectral::FrequencySample;

    fn sine_trace(n: usize, dt: f64, frequency: f64, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| 50.0 + amplitude * (TAU * frequency * i as f64 * dt).sin())
            .collect()
    }

    #[test]
    fn test_half_iqr() {
        assert_eq!(half_interquartile_range(&[4.0, 1.0, 3.0, 2.0]), Some(0.75));
        assert_eq!(half_interquartile_range(&[]), None);
    }

    #[test]
    fn test_segment_bounds() {
        assert_eq!(segment_bounds(0, 4, 100, 10.0), (0, 5));
        assert_eq!(segment_bounds(2, 4, 100, 10.0), (45, 55));
        assert_eq!(segment_bounds(3, 4, 100, 101.0), (24, 100));
        assert_eq!(segment_bounds(1, 4, 100, 0.0), (25, 25));
    }

    #[test]
    fn test_amplitude_is_pure() {
        let dt = 0.025;
        let trace = sine_trace(401, dt, 3.0, 2.0);
        let samples = (0..19)
            .map(|i| FrequencySample::new(i as f64 * 0.5, Some(3.0)))
            .collect();
        let track = FrequencyTrack::new(samples, dt);
        let first = estimate_amplitude(&trace, &track).unwrap();
        let second = estimate_amplitude(&trace, &track).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
        assert!(first > 0.5 && first < 2.0, "{first}");
    }

    #[test]
    fn test_amplitude_failures() {
        let trace = vec![1.0; 50];
        let track = FrequencyTrack::new(
            vec![
                FrequencySample::new(1.0, None),
                FrequencySample::new(2.0, Some(0.0)),
            ],
            0.2,
        );
        assert_eq!(
            estimate_amplitude(&trace, &track),
            Err(EstimationError::NoValidAmplitude)
        );

        // A frequency above the sampling rate has a zero-length period
        let track = FrequencyTrack::new(vec![FrequencySample::new(1.0, Some(10.0))], 0.2);
        assert_eq!(
            estimate_amplitude(&trace, &track),
            Err(EstimationError::NoValidAmplitude)
        );

        let track = FrequencyTrack::new(vec![], 0.2);
        assert_eq!(
            estimate_amplitude(&trace, &track),
            Err(EstimationError::NoValidAmplitude)
        );

        let track = FrequencyTrack::new(vec![FrequencySample::new(1.0, Some(1.0))], 0.2);
        assert_eq!(estimate_amplitude(&trace, &track), Ok(0.0));
    }
}
