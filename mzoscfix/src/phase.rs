//! Turn a sparse [`FrequencyTrack`] into a continuous, smoothed phase function
//! sampled on every scan of a run.
//!
//! The frequency estimates of individual windows are noisy, so they are
//! interpolated onto the dense time axis, smoothed by a low order least squares
//! polynomial and then integrated with the trapezoid rule:
//!
//! ```math
//! \phi(t_i) = 2\pi \sum_{j=1}^{i} \frac{f(t_{j-1}) + f(t_j)}{2} (t_j - t_{j-1})
//! ```
use std::f64::consts::TAU;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::EstimationError;
use crate::spectral::FrequencyTrack;

pub const DEFAULT_POLYNOMIAL_DEGREE: usize = 2;

const SINGULAR_PIVOT: f64 = 1e-12;

/// Piecewise linear interpolation of the points `(xp, fp)` at each `x`, holding the
/// end values constant outside of `xp`'s range. `xp` must be ascending.
pub fn interpolate(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    if xp.is_empty() || xp.len() != fp.len() {
        return vec![f64::NAN; x.len()];
    }
    let last = xp.len() - 1;
    x.iter()
        .map(|xi| {
            let idx = xp.partition_point(|v| v <= xi);
            if idx == 0 {
                fp[0]
            } else if idx > last {
                fp[last]
            } else {
                let (lo, hi) = (idx - 1, idx);
                let dx = xp[hi] - xp[lo];
                if dx <= 0.0 {
                    fp[lo]
                } else {
                    fp[lo] + (fp[hi] - fp[lo]) * (xi - xp[lo]) / dx
                }
            }
        })
        .collect()
}

/// Cumulative trapezoid rule integral of `y` over `x`, starting from 0.
pub fn cumulative_trapezoid(y: &[f64], x: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    let mut out = Vec::with_capacity(y.len());
    if y.is_empty() {
        return out;
    }
    out.push(0.0);
    for i in 1..y.len().min(x.len()) {
        acc += (y[i - 1] + y[i]) / 2.0 * (x[i] - x[i - 1]);
        out.push(acc);
    }
    out
}

/// A least squares polynomial in a centered and scaled variable,
/// `u = (x - offset) / scale`, which keeps the normal equations well conditioned
/// for retention times in the thousands of seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
    offset: f64,
    scale: f64,
}

impl Polynomial {
    /// Fit a polynomial of at most `degree` to `(x, y)`.
    ///
    /// When the system is singular for the requested degree, the degree is lowered
    /// until a solution exists. A degree 0 fit is the mean of `y`, so this only
    /// returns `None` for empty or mismatched input.
    pub fn fit(x: &[f64], y: &[f64], degree: usize) -> Option<Self> {
        if x.is_empty() || x.len() != y.len() {
            return None;
        }
        let offset = x[0];
        let scale = x
            .iter()
            .map(|v| (v - offset).abs())
            .fold(0.0, f64::max);
        let scale = if scale > 0.0 && scale.is_finite() {
            scale
        } else {
            1.0
        };
        let u: Vec<f64> = x.iter().map(|v| (v - offset) / scale).collect();

        let max_degree = degree.min(x.len() - 1);
        (0..=max_degree).rev().find_map(|d| {
            solve_normal_equations(&u, y, d).map(|coefficients| Self {
                coefficients,
                offset,
                scale,
            })
        })
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Coefficients of the scaled variable, lowest order first
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn eval(&self, x: f64) -> f64 {
        let u = (x - self.offset) / self.scale;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * u + c)
    }
}

/// Solve the normal equations `VᵀV c = Vᵀy` of the Vandermonde matrix `V` of `u`,
/// rejecting systems with a vanishing LU pivot.
fn solve_normal_equations(u: &[f64], y: &[f64], degree: usize) -> Option<Vec<f64>> {
    let k = degree + 1;
    let vandermonde = DMatrix::<f64>::from_fn(u.len(), k, |i, j| u[i].powi(j as i32));
    let target = DVector::<f64>::from_column_slice(y);
    let gram = vandermonde.tr_mul(&vandermonde);
    let rhs = vandermonde.tr_mul(&target);

    let lu = gram.lu();
    if lu.u().diagonal().iter().any(|d| d.abs() < SINGULAR_PIVOT) {
        return None;
    }
    let solution = lu.solve(&rhs)?;
    if solution.iter().all(|v| v.is_finite()) {
        Some(solution.as_slice().to_vec())
    } else {
        None
    }
}

/// The accumulated phase of the carrier oscillation at every scan, shared by all
/// mass channels of a run, together with the smoothed instantaneous frequency it
/// was integrated from.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFunction {
    phase: Vec<f64>,
    frequency: Vec<f64>,
}

impl PhaseFunction {
    pub fn new(phase: Vec<f64>, frequency: Vec<f64>) -> Self {
        Self { phase, frequency }
    }

    pub fn phase(&self) -> &[f64] {
        &self.phase
    }

    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    pub fn len(&self) -> usize {
        self.phase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSynthesizer {
    pub degree: usize,
}

impl Default for PhaseSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_POLYNOMIAL_DEGREE)
    }
}

impl PhaseSynthesizer {
    pub fn new(degree: usize) -> Self {
        Self { degree }
    }

    /// Build the [`PhaseFunction`] for `times` from the defined samples of `track`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn synthesize(
        &self,
        track: &FrequencyTrack,
        times: &[f64],
    ) -> Result<PhaseFunction, EstimationError> {
        if times.is_empty() {
            return Err(EstimationError::InsufficientSamples {
                found: 0,
                required: 1,
            });
        }
        let (knot_times, knot_freqs): (Vec<f64>, Vec<f64>) = track.defined().unzip();
        if knot_times.is_empty() {
            return Err(EstimationError::NoDominantFrequency {
                windows: track.len(),
            });
        }

        let dense = interpolate(times, &knot_times, &knot_freqs);
        let polynomial = Polynomial::fit(times, &dense, self.degree).ok_or(
            EstimationError::LengthMismatch {
                expected: times.len(),
                found: dense.len(),
            },
        )?;
        debug!(
            "Smoothed frequency with a degree {} polynomial: {:?}",
            polynomial.degree(),
            polynomial.coefficients()
        );
        let frequency: Vec<f64> = times.iter().map(|t| polynomial.eval(*t)).collect();
        let phase = cumulative_trapezoid(&frequency, times)
            .into_iter()
            .map(|v| v * TAU)
            .collect();
        Ok(PhaseFunction::new(phase, frequency))
    }
}

/// Synthesize a phase function with the default polynomial degree
pub fn synthesize_phase(
    track: &FrequencyTrack,
    times: &[f64],
) -> Result<PhaseFunction, EstimationError> {
    PhaseSynthesizer::default().synthesize(track, times)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectral::FrequencySample;

    fn linear_times(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn test_interpolate() {
        let xp = [1.0, 2.0, 4.0];
        let fp = [10.0, 20.0, 0.0];
        let out = interpolate(&[0.0, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0], &xp, &fp);
        assert_eq!(out, vec![10.0, 10.0, 15.0, 20.0, 10.0, 0.0, 0.0]);
    }

    #[test]
    fn test_polynomial_fit() {
        let x: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 - 0.5 * v + 0.01 * v * v).collect();
        let poly = Polynomial::fit(&x, &y, 2).unwrap();
        assert_eq!(poly.degree(), 2);
        for (xi, yi) in x.iter().zip(y.iter()) {
            assert!((poly.eval(*xi) - yi).abs() < 1e-8);
        }

        let poly = Polynomial::fit(&[1.0, 1.0, 1.0], &[2.0, 4.0, 6.0], 2).unwrap();
        assert_eq!(poly.degree(), 0);
        assert!((poly.eval(1.0) - 4.0).abs() < 1e-12);

        let poly = Polynomial::fit(&[5.0], &[2.0], 2).unwrap();
        assert_eq!(poly.degree(), 0);
        assert!(Polynomial::fit(&[], &[], 2).is_none());
    }

    #[test]
    fn test_polynomial_fit_lowers_degree() {
        // Two distinct abscissae cannot support a quadratic term
        let x = [0.0, 0.0, 1.0, 1.0];
        let y = [1.0, 1.0, 3.0, 3.0];
        let poly = Polynomial::fit(&x, &y, 2).unwrap();
        assert_eq!(poly.degree(), 1);
        assert!((poly.eval(0.0) - 1.0).abs() < 1e-12);
        assert!((poly.eval(0.5) - 2.0).abs() < 1e-12);
        assert!((poly.eval(1.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cumulative_trapezoid() {
        let x = [0.0, 1.0, 2.0, 4.0];
        let y = [1.0, 3.0, 3.0, 1.0];
        assert_eq!(cumulative_trapezoid(&y, &x), vec![0.0, 2.0, 5.0, 9.0]);
    }

    #[test]
    fn test_constant_frequency_phase() {
        let times = linear_times(200, 0.05);
        let samples = (0..9)
            .map(|i| FrequencySample::new(1.0 + i as f64, Some(3.0)))
            .collect();
        let track = FrequencyTrack::new(samples, 0.05);
        let phase = synthesize_phase(&track, &times).unwrap();
        assert_eq!(phase.len(), times.len());
        assert_eq!(phase.phase()[0], 0.0);
        for (t, p) in times.iter().zip(phase.phase()) {
            assert!((p - TAU * 3.0 * t).abs() < 1e-6, "{p} vs {}", TAU * 3.0 * t);
        }
        assert!(phase.phase().windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_linear_chirp_phase() {
        let times = linear_times(101, 0.1);
        let samples = [0.0, 5.0, 10.0]
            .into_iter()
            .map(|t| FrequencySample::new(t, Some(1.0 + 0.1 * t)))
            .collect();
        let track = FrequencyTrack::new(samples, 0.1);
        let phase = synthesize_phase(&track, &times).unwrap();
        for (t, p) in times.iter().zip(phase.phase()) {
            let expected = TAU * (t + 0.05 * t * t);
            assert!((p - expected).abs() < 1e-6, "{p} vs {expected}");
        }
    }

    #[test]
    fn test_undefined_track() {
        let times = linear_times(10, 1.0);
        let track = FrequencyTrack::new(vec![FrequencySample::new(2.0, None)], 1.0);
        assert_eq!(
            synthesize_phase(&track, &times),
            Err(EstimationError::NoDominantFrequency { windows: 1 })
        );
        assert!(matches!(
            synthesize_phase(&track, &[]),
            Err(EstimationError::InsufficientSamples { .. })
        ));
    }
}
