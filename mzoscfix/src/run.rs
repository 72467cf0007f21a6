//! The run data model shared by every stage of the correction pipeline.
//!
//! A [`Run`] is an ordered, validated sequence of [`Scan`]s. Scans keep their full
//! [`SpectrumDescription`] so that a corrected run can be written back out with the
//! acquisition metadata untouched.
use std::path::Path;

use mzdata::spectrum::{ScanEvent, SignalContinuity, SpectrumDescription};
use thiserror::Error;

/// A problem with the shape or content of a run's scans. These are input errors:
/// a run that fails validation cannot be processed at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("Scan {index} has {mzs} m/z values but {intensities} intensity values")]
    ArrayLengthMismatch {
        index: usize,
        mzs: usize,
        intensities: usize,
    },
    #[error("Scan {index} has m/z values that are not in ascending order")]
    UnsortedMZ { index: usize },
    #[error("Scan {index} at {time} precedes the prior scan at {previous}")]
    TimeNotMonotonic {
        index: usize,
        time: f64,
        previous: f64,
    },
    #[error("Scan {index} contains a non-finite value")]
    NonFiniteValue { index: usize },
}

/// One time point of a run: acquisition metadata plus a centroided peak list
/// stored as parallel m/z and intensity arrays, m/z ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub description: SpectrumDescription,
    pub mzs: Vec<f64>,
    pub intensities: Vec<f32>,
}

impl Scan {
    /// Build a synthetic MS1 centroid scan at `time`
    pub fn new(index: usize, time: f64, mzs: Vec<f64>, intensities: Vec<f32>) -> Self {
        let mut description = SpectrumDescription::default();
        description.id = format!("index={index}");
        description.index = index;
        description.ms_level = 1;
        description.signal_continuity = SignalContinuity::Centroid;
        let mut event = ScanEvent::default();
        event.start_time = time;
        description.acquisition.scans = vec![event];
        Self::from_parts(description, mzs, intensities)
    }

    pub fn from_parts(
        description: SpectrumDescription,
        mzs: Vec<f64>,
        intensities: Vec<f32>,
    ) -> Self {
        Self {
            description,
            mzs,
            intensities,
        }
    }

    /// The retention time of the scan, the start time of its first acquisition event
    #[inline]
    pub fn time(&self) -> f64 {
        match self.description.acquisition.scans.first() {
            Some(evt) => evt.start_time,
            None => 0.0,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.description.index
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.description.id
    }

    #[inline]
    pub fn ms_level(&self) -> u8 {
        self.description.ms_level
    }

    pub fn len(&self) -> usize {
        self.mzs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mzs.is_empty()
    }

    /// Iterate over `(m/z, intensity)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.mzs.iter().copied().zip(self.intensities.iter().copied())
    }

    /// A copy of this scan with the same metadata and m/z axis but new intensities
    pub(crate) fn with_intensities(&self, intensities: Vec<f32>) -> Self {
        Self {
            description: self.description.clone(),
            mzs: self.mzs.clone(),
            intensities,
        }
    }

    fn validate(&self, position: usize) -> Result<(), RunError> {
        if self.mzs.len() != self.intensities.len() {
            return Err(RunError::ArrayLengthMismatch {
                index: position,
                mzs: self.mzs.len(),
                intensities: self.intensities.len(),
            });
        }
        if !self.time().is_finite()
            || self.mzs.iter().any(|v| !v.is_finite())
            || self.intensities.iter().any(|v| !v.is_finite())
        {
            return Err(RunError::NonFiniteValue { index: position });
        }
        if self.mzs.windows(2).any(|w| w[0] > w[1]) {
            return Err(RunError::UnsortedMZ { index: position });
        }
        Ok(())
    }
}

/// An ordered sequence of scans in acquisition order.
///
/// Runs are never mutated by the correction pipeline. Correction produces a new,
/// independently owned [`Run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Run {
    scans: Vec<Scan>,
}

impl Run {
    /// Validate and wrap a list of scans
    pub fn new(scans: Vec<Scan>) -> Result<Self, RunError> {
        let mut previous = f64::NEG_INFINITY;
        for (i, scan) in scans.iter().enumerate() {
            scan.validate(i)?;
            let time = scan.time();
            if time < previous {
                return Err(RunError::TimeNotMonotonic {
                    index: i,
                    time,
                    previous,
                });
            }
            previous = time;
        }
        Ok(Self { scans })
    }

    pub fn scans(&self) -> &[Scan] {
        &self.scans
    }

    pub fn into_scans(self) -> Vec<Scan> {
        self.scans
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scan> {
        self.scans.iter()
    }

    /// The retention time of every scan, in order
    pub fn times(&self) -> Vec<f64> {
        self.scans.iter().map(|s| s.time()).collect()
    }

    /// The mean spacing between consecutive retention times, if it is positive
    pub fn sampling_interval(&self) -> Option<f64> {
        sampling_interval(&self.times())
    }

    /// Build a run from scans already known to satisfy the run invariants
    pub(crate) fn from_validated(scans: Vec<Scan>) -> Self {
        Self { scans }
    }
}

impl<'a> IntoIterator for &'a Run {
    type Item = &'a Scan;
    type IntoIter = std::slice::Iter<'a, Scan>;

    fn into_iter(self) -> Self::IntoIter {
        self.scans.iter()
    }
}

/// The mean spacing of a time axis, `(t[n-1] - t[0]) / (n - 1)`, when that is a
/// positive finite number.
pub fn sampling_interval(times: &[f64]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }
    let span = times[times.len() - 1] - times[0];
    let dt = span / (times.len() - 1) as f64;
    if dt.is_finite() && dt > 0.0 {
        Some(dt)
    } else {
        None
    }
}

/// A place runs are loaded from and written to.
///
/// The correction pipeline only ever sees [`Run`] values; reading and writing a
/// concrete container format is the job of an implementation of this trait.
pub trait RunStore {
    type Error: std::error::Error;

    fn load(&mut self, path: &Path) -> Result<Run, Self::Error>;

    fn store(&mut self, run: &Run, path: &Path) -> Result<(), Self::Error>;
}
