//! Extracted ion chromatogram (trace) construction.
use mzpeaks::Tolerance;

use crate::run::{Run, Scan};

/// A scalar intensity series with one value per scan of a run
pub type Trace = Vec<f64>;

/// Sum the intensity of every peak of `scan` inside the inclusive tolerance window
/// around `target`, or 0 when none match.
///
/// All peaks in the window contribute, not only the nearest one.
pub fn scan_intensity_at(scan: &Scan, target: f64, tolerance: Tolerance) -> f64 {
    let (lower, upper) = tolerance.bounds(target);
    let start = scan.mzs.partition_point(|mz| *mz < lower);
    scan.mzs[start..]
        .iter()
        .zip(scan.intensities[start..].iter())
        .take_while(|(mz, _)| **mz <= upper)
        .map(|(_, inten)| *inten as f64)
        .sum()
}

/// Build the trace of `target` across every scan of `run`.
pub fn extract_trace(run: &Run, target: f64, tolerance: Tolerance) -> Trace {
    run.iter()
        .map(|scan| scan_intensity_at(scan, target, tolerance))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_run() -> Run {
        Run::new(vec![
            Scan::new(0, 0.0, vec![99.5, 100.0, 100.25, 150.0], vec![1.0, 2.0, 4.0, 8.0]),
            Scan::new(1, 1.0, vec![150.0], vec![3.0]),
            Scan::new(2, 2.0, vec![], vec![]),
            Scan::new(3, 3.0, vec![99.75, 100.5], vec![5.0, 7.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_extract_sums_all_matches() {
        let run = make_run();
        let trace = extract_trace(&run, 100.0, Tolerance::Da(0.25));
        assert_eq!(trace, vec![6.0, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn test_extract_shape() {
        let run = make_run();
        for target in [50.0, 99.5, 100.0, 150.0, 1000.0] {
            let trace = extract_trace(&run, target, Tolerance::Da(0.1));
            assert_eq!(trace.len(), run.len());
            assert!(trace.iter().all(|v| !v.is_nan() && *v >= 0.0));
        }
        let trace = extract_trace(&run, 150.0, Tolerance::PPM(10.0));
        assert_eq!(trace, vec![8.0, 3.0, 0.0, 0.0]);
    }
}
