//! Write corrected channel residuals back into the peaks of a run.
use mzpeaks::Tolerance;
use rayon::prelude::*;
use tracing::debug;

use crate::correction::ChannelCorrection;
use crate::run::{Run, Scan};
use crate::targets::within_tolerance;

/// The default fraction of the largest residual magnitude below which a corrected
/// intensity is treated as pure artifact
pub const DEFAULT_INTENSITY_THRESHOLD: f64 = 0.0012;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ReconstructionSummary {
    /// The absolute residual magnitude a corrected intensity had to reach
    pub threshold: f64,
    /// Peaks whose intensity was replaced with a residual
    pub replaced: usize,
    /// Peaks matched to a channel whose residual fell below the threshold
    pub zeroed: usize,
}

impl ReconstructionSummary {
    /// Whether no peak was touched. Zeroed peaks change the output as well, so a pass
    /// with `replaced == 0` is only an identity when nothing was zeroed either.
    pub fn is_identity(&self) -> bool {
        self.replaced + self.zeroed == 0
    }
}

/// Find the channel closest to `mz` among those within tolerance, preferring the
/// lower m/z on ties. `channels` must be sorted by m/z.
fn closest_channel(channels: &[&ChannelCorrection], mz: f64, tolerance: Tolerance) -> Option<usize> {
    let split = channels.partition_point(|c| c.mz < mz);
    let below = (0..split)
        .rev()
        .take_while(|i| within_tolerance(mz, channels[*i].mz, tolerance))
        .next();
    let above = (split..channels.len())
        .take_while(|i| within_tolerance(mz, channels[*i].mz, tolerance))
        .next();
    match (below, above) {
        (Some(lo), Some(hi)) => {
            if (channels[hi].mz - mz).abs() < (mz - channels[lo].mz).abs() {
                Some(hi)
            } else {
                Some(lo)
            }
        }
        (lo, hi) => lo.or(hi),
    }
}

fn reconstruct_scan(
    position: usize,
    scan: &Scan,
    channels: &[&ChannelCorrection],
    tolerance: Tolerance,
    threshold: f64,
) -> (Scan, usize, usize) {
    let mut replaced = 0;
    let mut zeroed = 0;
    let intensities = scan
        .iter()
        .map(|(mz, intensity)| match closest_channel(channels, mz, tolerance) {
            Some(i) => {
                let residual = channels[i].residual[position];
                if residual.abs() >= threshold {
                    replaced += 1;
                    residual as f32
                } else {
                    zeroed += 1;
                    0.0
                }
            }
            None => intensity,
        })
        .collect();
    (scan.with_intensities(intensities), replaced, zeroed)
}

/// Build a corrected copy of `run`.
///
/// Every peak within tolerance of a corrected channel takes that channel's residual
/// for its scan when `|residual| >= relative_threshold * max |residual|` over all
/// channels, and is set to zero otherwise. Other peaks and all scan metadata are
/// copied unchanged. With no channels the copy equals the input.
///
/// Every channel's residual must have one value per scan of `run`.
#[tracing::instrument(level = "debug", skip_all)]
pub fn reconstruct_run(
    run: &Run,
    channels: &[ChannelCorrection],
    tolerance: Tolerance,
    relative_threshold: f64,
) -> (Run, ReconstructionSummary) {
    let mut usable: Vec<&ChannelCorrection> = channels
        .iter()
        .filter(|c| c.residual.len() == run.len())
        .collect();
    if usable.len() != channels.len() {
        debug!(
            "Ignoring {} channels whose length does not match the run",
            channels.len() - usable.len()
        );
    }
    if usable.is_empty() {
        return (run.clone(), ReconstructionSummary::default());
    }
    usable.sort_by(|a, b| a.mz.total_cmp(&b.mz));

    let max_residual = usable
        .iter()
        .map(|c| c.max_abs_residual())
        .fold(0.0, f64::max);
    let threshold = relative_threshold * max_residual;

    let results: Vec<(Scan, usize, usize)> = run
        .scans()
        .par_iter()
        .enumerate()
        .map(|(position, scan)| reconstruct_scan(position, scan, &usable, tolerance, threshold))
        .collect();

    let mut summary = ReconstructionSummary {
        threshold,
        ..Default::default()
    };
    let scans = results
        .into_iter()
        .map(|(scan, replaced, zeroed)| {
            summary.replaced += replaced;
            summary.zeroed += zeroed;
            scan
        })
        .collect();
    debug!(
        "Replaced {} intensities and zeroed {} with threshold {threshold:0.4}",
        summary.replaced, summary.zeroed
    );
    (Run::from_validated(scans), summary)
}

#[cfg(test)]
mod test {
    use super::*;

    fn channel(mz: f64, residual: Vec<f64>) -> ChannelCorrection {
        ChannelCorrection {
            mz,
            amplitude: 0.0,
            trace: residual.clone(),
            model: vec![0.0; residual.len()],
            residual,
        }
    }

    fn make_run() -> Run {
        Run::new(vec![
            Scan::new(0, 0.0, vec![100.0, 150.0, 200.02], vec![10.0, 20.0, 30.0]),
            Scan::new(1, 1.0, vec![100.05, 150.0], vec![11.0, 21.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_threshold_boundary() {
        let run = make_run();
        // max |residual| is 100, so a relative threshold of 0.5 is 50 exactly
        let channels = vec![channel(100.0, vec![50.0, 49.999]), channel(200.0, vec![-100.0, 0.0])];
        let (corrected, summary) = reconstruct_run(&run, &channels, Tolerance::Da(0.1), 0.5);
        assert_eq!(summary.threshold, 50.0);
        assert_eq!(corrected.scans()[0].intensities, vec![50.0, 20.0, -100.0]);
        assert_eq!(corrected.scans()[1].intensities, vec![0.0, 21.0]);
        assert_eq!(summary.replaced, 2);
        assert_eq!(summary.zeroed, 1);
        assert_eq!(corrected.scans()[1].mzs, run.scans()[1].mzs);
        assert_eq!(corrected.scans()[1].description, run.scans()[1].description);
    }

    #[test]
    fn test_closest_channel_wins() {
        let a = channel(100.0, vec![1.0, 1.0]);
        let b = channel(100.25, vec![2.0, 2.0]);
        let channels = vec![&a, &b];
        let tol = Tolerance::Da(0.25);
        assert_eq!(closest_channel(&channels, 100.0625, tol), Some(0));
        assert_eq!(closest_channel(&channels, 100.1875, tol), Some(1));
        assert_eq!(closest_channel(&channels, 100.125, tol), Some(0));
        assert_eq!(closest_channel(&channels, 100.75, tol), None);
        assert_eq!(closest_channel(&channels, 99.75, tol), Some(0));
    }

    #[test]
    fn test_no_channels_is_identity() {
        let run = make_run();
        let (corrected, summary) = reconstruct_run(&run, &[], Tolerance::Da(0.1), 0.0012);
        assert_eq!(corrected, run);
        assert_eq!(summary, ReconstructionSummary::default());
        assert!(summary.is_identity());

        // A channel with no matching peaks touches nothing
        let channels = vec![channel(500.0, vec![3.0, -4.0])];
        let (corrected, summary) = reconstruct_run(&run, &channels, Tolerance::Da(0.1), 0.0012);
        assert_eq!(summary.threshold, 4.0 * 0.0012);
        assert!(summary.is_identity());
        assert_eq!(corrected, run);
    }

    #[test]
    fn test_zeroed_without_replacement_changes_output() {
        let run = make_run();
        // The largest residual sits in a scan where the 200 channel has no peak
        let channels = vec![channel(100.0, vec![1.0, 2.0]), channel(200.0, vec![5.0, 100.0])];
        let (corrected, summary) = reconstruct_run(&run, &channels, Tolerance::Da(0.1), 0.5);
        assert_eq!(summary.threshold, 50.0);
        assert_eq!(summary.replaced, 0);
        assert_eq!(summary.zeroed, 3);
        assert!(!summary.is_identity());
        assert_ne!(corrected, run);
        assert_eq!(corrected.scans()[0].intensities, vec![0.0, 20.0, 0.0]);
        assert_eq!(corrected.scans()[1].intensities, vec![0.0, 21.0]);
    }
}
