use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Counters describing what a correction pass did. Failures that were absorbed
/// along the way only show up here and in the log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionProgress {
    pub runs: usize,
    pub reference_failures: usize,
    pub channels_corrected: usize,
    pub channels_dropped: usize,
    pub candidates_evaluated: usize,
    pub candidates_failed: usize,
    pub candidates_accepted: usize,
    pub intensities_replaced: usize,
    pub intensities_zeroed: usize,
}

impl Add for CorrectionProgress {
    type Output = CorrectionProgress;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for CorrectionProgress {
    fn add_assign(&mut self, rhs: Self) {
        self.runs += rhs.runs;
        self.reference_failures += rhs.reference_failures;
        self.channels_corrected += rhs.channels_corrected;
        self.channels_dropped += rhs.channels_dropped;
        self.candidates_evaluated += rhs.candidates_evaluated;
        self.candidates_failed += rhs.candidates_failed;
        self.candidates_accepted += rhs.candidates_accepted;
        self.intensities_replaced += rhs.intensities_replaced;
        self.intensities_zeroed += rhs.intensities_zeroed;
    }
}

impl Sum for CorrectionProgress {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, x| acc + x)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sum() {
        let a = CorrectionProgress {
            runs: 1,
            channels_corrected: 3,
            intensities_replaced: 10,
            ..Default::default()
        };
        let b = CorrectionProgress {
            runs: 1,
            reference_failures: 1,
            ..Default::default()
        };
        let total: CorrectionProgress = [a, b].into_iter().sum();
        assert_eq!(total.runs, 2);
        assert_eq!(total.reference_failures, 1);
        assert_eq!(total.channels_corrected, 3);
        assert_eq!(total, a + b);
    }
}
