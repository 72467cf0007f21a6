//! The set of mass channels selected for correction.
use mzpeaks::Tolerance;

/// Check whether `query` falls inside the inclusive tolerance window around `reference`
#[inline]
pub fn within_tolerance(query: f64, reference: f64, tolerance: Tolerance) -> bool {
    let (lower, upper) = tolerance.bounds(reference);
    query >= lower && query <= upper
}

/// The mass channels to correct, seeded by the caller and grown by detection.
///
/// Membership is decided by tolerance rather than exact equality: inserting a mass
/// that lies within tolerance of an existing member is a no-op. Members keep their
/// insertion order, so seeds always come before detected channels.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetChannelSet {
    tolerance: Tolerance,
    masses: Vec<f64>,
}

impl TargetChannelSet {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            masses: Vec::new(),
        }
    }

    /// Build a set from `masses`, skipping any that duplicate an earlier entry
    pub fn from_masses<I: IntoIterator<Item = f64>>(masses: I, tolerance: Tolerance) -> Self {
        let mut this = Self::new(tolerance);
        this.extend(masses);
        this
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    pub fn contains(&self, mz: f64) -> bool {
        self.masses
            .iter()
            .any(|m| within_tolerance(mz, *m, self.tolerance))
    }

    /// Add `mz` unless an existing member already covers it. Returns whether the
    /// set grew.
    pub fn insert(&mut self, mz: f64) -> bool {
        if !mz.is_finite() || self.contains(mz) {
            false
        } else {
            self.masses.push(mz);
            true
        }
    }

    /// Insert each mass in order, returning how many were added
    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, masses: I) -> usize {
        masses.into_iter().filter(|mz| self.insert(*mz)).count()
    }

    /// The member nearest to `mz` among those within tolerance of it
    pub fn closest(&self, mz: f64) -> Option<f64> {
        self.masses
            .iter()
            .copied()
            .filter(|m| within_tolerance(mz, *m, self.tolerance))
            .min_by(|a, b| (a - mz).abs().total_cmp(&(b - mz).abs()))
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.masses.iter().copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.masses
    }

    /// The members in ascending m/z order
    pub fn sorted(&self) -> Vec<f64> {
        let mut masses = self.masses.clone();
        masses.sort_by(|a, b| a.total_cmp(b));
        masses
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_membership_by_tolerance() {
        let mut targets = TargetChannelSet::new(Tolerance::Da(0.25));
        assert!(targets.insert(100.0));
        assert!(!targets.insert(100.25));
        assert!(targets.contains(99.75));
        assert!(!targets.contains(100.5));
        assert!(targets.insert(100.5));
        assert_eq!(targets.as_slice(), &[100.0, 100.5]);
        assert_eq!(targets.closest(100.3), Some(100.5));
        assert_eq!(targets.closest(100.125), Some(100.0));
        assert_eq!(targets.closest(101.0), None);
    }

    #[test]
    fn test_extend_preserves_order() {
        let mut targets =
            TargetChannelSet::from_masses([922.098, 60.07, 60.1, 110.1173], Tolerance::Da(0.1));
        assert_eq!(targets.as_slice(), &[922.098, 60.07, 110.1173]);
        let added = targets.extend([55.0, 922.05, 65.1]);
        assert_eq!(added, 2);
        assert_eq!(targets.sorted(), vec![55.0, 60.07, 65.1, 110.1173, 922.098]);
        assert!(!targets.insert(f64::NAN));
    }
}
