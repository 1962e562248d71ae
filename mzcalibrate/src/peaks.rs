//! Tolerance-window peak queries over centroided peak lists.

use mzpeaks::{CentroidPeak, MZPeakSetType, Tolerance};

/// The peak list type every scan in a [`ScanCollection`](crate::scan::ScanCollection) carries
pub type PeakSet = MZPeakSetType<CentroidPeak>;

/// Query operations over an m/z-sorted peak list.
pub trait PeakLookup {
    /// The number of peaks with `low <= mz <= high`
    fn count_in_range(&self, low: f64, high: f64) -> usize;

    /// The peak nearest to `mz`, if there are any peaks at all
    fn closest_peak(&self, mz: f64) -> Option<&CentroidPeak>;

    /// The number of peaks within `tolerance` of `mz`, inclusive of the window edges
    fn count_within(&self, mz: f64, tolerance: &Tolerance) -> usize {
        let (low, high) = tolerance.bounds(mz);
        self.count_in_range(low, high)
    }

    /// The closest peak to `mz` if it also lies within `tolerance`
    fn closest_within(&self, mz: f64, tolerance: &Tolerance) -> Option<&CentroidPeak> {
        self.closest_peak(mz)
            .filter(|p| tolerance.test(p.mz, mz))
    }
}

impl PeakLookup for [CentroidPeak] {
    fn count_in_range(&self, low: f64, high: f64) -> usize {
        if high < low {
            return 0;
        }
        let start = self.partition_point(|p| p.mz < low);
        let end = self.partition_point(|p| p.mz <= high);
        end.saturating_sub(start)
    }

    fn closest_peak(&self, mz: f64) -> Option<&CentroidPeak> {
        if self.is_empty() {
            return None;
        }
        let i = self.partition_point(|p| p.mz < mz);
        let after = self.get(i);
        let before = i.checked_sub(1).and_then(|j| self.get(j));
        match (before, after) {
            (Some(b), Some(a)) => {
                if (mz - b.mz).abs() <= (a.mz - mz).abs() {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

impl PeakLookup for PeakSet {
    fn count_in_range(&self, low: f64, high: f64) -> usize {
        self.as_slice().count_in_range(low, high)
    }

    fn closest_peak(&self, mz: f64) -> Option<&CentroidPeak> {
        self.as_slice().closest_peak(mz)
    }
}
