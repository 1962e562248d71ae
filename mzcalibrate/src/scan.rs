//! An in-memory, randomly addressable collection of centroided scans.
use std::collections::HashMap;

use mzpeaks::CentroidPeak;

use crate::peaks::PeakSet;

/// A single scan and the acquisition context calibration features are computed from
#[derive(Debug, Clone, Default)]
pub struct CalibrationScan {
    /// One-based position of the scan in its run
    pub index: usize,
    pub native_id: String,
    pub ms_level: u8,
    /// Retention time in minutes
    pub retention_time: f64,
    /// Defaults to the sum of the peak intensities when the source records none
    pub total_ion_current: f64,
    /// Ion injection time in milliseconds, when the instrument reports one
    pub injection_time: Option<f64>,
    pub isolation_mz: Option<f64>,
    pub selected_ion_mz: Option<f64>,
    pub selected_ion_intensity: Option<f64>,
    /// One-based index of the scan this scan's precursor was selected from
    pub precursor_scan_index: Option<usize>,
    /// The `(low, high)` m/z range the scan acquired
    pub scan_window: (f64, f64),
    pub peaks: PeakSet,
}

impl CalibrationScan {
    pub fn new(index: usize, ms_level: u8, retention_time: f64, peaks: Vec<CentroidPeak>) -> Self {
        let peaks = PeakSet::new(peaks);
        let total_ion_current = peaks.iter().map(|p| p.intensity as f64).sum();
        let scan_window = observed_range(&peaks);
        Self {
            index,
            native_id: format!("scan={index}"),
            ms_level,
            retention_time,
            total_ion_current,
            scan_window,
            peaks,
            ..Default::default()
        }
    }

    pub fn is_ms1(&self) -> bool {
        self.ms_level <= 1
    }

    /// Rewrite every peak's m/z through `f`, then restore m/z ordering
    pub fn update_mzs<F: FnMut(&CentroidPeak) -> f64>(&mut self, mut f: F) {
        let mut peaks = std::mem::take(&mut self.peaks).into_inner();
        for p in peaks.iter_mut() {
            p.mz = f(p);
        }
        self.peaks = PeakSet::new(peaks);
    }
}

fn observed_range(peaks: &PeakSet) -> (f64, f64) {
    match (peaks.first(), peaks.last()) {
        (Some(a), Some(b)) => (a.mz, b.mz),
        _ => (0.0, 0.0),
    }
}

/// A run's scans, addressed by one-based index
#[derive(Debug, Clone, Default)]
pub struct ScanCollection {
    scans: Vec<CalibrationScan>,
    id_index: HashMap<String, usize>,
}

impl ScanCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scan, assigning it the next one-based index
    pub fn push(&mut self, mut scan: CalibrationScan) -> usize {
        let index = self.scans.len() + 1;
        scan.index = index;
        self.id_index.insert(scan.native_id.clone(), index);
        self.scans.push(scan);
        index
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CalibrationScan> {
        index.checked_sub(1).and_then(|i| self.scans.get(i))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut CalibrationScan> {
        index.checked_sub(1).and_then(|i| self.scans.get_mut(i))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CalibrationScan> {
        self.scans.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, CalibrationScan> {
        self.scans.iter_mut()
    }

    pub fn as_mut_slice(&mut self) -> &mut [CalibrationScan] {
        &mut self.scans
    }

    pub fn index_of_native_id(&self, native_id: &str) -> Option<usize> {
        self.id_index.get(native_id).copied()
    }
}

impl FromIterator<CalibrationScan> for ScanCollection {
    fn from_iter<T: IntoIterator<Item = CalibrationScan>>(iter: T) -> Self {
        let mut this = Self::new();
        for scan in iter {
            this.push(scan);
        }
        this
    }
}
