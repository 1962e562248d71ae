//! Labeled training points and the per-round extraction tallies that carry them.
use std::ops::{Add, AddAssign};

/// Positions of the features in [`LabeledDataPoint::inputs`]
pub mod feature {
    pub const MZ: usize = 0;
    pub const RETENTION_TIME: usize = 1;
    pub const LOG_INTENSITY: usize = 2;
    pub const LOG_TIC: usize = 3;
    pub const LOG_INJECTION_TIME: usize = 4;
    /// Only present for MS2 points
    pub const ISOLATION_MZ: usize = 5;

    pub const MS1_LEN: usize = 5;
    pub const MS2_LEN: usize = 6;
}

/// Build the calibration feature vector for a peak.
///
/// `isolation_mz` is `Some` for fragment peaks, adding the sixth feature, even if the value
/// itself is unknown (NaN). Missing injection times become NaN.
pub fn feature_vector(
    mz: f64,
    retention_time: f64,
    intensity: f64,
    total_ion_current: f64,
    injection_time: Option<f64>,
    isolation_mz: Option<f64>,
) -> Vec<f64> {
    let mut inputs = Vec::with_capacity(feature::MS2_LEN);
    inputs.push(mz);
    inputs.push(retention_time);
    inputs.push(intensity.ln());
    inputs.push(total_ion_current.ln());
    inputs.push(injection_time.map(f64::ln).unwrap_or(f64::NAN));
    if let Some(isolation_mz) = isolation_mz {
        inputs.push(isolation_mz);
    }
    inputs
}

/// A matched theoretical/observed peak cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataPoint {
    pub inputs: Vec<f64>,
    /// Observed minus theoretical m/z
    pub label: f64,
    /// The mean theoretical m/z of the matched cluster
    pub expected_mz: f64,
    /// Index of the identification the point was derived from
    pub identification: usize,
}

impl LabeledDataPoint {
    pub fn new(inputs: Vec<f64>, label: f64, expected_mz: f64, identification: usize) -> Self {
        Self {
            inputs,
            label,
            expected_mz,
            identification,
        }
    }

    /// The observed m/z, NaN if the feature vector is too short to hold one
    pub fn mz(&self) -> f64 {
        self.inputs.get(feature::MZ).copied().unwrap_or(f64::NAN)
    }

    pub fn retention_time(&self) -> f64 {
        self.inputs
            .get(feature::RETENTION_TIME)
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// The label expressed in parts-per-million of the theoretical m/z
    pub fn ppm_error(&self) -> f64 {
        self.label / self.expected_mz * 1e6
    }
}

/// Summary statistics of point mass errors, in ppm
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MassErrorSummary {
    pub count: usize,
    pub mean_ppm: f64,
    pub std_dev_ppm: f64,
}

impl MassErrorSummary {
    pub fn from_points(points: &[LabeledDataPoint]) -> Self {
        let n = points.len();
        if n == 0 {
            return Self::default();
        }
        let mean = points.iter().map(|p| p.ppm_error()).sum::<f64>() / n as f64;
        let var = if n > 1 {
            points
                .iter()
                .map(|p| (p.ppm_error() - mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64
        } else {
            0.0
        };
        Self {
            count: n,
            mean_ppm: mean,
            std_dev_ppm: var.sqrt(),
        }
    }
}

/// The training points and counters produced by one extraction round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPointAcquisitionResults {
    pub ms1: Vec<LabeledDataPoint>,
    pub ms2: Vec<LabeledDataPoint>,
    /// Mass/charge combinations examined during the MS1 search
    pub ms1_considered: usize,
    /// Isotope lookups skipped in the MS1 search for matching more than one peak
    pub ms1_ambiguous: usize,
    pub ms2_considered: usize,
    pub ms2_ambiguous: usize,
    pub identifications_used: usize,
    pub identifications_skipped: usize,
}

impl DataPointAcquisitionResults {
    pub fn count(&self) -> usize {
        self.ms1.len() + self.ms2.len()
    }

    pub fn ms1_errors(&self) -> MassErrorSummary {
        MassErrorSummary::from_points(&self.ms1)
    }

    pub fn ms2_errors(&self) -> MassErrorSummary {
        MassErrorSummary::from_points(&self.ms2)
    }
}

impl Add for DataPointAcquisitionResults {
    type Output = DataPointAcquisitionResults;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for DataPointAcquisitionResults {
    fn add_assign(&mut self, rhs: Self) {
        self.ms1.extend(rhs.ms1);
        self.ms2.extend(rhs.ms2);
        self.ms1_considered += rhs.ms1_considered;
        self.ms1_ambiguous += rhs.ms1_ambiguous;
        self.ms2_considered += rhs.ms2_considered;
        self.ms2_ambiguous += rhs.ms2_ambiguous;
        self.identifications_used += rhs.identifications_used;
        self.identifications_skipped += rhs.identifications_skipped;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_feature_vector_layout() {
        let ms1 = feature_vector(500.0, 10.0, 1000.0, 1e6, Some(20.0), None);
        assert_eq!(ms1.len(), feature::MS1_LEN);
        assert!((ms1[feature::LOG_INTENSITY] - 1000f64.ln()).abs() < 1e-12);
        assert!((ms1[feature::LOG_INJECTION_TIME] - 20f64.ln()).abs() < 1e-12);

        let ms2 = feature_vector(500.0, 10.0, 1000.0, 1e6, None, Some(650.0));
        assert_eq!(ms2.len(), feature::MS2_LEN);
        assert!(ms2[feature::LOG_INJECTION_TIME].is_nan());
        assert_eq!(ms2[feature::ISOLATION_MZ], 650.0);
    }

    #[test]
    fn test_short_feature_vector() {
        let point = LabeledDataPoint::new(vec![500.0], 0.001, 499.999, 0);
        assert_eq!(point.mz(), 500.0);
        assert!(point.retention_time().is_nan());
        let empty = LabeledDataPoint::new(Vec::new(), 0.001, 499.999, 0);
        assert!(empty.mz().is_nan());
        assert!(empty.retention_time().is_nan());
    }

    #[test]
    fn test_accumulate() {
        let mut acc = DataPointAcquisitionResults::default();
        let part = DataPointAcquisitionResults {
            ms2: vec![LabeledDataPoint::new(vec![500.0], 0.001, 499.999, 0)],
            ms2_considered: 4,
            ms2_ambiguous: 1,
            identifications_used: 1,
            ..Default::default()
        };
        acc += part.clone();
        acc += part;
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.ms2_considered, 8);
        assert_eq!(acc.ms2_ambiguous, 2);
        assert_eq!(acc.identifications_used, 2);
    }

    #[test]
    fn test_error_summary() {
        let points = vec![
            LabeledDataPoint::new(vec![1000.0], 0.001, 1000.0, 0),
            LabeledDataPoint::new(vec![1000.0], 0.003, 1000.0, 0),
        ];
        let summary = MassErrorSummary::from_points(&points);
        assert_eq!(summary.count, 2);
        assert!((summary.mean_ppm - 2.0).abs() < 1e-9);
        assert!((summary.std_dev_ppm - 2f64.sqrt()).abs() < 1e-9);
        assert_eq!(MassErrorSummary::from_points(&[]), MassErrorSummary::default());
    }
}
