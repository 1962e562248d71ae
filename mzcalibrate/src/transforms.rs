//! The fixed catalog of feature projections searched by the linear calibration functions.
use std::fmt::Display;

use crate::data_points::feature::{LOG_INJECTION_TIME, LOG_TIC, MZ, RETENTION_TIME};

/// Selects a subset of a [`LabeledDataPoint`](crate::data_points::LabeledDataPoint)'s inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureTransform {
    pub name: &'static str,
    pub indices: &'static [usize],
}

impl FeatureTransform {
    pub const fn new(name: &'static str, indices: &'static [usize]) -> Self {
        Self { name, indices }
    }

    /// The length of the vector [`FeatureTransform::apply`] produces
    pub const fn arity(&self) -> usize {
        self.indices.len()
    }

    pub fn apply(&self, inputs: &[f64]) -> Vec<f64> {
        self.indices
            .iter()
            .map(|i| inputs.get(*i).copied().unwrap_or(f64::NAN))
            .collect()
    }

    /// Find a transform in [`TRANSFORMS`] by name
    pub fn find(name: &str) -> Option<&'static FeatureTransform> {
        TRANSFORMS.iter().find(|t| t.name == name)
    }
}

impl Display for FeatureTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Every non-empty combination of m/z, retention time, log TIC and log injection time.
///
/// Log intensity is never used by the linear models.
pub static TRANSFORMS: [FeatureTransform; 15] = [
    FeatureTransform::new("mz", &[MZ]),
    FeatureTransform::new("rt", &[RETENTION_TIME]),
    FeatureTransform::new("tic", &[LOG_TIC]),
    FeatureTransform::new("injection_time", &[LOG_INJECTION_TIME]),
    FeatureTransform::new("mz+rt", &[MZ, RETENTION_TIME]),
    FeatureTransform::new("mz+tic", &[MZ, LOG_TIC]),
    FeatureTransform::new("mz+injection_time", &[MZ, LOG_INJECTION_TIME]),
    FeatureTransform::new("rt+tic", &[RETENTION_TIME, LOG_TIC]),
    FeatureTransform::new("rt+injection_time", &[RETENTION_TIME, LOG_INJECTION_TIME]),
    FeatureTransform::new("tic+injection_time", &[LOG_TIC, LOG_INJECTION_TIME]),
    FeatureTransform::new("mz+rt+tic", &[MZ, RETENTION_TIME, LOG_TIC]),
    FeatureTransform::new("mz+rt+injection_time", &[MZ, RETENTION_TIME, LOG_INJECTION_TIME]),
    FeatureTransform::new("mz+tic+injection_time", &[MZ, LOG_TIC, LOG_INJECTION_TIME]),
    FeatureTransform::new("rt+tic+injection_time", &[RETENTION_TIME, LOG_TIC, LOG_INJECTION_TIME]),
    FeatureTransform::new(
        "mz+rt+tic+injection_time",
        &[MZ, RETENTION_TIME, LOG_TIC, LOG_INJECTION_TIME],
    ),
];

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::data_points::feature;

    #[test]
    fn test_catalog_is_every_subset() {
        let subsets: HashSet<Vec<usize>> = TRANSFORMS
            .iter()
            .map(|t| {
                let mut v = t.indices.to_vec();
                v.sort();
                v
            })
            .collect();
        assert_eq!(subsets.len(), 15);
        for t in TRANSFORMS.iter() {
            assert!(!t.indices.contains(&feature::LOG_INTENSITY));
            assert!(!t.indices.contains(&feature::ISOLATION_MZ));
        }
    }

    #[test]
    fn test_arity() {
        let inputs = [500.0, 12.0, 5.0, 14.0, 3.0, 650.0];
        for t in TRANSFORMS.iter() {
            assert_eq!(t.apply(&inputs).len(), t.arity());
            assert_eq!(t.apply(&inputs[..feature::MS1_LEN]).len(), t.arity());
        }
        let t = FeatureTransform::find("rt+tic").unwrap();
        assert_eq!(t.apply(&inputs), vec![12.0, 14.0]);
    }
}
