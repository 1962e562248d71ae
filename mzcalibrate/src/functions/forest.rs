//! Bagged regression trees over a masked subset of the calibration features.
use std::fmt::Display;
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use tracing::debug;

use crate::data_points::{feature, LabeledDataPoint};

use super::FitError;

pub const FEATURE_NAMES: [&str; feature::MS2_LEN] = [
    "mz",
    "rt",
    "intensity",
    "tic",
    "injection_time",
    "isolation_mz",
];

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Hyperparameters for a [`RandomForestCalibration`]
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
    /// Which of the input features the trees may split on
    pub mask: Vec<bool>,
}

impl ForestParams {
    pub fn new(mask: Vec<bool>) -> Self {
        Self {
            n_trees: 40,
            max_depth: 10,
            min_samples_leaf: 1,
            mask,
        }
    }

    /// The forest configurations tried for MS1 points
    pub fn ms1_configurations() -> Vec<Self> {
        vec![
            Self::new(vec![true, true, false, false, false]),
            Self::new(vec![true; feature::MS1_LEN]),
        ]
    }

    /// The forest configurations tried for MS2 points
    pub fn ms2_configurations() -> Vec<Self> {
        vec![
            Self::new(vec![true, true, false, false, false, false]),
            Self::new(vec![true, true, true, true, false, true]),
            Self::new(vec![true; feature::MS2_LEN]),
        ]
    }

    fn selected(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then_some(i))
            .collect()
    }

    fn describe(&self) -> String {
        self.selected()
            .into_iter()
            .map(|i| FEATURE_NAMES.get(i).copied().unwrap_or("?"))
            .collect::<Vec<_>>()
            .join("+")
    }

    fn regressor_parameters(&self, n_features: usize, seed: u64) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters::default()
            .with_n_trees(self.n_trees)
            .with_max_depth(self.max_depth)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_m(n_features)
            .with_seed(seed)
    }
}

/// A [`RandomForestRegressor`] whose mean prediction is the calibration correction
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestCalibration {
    pub params: ForestParams,
    features: Vec<usize>,
    forest: Arc<Forest>,
}

impl RandomForestCalibration {
    /// Select the masked features. Missing values become a constant so the trees never split on them.
    fn project(features: &[usize], inputs: &[f64]) -> Vec<f64> {
        features
            .iter()
            .map(|i| {
                inputs
                    .get(*i)
                    .copied()
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0)
            })
            .collect()
    }

    fn design_matrix<'a>(
        features: &[usize],
        rows: impl Iterator<Item = &'a [f64]>,
    ) -> Option<DenseMatrix<f64>> {
        let mut values = Vec::new();
        let mut n_rows = 0;
        for row in rows {
            values.extend(Self::project(features, row));
            n_rows += 1;
        }
        DenseMatrix::new(n_rows, features.len(), values, false).ok()
    }

    /// Train the forest. The bootstrap seed is the next value drawn from `rng`.
    pub fn fit(
        params: ForestParams,
        points: &[LabeledDataPoint],
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, FitError> {
        if points.is_empty() {
            return Err(FitError::Empty);
        }
        if points.iter().any(|p| !p.label.is_finite()) {
            return Err(FitError::NonFinite);
        }
        let features = params.selected();
        if features.is_empty() {
            return Err(FitError::Empty);
        }
        let x = Self::design_matrix(&features, points.iter().map(|p| p.inputs.as_slice()))
            .ok_or(FitError::NonFinite)?;
        let y: Vec<f64> = points.iter().map(|p| p.label).collect();

        let seed: u64 = rng.gen();
        let forest = Forest::fit(&x, &y, params.regressor_parameters(features.len(), seed))
            .map_err(|e| {
                debug!("Failed to fit {}: {e}", params.describe());
                FitError::NonFinite
            })?;

        Ok(Self {
            params,
            features,
            forest: Arc::new(forest),
        })
    }

    /// Predict the correction for every row in `rows`, NaN when the forest cannot evaluate them
    pub fn predict_many(&self, rows: &[&[f64]]) -> Vec<f64> {
        if rows.is_empty() {
            return Vec::new();
        }
        Self::design_matrix(&self.features, rows.iter().copied())
            .and_then(|x| self.forest.predict(&x).ok())
            .unwrap_or_else(|| vec![f64::NAN; rows.len()])
    }

    pub fn predict(&self, inputs: &[f64]) -> f64 {
        self.predict_many(&[inputs])
            .first()
            .copied()
            .unwrap_or(f64::NAN)
    }
}

impl Display for RandomForestCalibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RandomForest({}, trees={}, depth={})",
            self.params.describe(),
            self.params.n_trees,
            self.params.max_depth
        )
    }
}
