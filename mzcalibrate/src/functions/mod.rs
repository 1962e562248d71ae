/*! Calibration functions map a peak's features to its predicted m/z error.

A [`CalibrationCandidate`] describes a model that has not yet seen data. Training it on a set of
[`LabeledDataPoint`]s produces a [`CalibrationFunction`], whose prediction is subtracted from the
observed m/z.
*/
use std::fmt::Display;

use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::data_points::LabeledDataPoint;
use crate::transforms::{FeatureTransform, TRANSFORMS};

mod forest;
mod linear;

pub use forest::{ForestParams, RandomForestCalibration, FEATURE_NAMES};
pub use linear::LinearCalibration;

/// Why a candidate could not be trained. Selection treats any of these as "not promoted".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("No training points were provided")]
    Empty,
    #[error("Needed at least {needed} training points, found {found}")]
    InsufficientPoints { needed: usize, found: usize },
    #[error("The design matrix is singular")]
    Singular,
    #[error("The training data or the fitted model contain non-finite values")]
    NonFinite,
    #[error("Training was cancelled")]
    Cancelled,
}

/// An untrained calibration model
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationCandidate {
    Constant,
    Linear(&'static FeatureTransform),
    RandomForest(ForestParams),
}

impl CalibrationCandidate {
    /// The constant offset followed by a linear model for each entry in [`TRANSFORMS`]
    pub fn linear_round() -> Vec<Self> {
        let mut candidates = Vec::with_capacity(TRANSFORMS.len() + 1);
        candidates.push(Self::Constant);
        candidates.extend(TRANSFORMS.iter().map(Self::Linear));
        candidates
    }

    pub fn ms1_forest_round() -> Vec<Self> {
        ForestParams::ms1_configurations()
            .into_iter()
            .map(Self::RandomForest)
            .collect()
    }

    pub fn ms2_forest_round() -> Vec<Self> {
        ForestParams::ms2_configurations()
            .into_iter()
            .map(Self::RandomForest)
            .collect()
    }

    pub fn train(
        &self,
        points: &[LabeledDataPoint],
        rng: &mut ChaCha8Rng,
    ) -> Result<CalibrationFunction, FitError> {
        match self {
            Self::Constant => {
                if points.is_empty() {
                    return Err(FitError::Empty);
                }
                let offset = points.iter().map(|p| p.label).sum::<f64>() / points.len() as f64;
                if !offset.is_finite() {
                    return Err(FitError::NonFinite);
                }
                Ok(CalibrationFunction::Constant(offset))
            }
            Self::Linear(transform) => {
                LinearCalibration::fit(*transform, points).map(CalibrationFunction::Linear)
            }
            Self::RandomForest(params) => {
                RandomForestCalibration::fit(params.clone(), points, rng)
                    .map(CalibrationFunction::RandomForest)
            }
        }
    }
}

impl Display for CalibrationCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant => f.write_str("Constant"),
            Self::Linear(t) => write!(f, "Linear({t})"),
            Self::RandomForest(p) => write!(f, "RandomForest({:?})", p.mask),
        }
    }
}

/// A trained calibration model
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CalibrationFunction {
    /// Predicts no error at all
    #[default]
    Identity,
    /// Predicts the mean training error regardless of the features
    Constant(f64),
    Linear(LinearCalibration),
    RandomForest(RandomForestCalibration),
}

impl CalibrationFunction {
    /// The predicted m/z error, observed minus theoretical, for a feature vector
    pub fn predict(&self, inputs: &[f64]) -> f64 {
        match self {
            Self::Identity => 0.0,
            Self::Constant(offset) => *offset,
            Self::Linear(model) => model.predict(inputs),
            Self::RandomForest(model) => model.predict(inputs),
        }
    }

    /// The mean squared prediction error over `points`, or infinity when `points` is empty
    pub fn mse(&self, points: &[LabeledDataPoint]) -> f64 {
        if points.is_empty() {
            return f64::INFINITY;
        }
        let predictions = match self {
            Self::RandomForest(model) => {
                let rows: Vec<&[f64]> = points.iter().map(|p| p.inputs.as_slice()).collect();
                model.predict_many(&rows)
            }
            _ => points.iter().map(|p| self.predict(&p.inputs)).collect(),
        };
        points
            .iter()
            .zip(predictions)
            .map(|(p, y)| (p.label - y).powi(2))
            .sum::<f64>()
            / points.len() as f64
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }
}

impl Display for CalibrationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Constant(offset) => write!(f, "Constant({offset:0.6})"),
            Self::Linear(model) => Display::fmt(model, f),
            Self::RandomForest(model) => Display::fmt(model, f),
        }
    }
}
