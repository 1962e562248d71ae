//! Hold-out selection among calibration candidates.
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::data_points::LabeledDataPoint;
use crate::engine::CancellationToken;
use crate::functions::{CalibrationCandidate, CalibrationFunction, FitError};

/// The fraction of points used for training, the rest are held out for scoring
pub const TRAIN_FRACTION: f64 = 0.75;

/// The winning function of a selection round and how it was scored
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub function: CalibrationFunction,
    /// The winner's mean squared error on the held-out points
    pub test_mse: f64,
    /// The mean squared error of making no correction on the held-out points
    pub identity_mse: f64,
    pub train_len: usize,
    pub test_len: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ModelSelector;

impl ModelSelector {
    /// Shuffle `points`, split them into training and test partitions, train every candidate
    /// and keep the one with the lowest test error. [`CalibrationFunction::Identity`] is the
    /// initial incumbent and is only replaced by a strictly lower error.
    ///
    /// Candidates are trained in parallel but compared in the order given, so ties go to the
    /// earliest candidate. A candidate that fails to train is skipped.
    pub fn select_best(
        points: &[LabeledDataPoint],
        candidates: &[CalibrationCandidate],
        rng: &mut ChaCha8Rng,
        cancel: &CancellationToken,
    ) -> Result<Selection, FitError> {
        let mut shuffled = points.to_vec();
        shuffled.shuffle(rng);
        let split_at = (shuffled.len() as f64 * TRAIN_FRACTION) as usize;
        let (train, test) = shuffled.split_at(split_at);

        let seeds: Vec<u64> = candidates.iter().map(|_| rng.gen()).collect();

        let fits: Vec<Result<(CalibrationFunction, f64), FitError>> = candidates
            .par_iter()
            .zip(seeds)
            .map(|(candidate, seed)| {
                if cancel.is_cancelled() {
                    return Err(FitError::Cancelled);
                }
                let mut candidate_rng = ChaCha8Rng::seed_from_u64(seed);
                let function = candidate.train(train, &mut candidate_rng)?;
                let mse = function.mse(test);
                Ok((function, mse))
            })
            .collect();

        let identity_mse = CalibrationFunction::Identity.mse(test);
        let mut best = CalibrationFunction::Identity;
        let mut best_mse = identity_mse;
        for (candidate, fit) in candidates.iter().zip(fits) {
            match fit {
                Ok((function, mse)) => {
                    trace!("{function} scored {mse:e}");
                    if mse < best_mse {
                        best = function;
                        best_mse = mse;
                    }
                }
                Err(FitError::Cancelled) => return Err(FitError::Cancelled),
                Err(e) => {
                    debug!("{candidate} was not fit: {e}");
                }
            }
        }

        Ok(Selection {
            function: best,
            test_mse: best_mse,
            identity_mse,
            train_len: train.len(),
            test_len: test.len(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_points::feature_vector;

    fn offset_points(n: usize, offset: f64) -> Vec<LabeledDataPoint> {
        (0..n)
            .map(|i| {
                let mz = 400.0 + i as f64 * 3.0;
                let jitter = if i % 2 == 0 { 1e-5 } else { -1e-5 };
                LabeledDataPoint::new(
                    feature_vector(mz, i as f64 * 0.05, 1e4, 1e7, Some(30.0), None),
                    offset + jitter,
                    mz,
                    i,
                )
            })
            .collect()
    }

    #[test_log::test]
    fn test_selects_better_than_identity() {
        let points = offset_points(100, 0.002);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let selection = ModelSelector::select_best(
            &points,
            &CalibrationCandidate::linear_round(),
            &mut rng,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(selection.train_len, 75);
        assert_eq!(selection.test_len, 25);
        assert!(!selection.function.is_identity());
        assert!(selection.test_mse < selection.identity_mse);
        let correction = selection.function.predict(&points[0].inputs);
        assert!((correction - 0.002).abs() < 1e-4);
    }

    #[test]
    fn test_identity_kept_without_signal() {
        let points: Vec<_> = offset_points(40, 0.0)
            .into_iter()
            .map(|mut p| {
                p.label = 0.0;
                p
            })
            .collect();
        let selection = ModelSelector::select_best(
            &points,
            &CalibrationCandidate::linear_round(),
            &mut ChaCha8Rng::seed_from_u64(1),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(selection.function.is_identity());
        assert_eq!(selection.test_mse, 0.0);
    }

    #[test]
    fn test_empty_training_set() {
        let points = offset_points(1, 0.002);
        let selection = ModelSelector::select_best(
            &points,
            &CalibrationCandidate::linear_round(),
            &mut ChaCha8Rng::seed_from_u64(1),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(selection.test_len, 1);
        assert_eq!(selection.train_len, 0);
        assert!(selection.function.is_identity());
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ModelSelector::select_best(
            &offset_points(20, 0.001),
            &CalibrationCandidate::linear_round(),
            &mut ChaCha8Rng::seed_from_u64(1),
            &cancel,
        );
        assert_eq!(result, Err(FitError::Cancelled));
    }
}
