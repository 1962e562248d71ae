//! Ordinary least squares over a [`FeatureTransform`]'s projection of the inputs.
use std::fmt::Display;

use crate::data_points::LabeledDataPoint;
use crate::transforms::FeatureTransform;

use super::FitError;

const PIVOT_EPSILON: f64 = 1e-10;

/// A fitted linear model `label ~ intercept + Σ β_i * z_i` where `z` are the standardized
/// transformed features
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCalibration {
    pub transform: &'static FeatureTransform,
    means: Vec<f64>,
    scales: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearCalibration {
    /// Fit the model to `points`.
    ///
    /// Requires more than `arity + 1` points and finite, non-constant projected features.
    pub fn fit(
        transform: &'static FeatureTransform,
        points: &[LabeledDataPoint],
    ) -> Result<Self, FitError> {
        let k = transform.arity();
        let n = points.len();
        if n == 0 {
            return Err(FitError::Empty);
        }
        if n <= k + 1 {
            return Err(FitError::InsufficientPoints {
                needed: k + 2,
                found: n,
            });
        }

        let rows: Vec<Vec<f64>> = points.iter().map(|p| transform.apply(&p.inputs)).collect();
        if rows.iter().flatten().any(|v| !v.is_finite()) || points.iter().any(|p| !p.label.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let nf = n as f64;
        let mut means = vec![0.0; k];
        for row in rows.iter() {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= nf);

        let mut scales = vec![0.0; k];
        for row in rows.iter() {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(means.iter()) {
                *s += (v - m).powi(2);
            }
        }
        for s in scales.iter_mut() {
            *s = (*s / nf).sqrt();
            if *s <= f64::EPSILON {
                return Err(FitError::Singular);
            }
        }

        let y_mean = points.iter().map(|p| p.label).sum::<f64>() / nf;

        // Normal equations on centered data, so the intercept is the label mean
        let mut xtx = vec![vec![0.0; k]; k];
        let mut xty = vec![0.0; k];
        let mut z = vec![0.0; k];
        for (row, point) in rows.iter().zip(points) {
            for j in 0..k {
                z[j] = (row[j] - means[j]) / scales[j];
            }
            let y = point.label - y_mean;
            for i in 0..k {
                xty[i] += z[i] * y;
                for j in 0..k {
                    xtx[i][j] += z[i] * z[j];
                }
            }
        }

        let coefficients = solve(xtx, xty).ok_or(FitError::Singular)?;
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FitError::NonFinite);
        }

        Ok(Self {
            transform,
            means,
            scales,
            coefficients,
            intercept: y_mean,
        })
    }

    pub fn predict(&self, inputs: &[f64]) -> f64 {
        let x = self.transform.apply(inputs);
        x.iter()
            .zip(self.means.iter().zip(self.scales.iter()))
            .zip(self.coefficients.iter())
            .fold(self.intercept, |acc, ((v, (m, s)), b)| acc + b * (v - m) / s)
    }
}

impl Display for LinearCalibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Linear({})", self.transform)
    }
}

/// Solve `a x = b` by Gauss-Jordan elimination with partial pivoting.
///
/// Returns `None` if `a` is singular.
pub(crate) fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let p = a[col][col];
        for j in col..n {
            a[col][j] /= p;
        }
        b[col] /= p;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_points::feature_vector;

    #[test]
    fn test_solve() {
        let a = vec![vec![0.0, 2.0], vec![1.0, 1.0]];
        let x = solve(a, vec![4.0, 3.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);

        let singular = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve(singular, vec![1.0, 2.0]).is_none());
    }

    #[test_log::test]
    fn test_fit_linear_mz() {
        let transform = FeatureTransform::find("mz").unwrap();
        let points: Vec<_> = (0..20)
            .map(|i| {
                let mz = 400.0 + i as f64 * 25.0;
                let inputs = feature_vector(mz, 10.0 + i as f64 * 0.1, 1e4, 1e7, Some(25.0), None);
                LabeledDataPoint::new(inputs, 1e-6 * mz + 0.001, mz, i)
            })
            .collect();
        let model = LinearCalibration::fit(transform, &points).unwrap();
        for p in points.iter() {
            assert!((model.predict(&p.inputs) - p.label).abs() < 1e-9);
        }
        assert_eq!(model.to_string(), "Linear(mz)");
    }

    #[test]
    fn test_fit_guards() {
        let transform = FeatureTransform::find("mz+rt").unwrap();
        assert_eq!(LinearCalibration::fit(transform, &[]), Err(FitError::Empty));

        let few: Vec<_> = (0..3)
            .map(|i| LabeledDataPoint::new(feature_vector(500.0 + i as f64, i as f64, 1.0, 1.0, None, None), 0.0, 500.0, 0))
            .collect();
        assert_eq!(
            LinearCalibration::fit(transform, &few),
            Err(FitError::InsufficientPoints { needed: 4, found: 3 })
        );

        let injection = FeatureTransform::find("injection_time").unwrap();
        let missing: Vec<_> = (0..10)
            .map(|i| LabeledDataPoint::new(feature_vector(500.0 + i as f64, i as f64, 1.0, 1.0, None, None), 0.0, 500.0, 0))
            .collect();
        assert_eq!(LinearCalibration::fit(injection, &missing), Err(FitError::NonFinite));

        let rt = FeatureTransform::find("rt").unwrap();
        let constant: Vec<_> = (0..10)
            .map(|i| LabeledDataPoint::new(feature_vector(500.0 + i as f64, 1.0, 1.0, 1.0, None, None), 0.0, 500.0, 0))
            .collect();
        assert_eq!(LinearCalibration::fit(rt, &constant), Err(FitError::Singular));
    }
}
