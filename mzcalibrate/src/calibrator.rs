//! Rewriting a [`ScanCollection`]'s m/z values with fitted calibration functions.
use rayon::prelude::*;
use tracing::debug;

use crate::data_points::feature_vector;
use crate::functions::CalibrationFunction;
use crate::scan::{CalibrationScan, ScanCollection};

/// The MS1 features of the scan an MSn scan's precursor was selected from
#[derive(Debug, Clone, Copy, PartialEq)]
struct PrecursorContext {
    retention_time: f64,
    total_ion_current: f64,
    injection_time: Option<f64>,
}

impl From<&CalibrationScan> for PrecursorContext {
    fn from(scan: &CalibrationScan) -> Self {
        Self {
            retention_time: scan.retention_time,
            total_ion_current: scan.total_ion_current,
            injection_time: scan.injection_time,
        }
    }
}

fn corrected(function: &CalibrationFunction, mz: f64, inputs: &[f64]) -> f64 {
    let error = function.predict(inputs);
    if error.is_finite() {
        mz - error
    } else {
        mz
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SpectraCalibrator;

impl SpectraCalibrator {
    /// Subtract the predicted error from every m/z in `spectra`.
    ///
    /// MS1 peaks are corrected by `ms1`. MSn fragment peaks are corrected by `ms2`, while the
    /// selected ion and isolation window m/z of an MSn scan are corrected by `ms1` using the
    /// features of the scan they were selected from. Predictions that are not finite leave
    /// the m/z unchanged.
    pub fn apply(
        ms1: &CalibrationFunction,
        ms2: &CalibrationFunction,
        spectra: &mut ScanCollection,
    ) {
        let contexts: Vec<Option<PrecursorContext>> = spectra
            .iter()
            .map(|scan| {
                scan.precursor_scan_index
                    .and_then(|i| spectra.get(i))
                    .map(PrecursorContext::from)
            })
            .collect();

        spectra
            .as_mut_slice()
            .par_iter_mut()
            .zip(contexts.into_par_iter())
            .for_each(|(scan, context)| {
                if scan.is_ms1() {
                    Self::calibrate_ms1_scan(ms1, scan);
                } else {
                    Self::calibrate_msn_scan(ms1, ms2, scan, context);
                }
            });
        debug!("Calibrated {} scans", spectra.len());
    }

    fn calibrate_ms1_scan(function: &CalibrationFunction, scan: &mut CalibrationScan) {
        if function.is_identity() {
            return;
        }
        let rt = scan.retention_time;
        let tic = scan.total_ion_current;
        let injection_time = scan.injection_time;
        scan.update_mzs(|p| {
            let inputs = feature_vector(p.mz, rt, p.intensity as f64, tic, injection_time, None);
            corrected(function, p.mz, &inputs)
        });
    }

    fn calibrate_msn_scan(
        ms1: &CalibrationFunction,
        ms2: &CalibrationFunction,
        scan: &mut CalibrationScan,
        context: Option<PrecursorContext>,
    ) {
        let rt = scan.retention_time;
        let tic = scan.total_ion_current;
        let injection_time = scan.injection_time;
        let isolation_mz = scan.isolation_mz;

        if !ms2.is_identity() {
            let isolation_feature = Some(isolation_mz.unwrap_or(f64::NAN));
            scan.update_mzs(|p| {
                let inputs = feature_vector(
                    p.mz,
                    rt,
                    p.intensity as f64,
                    tic,
                    injection_time,
                    isolation_feature,
                );
                corrected(ms2, p.mz, &inputs)
            });
        }

        let Some(context) = context else {
            return;
        };
        if ms1.is_identity() {
            return;
        }
        let intensity = scan.selected_ion_intensity.unwrap_or(f64::NAN);
        let precursor_inputs = |mz: f64| {
            feature_vector(
                mz,
                context.retention_time,
                intensity,
                context.total_ion_current,
                context.injection_time,
                None,
            )
        };
        if let Some(mz) = scan.selected_ion_mz {
            scan.selected_ion_mz = Some(corrected(ms1, mz, &precursor_inputs(mz)));
        }
        if let Some(mz) = isolation_mz {
            scan.isolation_mz = Some(corrected(ms1, mz, &precursor_inputs(mz)));
        }
    }
}

#[cfg(test)]
mod test {
    use mzpeaks::CentroidPeak;

    use super::*;

    fn collection() -> ScanCollection {
        let ms1 = CalibrationScan::new(
            0,
            1,
            10.0,
            vec![CentroidPeak::new(500.0, 100.0, 0), CentroidPeak::new(600.0, 100.0, 0)],
        );
        let mut ms2 = CalibrationScan::new(
            0,
            2,
            10.01,
            vec![CentroidPeak::new(200.0, 10.0, 0), CentroidPeak::new(300.0, 10.0, 0)],
        );
        ms2.precursor_scan_index = Some(1);
        ms2.selected_ion_mz = Some(500.0);
        ms2.selected_ion_intensity = Some(100.0);
        ms2.isolation_mz = Some(500.0);
        [ms1, ms2].into_iter().collect()
    }

    #[test]
    fn test_constant_shift() {
        let mut spectra = collection();
        SpectraCalibrator::apply(
            &CalibrationFunction::Constant(0.001),
            &CalibrationFunction::Constant(0.002),
            &mut spectra,
        );
        let ms1 = spectra.get(1).unwrap();
        assert!((ms1.peaks.as_slice()[0].mz - 499.999).abs() < 1e-9);
        let ms2 = spectra.get(2).unwrap();
        assert!((ms2.peaks.as_slice()[1].mz - 299.998).abs() < 1e-9);
        assert!((ms2.selected_ion_mz.unwrap() - 499.999).abs() < 1e-9);
        assert!((ms2.isolation_mz.unwrap() - 499.999).abs() < 1e-9);
    }

    #[test]
    fn test_identity_is_noop() {
        let mut spectra = collection();
        SpectraCalibrator::apply(
            &CalibrationFunction::Identity,
            &CalibrationFunction::Identity,
            &mut spectra,
        );
        assert_eq!(spectra.get(2).unwrap().selected_ion_mz, Some(500.0));
        assert_eq!(spectra.get(1).unwrap().peaks.as_slice()[1].mz, 600.0);
    }

    #[test]
    fn test_non_finite_prediction_is_ignored() {
        let mut spectra = collection();
        SpectraCalibrator::apply(
            &CalibrationFunction::Constant(f64::NAN),
            &CalibrationFunction::Identity,
            &mut spectra,
        );
        assert_eq!(spectra.get(1).unwrap().peaks.as_slice()[0].mz, 500.0);
    }
}
