//! Moving spectra between mzML and the calibration engine's scan collection.
use std::collections::HashMap;

use mzdata::curie;
use mzdata::prelude::*;
use mzdata::spectrum::SignalContinuity;
use tracing::{debug, warn};

use mzcalibrate::{CalibrationScan, Identification, ScanCollection};

use crate::types::{CPeak, SpectrumType};

/// Pull the scan number out of a native ID like `controllerType=0 controllerNumber=1 scan=42`
pub(crate) fn scan_number_of(native_id: &str) -> Option<usize> {
    native_id
        .split_ascii_whitespace()
        .find_map(|tok| tok.strip_prefix("scan="))
        .and_then(|v| v.parse().ok())
}

/// The total ion current the source file recorded for `spectrum`
fn recorded_tic(spectrum: &SpectrumType) -> Option<f64> {
    spectrum
        .get_param_by_curie(&curie!(MS:1000285))
        .and_then(|p| p.to_f64().ok())
        .filter(|tic| tic.is_finite() && *tic > 0.0)
}

/// A run's spectra in calibration form, aligned one-to-one with the source spectra
#[derive(Debug, Default)]
pub struct LoadedRun {
    pub scans: ScanCollection,
    /// Whether each scan carried centroid peaks that can be calibrated
    centroided: Vec<bool>,
    scan_numbers: HashMap<usize, usize>,
}

impl LoadedRun {
    pub fn from_spectra(spectra: &mut [SpectrumType]) -> Self {
        let mut this = Self::default();
        let mut last_ms1: Option<usize> = None;
        let mut profile_count = 0usize;

        for spectrum in spectra.iter_mut() {
            let peaks: Vec<CPeak> = match spectrum.try_build_centroids() {
                Ok(peaks) => {
                    this.centroided.push(true);
                    peaks.iter().cloned().collect()
                }
                Err(e) => {
                    if spectrum.signal_continuity() == SignalContinuity::Profile {
                        profile_count += 1;
                    } else {
                        debug!("Spectrum {} has no usable peaks: {e}", spectrum.id());
                    }
                    this.centroided.push(false);
                    Vec::new()
                }
            };

            let mut scan = CalibrationScan::new(
                0,
                spectrum.ms_level(),
                spectrum.start_time(),
                peaks,
            );
            scan.native_id = spectrum.id().to_string();
            if let Some(tic) = recorded_tic(spectrum) {
                scan.total_ion_current = tic;
            }

            if let Some(event) = spectrum.acquisition().first_scan() {
                if event.injection_time > 0.0 {
                    scan.injection_time = Some(event.injection_time as f64);
                }
                if let Some(window) = event.scan_windows.first().filter(|w| !w.is_empty()) {
                    scan.scan_window = (window.lower_bound as f64, window.upper_bound as f64);
                }
            }

            if let Some(precursor) = spectrum.description.precursor.first() {
                if let Some(ion) = precursor.ions.first() {
                    scan.selected_ion_mz = Some(ion.mz);
                    scan.selected_ion_intensity = Some(ion.intensity as f64);
                }
                if precursor.isolation_window.target > 0.0 {
                    scan.isolation_mz = Some(precursor.isolation_window.target as f64);
                }
                scan.precursor_scan_index = precursor
                    .precursor_id
                    .as_deref()
                    .and_then(|id| this.scans.index_of_native_id(id))
                    .or(last_ms1);
            }

            let number = scan_number_of(&scan.native_id);
            let is_ms1 = scan.is_ms1();
            let index = this.scans.push(scan);
            if is_ms1 {
                last_ms1 = Some(index);
            }
            if let Some(number) = number {
                this.scan_numbers.insert(number, index);
            }
        }

        if profile_count > 0 {
            warn!("{profile_count} profile spectra were found, they will not be calibrated");
        }
        this
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    /// Translate the instrument scan numbers of `identifications` into positions in the run.
    ///
    /// Runs whose native IDs carry no scan numbers are assumed to be numbered by position.
    /// Identifications that refer to a scan not in the run are dropped.
    pub fn resolve_scan_numbers(&self, identifications: Vec<Identification>) -> Vec<Identification> {
        if self.scan_numbers.is_empty() {
            return identifications;
        }
        let total = identifications.len();
        let resolved: Vec<Identification> = identifications
            .into_iter()
            .filter_map(|mut ident| {
                let index = self.scan_numbers.get(&ident.scan_number)?;
                ident.scan_number = *index;
                Some(ident)
            })
            .collect();
        if resolved.len() < total {
            warn!(
                "{} identifications refer to scans that are not in the input file",
                total - resolved.len()
            );
        }
        resolved
    }

    /// Copy the calibrated m/z values of the scan at `position` (zero-based) back onto
    /// `spectrum`. Returns `false` if the spectrum was left untouched.
    pub fn write_back(&self, position: usize, spectrum: &mut SpectrumType) -> bool {
        let (Some(scan), Some(true)) = (
            self.scans.get(position + 1),
            self.centroided.get(position).copied(),
        ) else {
            return false;
        };
        update_spectrum(spectrum, scan);
        true
    }
}

fn update_spectrum(spectrum: &mut SpectrumType, scan: &CalibrationScan) {
    spectrum.peaks = Some(scan.peaks.clone());
    spectrum.arrays = None;
    spectrum.description.signal_continuity = SignalContinuity::Centroid;

    if let Some(precursor) = spectrum.description.precursor.first_mut() {
        if let (Some(mz), Some(ion)) = (scan.selected_ion_mz, precursor.ions.first_mut()) {
            ion.mz = mz;
        }
        if let Some(target) = scan.isolation_mz {
            let window = &mut precursor.isolation_window;
            let shift = (target - window.target as f64) as f32;
            window.target = target as f32;
            if window.lower_bound > 0.0 {
                window.lower_bound += shift;
            }
            if window.upper_bound > 0.0 {
                window.upper_bound += shift;
            }
        }
    }
    spectrum.update_summaries();
}

#[cfg(test)]
mod test {
    use super::*;

    use mzdata::spectrum::{
        IsolationWindow, IsolationWindowState, Precursor, ScanEvent, ScanWindow, SelectedIon,
        SpectrumDescription,
    };
    use mzdata::params::Value;
    use mzpeaks::PeakSet;

    fn spectrum(id: &str, ms_level: u8, time: f64, peaks: Vec<CPeak>) -> SpectrumType {
        let mut description = SpectrumDescription {
            id: id.to_string(),
            ms_level,
            signal_continuity: SignalContinuity::Centroid,
            ..Default::default()
        };
        let mut event = ScanEvent {
            start_time: time,
            injection_time: 25.0,
            ..Default::default()
        };
        event.scan_windows.push(ScanWindow::new(100.0, 2000.0));
        description.acquisition.scans.push(event);
        SpectrumType::new(description, None, Some(PeakSet::new(peaks)), None)
    }

    fn run() -> Vec<SpectrumType> {
        let ms1 = spectrum(
            "controllerType=0 controllerNumber=1 scan=11",
            1,
            5.0,
            vec![CPeak::new(500.0, 100.0, 0), CPeak::new(700.0, 50.0, 1)],
        );
        let mut ms2 = spectrum(
            "controllerType=0 controllerNumber=1 scan=12",
            2,
            5.01,
            vec![CPeak::new(300.0, 10.0, 0)],
        );
        let mut precursor = Precursor::default();
        precursor.ions.push(SelectedIon {
            mz: 500.0,
            intensity: 100.0,
            charge: Some(2),
            params: None,
        });
        precursor.isolation_window =
            IsolationWindow::new(500.0, 499.0, 501.0, IsolationWindowState::Complete);
        precursor.precursor_id = Some("controllerType=0 controllerNumber=1 scan=11".into());
        ms2.description.precursor.push(precursor);
        vec![ms1, ms2]
    }

    fn with_tic(mut spectrum: SpectrumType, tic: f64) -> SpectrumType {
        let mut param = curie!(MS:1000285).as_param();
        param.name = "total ion current".to_string();
        param.value = Value::Float(tic);
        spectrum.params_mut().push(param);
        spectrum
    }

    #[test_log::test]
    fn test_load() {
        let mut spectra = run();
        let loaded = LoadedRun::from_spectra(&mut spectra);
        assert_eq!(loaded.len(), 2);
        let ms2 = loaded.scans.get(2).unwrap();
        assert_eq!(ms2.precursor_scan_index, Some(1));
        assert_eq!(ms2.selected_ion_mz, Some(500.0));
        assert_eq!(ms2.isolation_mz, Some(500.0));
        assert_eq!(ms2.injection_time, Some(25.0));
        assert_eq!(ms2.scan_window, (100.0, 2000.0));
        assert_eq!(loaded.scans.get(1).unwrap().total_ion_current, 150.0);

        let idents = vec![
            Identification::new(12, 2, "PEPTIDE"),
            Identification::new(99, 2, "PEPTIDE"),
        ];
        let idents = loaded.resolve_scan_numbers(idents);
        assert_eq!(idents.len(), 1);
        assert_eq!(idents[0].scan_number, 2);
    }

    #[test_log::test]
    fn test_recorded_tic() {
        let mut spectra: Vec<SpectrumType> = run().into_iter().map(|s| with_tic(s, 1e7)).collect();
        let loaded = LoadedRun::from_spectra(&mut spectra);
        // the recorded value wins over the sum of the centroids
        assert_eq!(loaded.scans.get(1).unwrap().total_ion_current, 1e7);

        let mut spectra: Vec<SpectrumType> = run().into_iter().map(|s| with_tic(s, 0.0)).collect();
        let loaded = LoadedRun::from_spectra(&mut spectra);
        assert_eq!(loaded.scans.get(1).unwrap().total_ion_current, 150.0);
    }

    #[test_log::test]
    fn test_write_back() {
        let mut spectra = run();
        let mut loaded = LoadedRun::from_spectra(&mut spectra);
        for scan in loaded.scans.iter_mut() {
            scan.update_mzs(|p| p.mz - 0.01);
            if let Some(mz) = scan.selected_ion_mz.as_mut() {
                *mz -= 0.01;
            }
            if let Some(mz) = scan.isolation_mz.as_mut() {
                *mz -= 0.01;
            }
        }
        for (i, spectrum) in spectra.iter_mut().enumerate() {
            assert!(loaded.write_back(i, spectrum));
        }
        let peaks = spectra[0].peaks.as_ref().unwrap();
        assert!((peaks[0].mz - 499.99).abs() < 1e-9);
        let precursor = spectra[1].precursor().unwrap();
        assert!((precursor.ions[0].mz - 499.99).abs() < 1e-9);
        assert!((precursor.isolation_window.target - 499.99).abs() < 1e-3);
        assert!((precursor.isolation_window.lower_bound - 498.99).abs() < 1e-3);
        assert!(!loaded.write_back(5, &mut spectra[0]));
    }

    #[test]
    fn test_scan_number() {
        assert_eq!(
            scan_number_of("controllerType=0 controllerNumber=1 scan=42"),
            Some(42)
        );
        assert_eq!(scan_number_of("index=3"), None);
    }
}
