#![allow(dead_code)]
use mzcalibrate::isotopic_model::{to_mz, EnvelopeParams, IsotopicEnvelope};
use mzcalibrate::peptide::{Fragment, IonKind, ModificationTable, PeptideSequence};
use mzcalibrate::{CalibrationScan, Identification, ScanCollection};
use mzpeaks::CentroidPeak;

pub const SEQUENCE: &str = "SAMPLERPEPTIDEK";
pub const CHARGE: i32 = 2;

pub fn peptide() -> PeptideSequence {
    PeptideSequence::parse(SEQUENCE, &ModificationTable::default()).unwrap()
}

pub fn peptide_envelope() -> IsotopicEnvelope {
    IsotopicEnvelope::from_composition(&peptide().composition(), &EnvelopeParams::default())
}

/// Every isotope of every b and y ion at charge 1, shifted by `offset` Da
pub fn fragment_peaks(offset: f64) -> Vec<CentroidPeak> {
    let params = EnvelopeParams::default();
    let mut peaks = Vec::new();
    for fragment in peptide().fragments(&[IonKind::B, IonKind::Y]) {
        let envelope =
            IsotopicEnvelope::from_composition(&fragment.composition, &params);
        for (mass, intensity) in envelope.iter() {
            peaks.push(CentroidPeak::new(
                to_mz(mass, 1) + offset,
                (intensity * 1e4) as f32,
                0,
            ));
        }
    }
    peaks
}

/// The intact peptide's envelope at `charge`, shifted by `offset` Da
pub fn precursor_peaks(charge: i32, offset: f64) -> Vec<CentroidPeak> {
    peptide_envelope()
        .iter()
        .map(|(mass, intensity)| {
            CentroidPeak::new(to_mz(mass, charge) + offset, (intensity * 1e6) as f32, 0)
        })
        .collect()
}

pub fn ms1_scan(retention_time: f64, peaks: Vec<CentroidPeak>) -> CalibrationScan {
    let mut scan = CalibrationScan::new(0, 1, retention_time, peaks);
    scan.injection_time = Some(20.0);
    scan.scan_window = (300.0, 2000.0);
    scan
}

pub fn ms2_scan(
    retention_time: f64,
    precursor_index: usize,
    peaks: Vec<CentroidPeak>,
) -> CalibrationScan {
    let mut scan = CalibrationScan::new(0, 2, retention_time, peaks);
    let precursor_mz = peptide_envelope()
        .lowest_mass()
        .map(|m| to_mz(m, CHARGE))
        .unwrap();
    scan.injection_time = Some(50.0);
    scan.scan_window = (50.0, 2500.0);
    scan.precursor_scan_index = Some(precursor_index);
    scan.isolation_mz = Some(precursor_mz);
    scan.selected_ion_mz = Some(precursor_mz);
    scan.selected_ion_intensity = Some(1e6);
    scan
}

/// MS1, MS2, MS1 with the given shifts applied to the precursor and fragment peaks
pub fn shifted_run(ms1_offset: f64, ms2_offset: f64) -> ScanCollection {
    [
        ms1_scan(10.0, precursor_peaks(CHARGE, ms1_offset)),
        ms2_scan(10.01, 1, fragment_peaks(ms2_offset)),
        ms1_scan(10.02, precursor_peaks(CHARGE, ms1_offset)),
    ]
    .into_iter()
    .collect()
}

pub fn identification() -> Identification {
    Identification::new(2, CHARGE, SEQUENCE)
}

/// The y ion of the test peptide with `ordinal` residues
pub fn y_fragment(ordinal: usize) -> Fragment {
    peptide()
        .fragments(&[IonKind::Y])
        .into_iter()
        .find(|f| f.ordinal == ordinal)
        .unwrap()
}

pub fn fragment_envelope(fragment: &Fragment) -> IsotopicEnvelope {
    IsotopicEnvelope::from_composition(&fragment.composition, &EnvelopeParams::default())
}

/// The `take` most abundant isotopes of `envelope` at `charge`
pub fn envelope_peaks(envelope: &IsotopicEnvelope, charge: i32, take: usize) -> Vec<CentroidPeak> {
    envelope
        .iter()
        .take(take)
        .map(|(mass, intensity)| CentroidPeak::new(to_mz(mass, charge), (intensity * 1e4) as f32, 0))
        .collect()
}

/// An MSn scan with a wide scan window and nothing else set
pub fn bare_ms2_scan(peaks: Vec<CentroidPeak>) -> CalibrationScan {
    let mut scan = CalibrationScan::new(1, 2, 5.0, peaks);
    scan.scan_window = (50.0, 2500.0);
    scan
}
