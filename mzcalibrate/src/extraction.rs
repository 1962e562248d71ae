/*! Mining training points from confident peptide identifications.

Each identification is searched twice:

1. In its own MS2 scan, matching the isotopic envelopes of its theoretical fragment ions.
2. If enough fragments were found, in the MS1 scans on either side of the MS2 scan, matching
   the isotopic envelope of the intact peptide at every plausible charge state.

Every isotope lookup is classified by the number of peaks inside the tolerance window:
none stops the walk for that charge, more than one is ambiguous and skipped, exactly one is
kept.
*/
use std::collections::HashSet;

use mzpeaks::Tolerance;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::data_points::{feature_vector, DataPointAcquisitionResults, LabeledDataPoint};
use crate::isotopic_model::{to_mz, EnvelopeParams, IsotopicEnvelope};
use crate::peaks::PeakLookup;
use crate::peptide::{Fragment, IonKind, ModificationTable, PeptideError, PeptideSequence};
use crate::scan::{CalibrationScan, ScanCollection};

/// The most-abundant-isotope fraction below which a single matched isotope is not trusted
pub const SINGLE_ISOTOPE_INTENSITY_THRESHOLD: f64 = 0.65;

/// A peptide-spectrum match accepted by an upstream search
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identification {
    /// One-based index of the MS2 scan
    pub scan_number: usize,
    pub charge: i32,
    /// Modified sequence, see [`PeptideSequence::parse`]
    pub sequence: String,
    pub q_value: Option<f64>,
    pub decoy: bool,
}

impl Identification {
    pub fn new(scan_number: usize, charge: i32, sequence: impl Into<String>) -> Self {
        Self {
            scan_number,
            charge,
            sequence: sequence.into(),
            q_value: None,
            decoy: false,
        }
    }
}

/// Parameters for [`TrainingPointExtractor`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExtractionParams {
    pub ms1_tolerance: Tolerance,
    pub ms2_tolerance: Tolerance,
    pub min_ms1_isotopic_peaks: usize,
    pub min_ms2_isotopic_peaks: usize,
    /// The number of distinct fragments an MS2 scan must match before its identification is
    /// used to search MS1 scans
    pub min_fragments_per_identification: usize,
    pub fragment_kinds: Vec<IonKind>,
    pub envelope: EnvelopeParams,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            ms1_tolerance: Tolerance::PPM(10.0),
            ms2_tolerance: Tolerance::PPM(25.0),
            min_ms1_isotopic_peaks: 3,
            min_ms2_isotopic_peaks: 2,
            min_fragments_per_identification: 10,
            fragment_kinds: vec![IonKind::B, IonKind::Y],
            envelope: EnvelopeParams::default(),
        }
    }
}

/// An exact `(peak m/z, retention time)` pair used to prevent an MS1 peak from contributing
/// to more than one training point. Compared bit-for-bit, never within a tolerance.
///
/// Peaks are only marked as used once the cluster they belong to becomes a training point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsedPeak {
    mz: u64,
    retention_time: u64,
}

impl UsedPeak {
    pub fn new(mz: f64, retention_time: f64) -> Self {
        Self {
            mz: mz.to_bits(),
            retention_time: retention_time.to_bits(),
        }
    }
}

pub type UsedPeakSet = HashSet<UsedPeak>;

/// The outcome of searching one MS2 scan
#[derive(Debug, Clone, Default)]
pub struct Ms2SearchResult {
    pub points: Vec<LabeledDataPoint>,
    pub considered: usize,
    pub ambiguous: usize,
    /// The number of distinct fragments that produced at least one point
    pub fragments_identified: usize,
}

/// The outcome of searching the MS1 scans around one identification
#[derive(Debug, Clone, Default)]
pub struct Ms1SearchResult {
    pub points: Vec<LabeledDataPoint>,
    pub considered: usize,
    pub ambiguous: usize,
}

/// A matched isotope: the observed peak and the theoretical m/z it was matched to
#[derive(Debug, Clone, Copy)]
struct IsotopeMatch {
    observed_mz: f64,
    intensity: f64,
    theoretical_mz: f64,
}

/// Collapse a cluster of matched isotopes into a single training point using the mean
/// m/z and intensity and the median error.
fn summarize_cluster(
    cluster: &[IsotopeMatch],
    scan: &CalibrationScan,
    isolation_mz: Option<f64>,
    identification: usize,
) -> LabeledDataPoint {
    let n = cluster.len() as f64;
    let mz = cluster.iter().map(|m| m.observed_mz).sum::<f64>() / n;
    let intensity = cluster.iter().map(|m| m.intensity).sum::<f64>() / n;
    let expected_mz = cluster.iter().map(|m| m.theoretical_mz).sum::<f64>() / n;
    let mut errors: Vec<f64> = cluster
        .iter()
        .map(|m| m.observed_mz - m.theoretical_mz)
        .collect();
    let label = median(&mut errors);
    let inputs = feature_vector(
        mz,
        scan.retention_time,
        intensity,
        scan.total_ion_current,
        scan.injection_time,
        isolation_mz,
    );
    LabeledDataPoint::new(inputs, label, expected_mz, identification)
}

pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Generates [`DataPointAcquisitionResults`] from identifications against a [`ScanCollection`]
#[derive(Debug, Clone, Copy)]
pub struct TrainingPointExtractor<'a> {
    pub spectra: &'a ScanCollection,
    pub params: &'a ExtractionParams,
    pub modifications: &'a ModificationTable,
}

struct PreparedIdentification {
    index: usize,
    peptide: PeptideSequence,
    ms2: Ms2SearchResult,
}

impl<'a> TrainingPointExtractor<'a> {
    pub fn new(
        spectra: &'a ScanCollection,
        params: &'a ExtractionParams,
        modifications: &'a ModificationTable,
    ) -> Self {
        Self {
            spectra,
            params,
            modifications,
        }
    }

    fn prepare(
        &self,
        index: usize,
        identification: &Identification,
    ) -> Result<PreparedIdentification, PeptideError> {
        let peptide = PeptideSequence::parse(&identification.sequence, self.modifications)?;
        let ms2 = match self.spectra.get(identification.scan_number) {
            Some(scan) if !scan.is_ms1() => {
                let fragments = peptide.fragments(&self.params.fragment_kinds);
                self.search_ms2_spectrum(scan, &fragments, identification.charge, index)
            }
            _ => {
                debug!(
                    "Identification {index} refers to scan {} which is not an MSn scan",
                    identification.scan_number
                );
                Ms2SearchResult::default()
            }
        };
        Ok(PreparedIdentification {
            index,
            peptide,
            ms2,
        })
    }

    /// Extract every MS2 and MS1 training point supported by `identifications`.
    ///
    /// MS2 scans are searched in parallel. The MS1 search runs in identification order against
    /// a single de-duplication set so the accepted points do not depend on thread scheduling.
    pub fn extract_points(&self, identifications: &[Identification]) -> DataPointAcquisitionResults {
        let prepared: Vec<Result<PreparedIdentification, PeptideError>> = identifications
            .par_iter()
            .enumerate()
            .map(|(i, ident)| self.prepare(i, ident))
            .collect();

        let mut results = DataPointAcquisitionResults::default();
        let mut used_peaks = UsedPeakSet::new();
        let n = identifications.len();
        let step = (n / 100).max(1);

        for (i, item) in prepared.into_iter().enumerate() {
            match item {
                Ok(prep) => {
                    let identification = &identifications[prep.index];
                    let Ms2SearchResult {
                        points,
                        considered,
                        ambiguous,
                        fragments_identified,
                    } = prep.ms2;
                    results.ms2.extend(points);
                    results.ms2_considered += considered;
                    results.ms2_ambiguous += ambiguous;

                    if fragments_identified >= self.params.min_fragments_per_identification {
                        results.identifications_used += 1;
                        let envelope = IsotopicEnvelope::from_composition(
                            &prep.peptide.composition(),
                            &self.params.envelope,
                        );
                        let ms1 = self.search_ms1_spectra(
                            &envelope,
                            identification.scan_number,
                            identification.charge,
                            prep.index,
                            &mut used_peaks,
                        );
                        results.ms1.extend(ms1.points);
                        results.ms1_considered += ms1.considered;
                        results.ms1_ambiguous += ms1.ambiguous;
                    } else {
                        trace!(
                            "Identification {} matched {fragments_identified} fragments, skipping MS1 search",
                            prep.index
                        );
                    }
                }
                Err(e) => {
                    debug!("Skipping identification {i}: {e}");
                    results.identifications_skipped += 1;
                }
            }
            if (i + 1) % step == 0 {
                debug!(
                    "Extracted points from {}/{} identifications ({:0.0}%)",
                    i + 1,
                    n,
                    (i + 1) as f64 / n as f64 * 100.0
                );
            }
        }
        results
    }

    /// Walk `envelope` at `charge` over `scan`, returning the matched isotopes.
    ///
    /// `accept` decides whether a uniquely matched peak may be used; returning `false` stops
    /// the walk.
    fn walk_isotopes<F: FnMut(f64) -> bool>(
        scan: &CalibrationScan,
        envelope: &IsotopicEnvelope,
        charge: i32,
        tolerance: &Tolerance,
        considered: &mut usize,
        ambiguous: &mut usize,
        mut accept: F,
    ) -> Vec<IsotopeMatch> {
        let mut cluster = Vec::with_capacity(envelope.len());
        for mass in envelope.masses() {
            let theoretical_mz = to_mz(*mass, charge);
            let n_peaks = scan.peaks.count_within(theoretical_mz, tolerance);
            if n_peaks == 0 {
                break;
            }
            *considered += 1;
            if n_peaks > 1 {
                *ambiguous += 1;
                continue;
            }
            let Some(peak) = scan.peaks.closest_peak(theoretical_mz) else {
                break;
            };
            if !accept(peak.mz) {
                break;
            }
            cluster.push(IsotopeMatch {
                observed_mz: peak.mz,
                intensity: peak.intensity as f64,
                theoretical_mz,
            });
        }
        cluster
    }

    /// Search the fragment ions of an identification in its MS2 scan
    pub fn search_ms2_spectrum(
        &self,
        scan: &CalibrationScan,
        fragments: &[Fragment],
        precursor_charge: i32,
        identification: usize,
    ) -> Ms2SearchResult {
        let mut result = Ms2SearchResult::default();
        let tolerance = &self.params.ms2_tolerance;
        let (window_low, window_high) = scan.scan_window;
        let isolation_mz = Some(scan.isolation_mz.unwrap_or(f64::NAN));

        for fragment in fragments {
            let mut monoisotopic_found = false;
            for charge in 1..=precursor_charge {
                let mz = to_mz(fragment.mass, charge);
                if mz > window_high {
                    continue;
                }
                if mz < window_low {
                    break;
                }
                if scan.peaks.closest_within(mz, tolerance).is_some() {
                    monoisotopic_found = true;
                    break;
                }
            }
            if !monoisotopic_found {
                continue;
            }

            let envelope = IsotopicEnvelope::from_composition(
                &fragment.composition,
                &self.params.envelope,
            );
            let Some(lowest_mass) = envelope.lowest_mass() else {
                continue;
            };
            let needed = self.params.min_ms2_isotopic_peaks.min(envelope.len());

            let mut started_adding = false;
            let mut identified = false;
            for charge in 1..=precursor_charge {
                let mz = to_mz(lowest_mass, charge);
                if mz > window_high {
                    continue;
                }
                if mz < window_low {
                    break;
                }
                let cluster = Self::walk_isotopes(
                    scan,
                    &envelope,
                    charge,
                    tolerance,
                    &mut result.considered,
                    &mut result.ambiguous,
                    |_| true,
                );
                if cluster.is_empty() && started_adding {
                    break;
                }
                if cluster.len() >= needed && !cluster.is_empty() {
                    started_adding = true;
                    if !identified {
                        identified = true;
                        result.fragments_identified += 1;
                    }
                    result.points.push(summarize_cluster(
                        &cluster,
                        scan,
                        isolation_mz,
                        identification,
                    ));
                }
            }
        }
        result
    }

    /// Search the MS1 scans surrounding `ms2_scan_index` for the intact peptide's envelope.
    ///
    /// Scans are walked outward, first towards lower indices then higher ones, skipping MSn
    /// scans, until an MS1 scan produces no point.
    pub fn search_ms1_spectra(
        &self,
        envelope: &IsotopicEnvelope,
        ms2_scan_index: usize,
        peptide_charge: i32,
        identification: usize,
        used_peaks: &mut UsedPeakSet,
    ) -> Ms1SearchResult {
        let mut result = Ms1SearchResult::default();
        let Some(lowest_mass) = envelope.lowest_mass() else {
            return result;
        };
        let tolerance = &self.params.ms1_tolerance;
        let needed = self.params.min_ms1_isotopic_peaks.min(envelope.len());
        let weak_base = envelope.base_intensity() < SINGLE_ISOTOPE_INTENSITY_THRESHOLD;
        let n_scans = self.spectra.len() as isize;

        for direction in [-1isize, 1] {
            let mut index = if direction == 1 {
                ms2_scan_index as isize
            } else {
                ms2_scan_index as isize - 1
            };
            let mut added_a_scan = true;
            let mut highest_known_charge = peptide_charge;

            while index >= 1 && index <= n_scans && added_a_scan {
                let Some(scan) = self.spectra.get(index as usize) else {
                    break;
                };
                if !scan.is_ms1() {
                    index += direction;
                    continue;
                }
                added_a_scan = false;
                let (window_low, window_high) = scan.scan_window;

                let mut charge = 1;
                while charge <= highest_known_charge.max(peptide_charge) + 1 {
                    let mz = to_mz(lowest_mass, charge);
                    if mz > window_high {
                        charge += 1;
                        continue;
                    }
                    if mz < window_low {
                        break;
                    }
                    let retention_time = scan.retention_time;
                    let mut claimed: Vec<UsedPeak> = Vec::new();
                    let cluster = Self::walk_isotopes(
                        scan,
                        envelope,
                        charge,
                        tolerance,
                        &mut result.considered,
                        &mut result.ambiguous,
                        |peak_mz| {
                            let key = UsedPeak::new(peak_mz, retention_time);
                            if used_peaks.contains(&key) || claimed.contains(&key) {
                                false
                            } else {
                                claimed.push(key);
                                true
                            }
                        },
                    );

                    let weak_single = cluster.len() == 1 && weak_base;
                    if (cluster.is_empty() || weak_single) && charge >= peptide_charge {
                        break;
                    }
                    if !weak_single && !cluster.is_empty() && cluster.len() >= needed {
                        added_a_scan = true;
                        highest_known_charge = highest_known_charge.max(charge);
                        used_peaks.extend(claimed);
                        result
                            .points
                            .push(summarize_cluster(&cluster, scan, None, identification));
                    }
                    charge += 1;
                }
                index += direction;
            }
        }
        result
    }
}
