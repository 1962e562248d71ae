/*! Theoretical isotopic envelopes for peptides and their fragments */
use std::cmp::Ordering;

#[doc(hidden)]
pub use chemical_elements::isotopic_pattern::Peak as TheoreticalPeak;

use chemical_elements::isotopic_pattern::isotopic_variants;
use chemical_elements::{mass_charge_ratio, ChemicalComposition, PROTON as _PROTON};

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;

/// Convert a neutral mass to an m/z at `charge` with a proton carrier
#[inline]
pub fn to_mz(mass: f64, charge: i32) -> f64 {
    mass_charge_ratio(mass, charge, PROTON)
}

/// Parameters controlling the shape of an [`IsotopicEnvelope`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeParams {
    /// Isotopologue centers closer than this many Daltons are merged into one peak
    pub resolution: f64,
    /// The minimum fraction of the whole distribution a peak must hold to be kept
    pub min_probability: f64,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            resolution: 0.1,
            min_probability: 0.001,
        }
    }
}

/// The theoretical isotopologue masses and relative abundances for a chemical composition,
/// ordered from most to least abundant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsotopicEnvelope {
    masses: Vec<f64>,
    intensities: Vec<f64>,
}

impl IsotopicEnvelope {
    /// Build an envelope directly from parallel arrays, re-sorting them by descending intensity.
    pub fn new(masses: Vec<f64>, intensities: Vec<f64>) -> Self {
        let mut pairs: Vec<(f64, f64)> = masses.into_iter().zip(intensities).collect();
        pairs.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.total_cmp(&b.0))
        });
        let (masses, intensities) = pairs.into_iter().unzip();
        Self {
            masses,
            intensities,
        }
    }

    /// Compute the neutral isotopic envelope of `composition`
    pub fn from_composition(composition: &ChemicalComposition, params: &EnvelopeParams) -> Self {
        let peaks = isotopic_variants(composition.clone(), 0, 0, PROTON);
        let merged = merge_within(peaks, params.resolution);
        let (masses, intensities): (Vec<f64>, Vec<f64>) = merged
            .into_iter()
            .filter(|p| p.intensity >= params.min_probability)
            .map(|p| (p.mz, p.intensity))
            .unzip();
        Self::new(masses, intensities)
    }

    /// Neutral masses, most abundant first
    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    /// Relative abundances, parallel to [`IsotopicEnvelope::masses`]
    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// The smallest mass in the envelope, usually the monoisotopic peak
    pub fn lowest_mass(&self) -> Option<f64> {
        self.masses
            .iter()
            .copied()
            .min_by(|a, b| a.total_cmp(b))
    }

    /// The relative abundance of the most abundant isotopologue
    pub fn base_intensity(&self) -> f64 {
        self.intensities.first().copied().unwrap_or_default()
    }

    /// Iterate over `(mass, intensity)` pairs, most abundant first
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.masses
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
    }
}

/// Merge adjacent peaks whose centers lie within `resolution` of each other, using an
/// abundance-weighted center. `peaks` must be sorted by mass.
fn merge_within(peaks: Vec<TheoreticalPeak>, resolution: f64) -> Vec<TheoreticalPeak> {
    let mut merged: Vec<TheoreticalPeak> = Vec::with_capacity(peaks.len());
    for peak in peaks {
        match merged.last_mut() {
            Some(last) if (peak.mz - last.mz).abs() < resolution => {
                let total = last.intensity + peak.intensity;
                if total > 0.0 {
                    last.mz = (last.mz * last.intensity + peak.mz * peak.intensity) / total;
                }
                last.intensity = total;
            }
            _ => merged.push(peak),
        }
    }
    merged.sort_by(|a, b| a.mz.partial_cmp(&b.mz).unwrap_or(Ordering::Equal));
    merged
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_small_molecule_envelope() {
        let water = ChemicalComposition::parse("H2O").unwrap();
        let env = IsotopicEnvelope::from_composition(&water, &EnvelopeParams::default());
        assert!(!env.is_empty());
        assert!((env.masses()[0] - 18.0105646).abs() < 1e-3);
        assert!(env.base_intensity() > 0.95);
    }

    #[test]
    fn test_sorted_descending() {
        let comp = ChemicalComposition::parse("C100H160N28O30S2").unwrap();
        let env = IsotopicEnvelope::from_composition(&comp, &EnvelopeParams::default());
        assert!(env.len() > 3);
        for w in env.intensities().windows(2) {
            assert!(w[0] >= w[1]);
        }
        assert!(env.base_intensity() < 0.65);
        let lowest = env.lowest_mass().unwrap();
        assert!((lowest - comp.mass()).abs() < 1e-3);
        assert!(env.intensities().iter().all(|i| *i >= 0.001));
    }

    #[test]
    fn test_merge() {
        let peaks = vec![
            TheoreticalPeak {
                mz: 100.0,
                intensity: 0.5,
            },
            TheoreticalPeak {
                mz: 100.05,
                intensity: 0.5,
            },
            TheoreticalPeak {
                mz: 101.0,
                intensity: 0.1,
            },
        ];
        let merged = merge_within(peaks, 0.1);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].mz - 100.025).abs() < 1e-9);
        assert!((merged[0].intensity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_to_mz() {
        assert!((to_mz(1000.0, 2) - 501.007276).abs() < 1e-6);
    }
}
