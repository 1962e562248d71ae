//! Recalibrate the m/z values of MS1 and MS2 spectra using matched peaks from confident
//! peptide identifications.
//!
//! The entry point is [`CalibrationEngine`], or [`calibrate`] for the default modification
//! table.
pub mod isotopic_model;
pub mod peaks;
pub mod peptide;
pub mod scan;

pub mod data_points;
pub mod extraction;
pub mod functions;
pub mod transforms;

pub mod calibrator;
pub mod engine;
pub mod results;
pub mod selection;

pub use crate::data_points::{DataPointAcquisitionResults, LabeledDataPoint, MassErrorSummary};
pub use crate::engine::{CalibrationEngine, CalibrationParams, CancellationToken};
pub use crate::extraction::{ExtractionParams, Identification, TrainingPointExtractor};
pub use crate::functions::{CalibrationCandidate, CalibrationFunction, FitError};
pub use crate::peptide::{IonKind, ModificationTable, PeptideSequence};
pub use crate::results::{
    CalibrationError, CalibrationFailure, CalibrationReport, Phase, RoundReport,
};
pub use crate::scan::{CalibrationScan, ScanCollection};

/// Calibrate `spectra` in place with a [`CalibrationEngine`] using the built-in modifications
pub fn calibrate(
    spectra: &mut ScanCollection,
    identifications: &[Identification],
    params: CalibrationParams,
) -> Result<CalibrationReport, CalibrationFailure> {
    CalibrationEngine::new(params).run(spectra, identifications)
}
