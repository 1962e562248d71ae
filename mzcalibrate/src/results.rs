//! The round-by-round record of a calibration run, and how it can fail.
use std::fmt::Display;

use thiserror::Error;

use crate::data_points::{DataPointAcquisitionResults, MassErrorSummary};
use crate::selection::Selection;

/// Which family of functions a round was fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Phase {
    #[default]
    Linear,
    Forest,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Linear => f.write_str("linear"),
            Phase::Forest => f.write_str("forest"),
        }
    }
}

/// The outcome of one extract-fit-apply round
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundReport {
    pub phase: Phase,
    pub round: usize,
    pub ms1_points: usize,
    pub ms2_points: usize,
    pub ms1_considered: usize,
    pub ms1_ambiguous: usize,
    pub ms2_considered: usize,
    pub ms2_ambiguous: usize,
    pub identifications_used: usize,
    pub identifications_skipped: usize,
    pub ms1_errors: MassErrorSummary,
    pub ms2_errors: MassErrorSummary,
    pub ms1_function: Option<String>,
    pub ms2_function: Option<String>,
    pub ms1_test_mse: Option<f64>,
    pub ms2_test_mse: Option<f64>,
    /// Whether this round's point count stopped the phase
    pub converged: bool,
}

impl RoundReport {
    pub fn new(phase: Phase, round: usize, acquisition: &DataPointAcquisitionResults) -> Self {
        Self {
            phase,
            round,
            ms1_points: acquisition.ms1.len(),
            ms2_points: acquisition.ms2.len(),
            ms1_considered: acquisition.ms1_considered,
            ms1_ambiguous: acquisition.ms1_ambiguous,
            ms2_considered: acquisition.ms2_considered,
            ms2_ambiguous: acquisition.ms2_ambiguous,
            identifications_used: acquisition.identifications_used,
            identifications_skipped: acquisition.identifications_skipped,
            ms1_errors: acquisition.ms1_errors(),
            ms2_errors: acquisition.ms2_errors(),
            ..Default::default()
        }
    }

    pub fn point_count(&self) -> usize {
        self.ms1_points + self.ms2_points
    }

    pub fn set_selections(&mut self, ms1: &Selection, ms2: &Selection) {
        self.ms1_function = Some(ms1.function.to_string());
        self.ms1_test_mse = Some(ms1.test_mse);
        self.ms2_function = Some(ms2.function.to_string());
        self.ms2_test_mse = Some(ms2.test_mse);
    }
}

/// Everything a calibration run did, in order
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationReport {
    pub rounds: Vec<RoundReport>,
    /// The most recently applied MS1 function
    pub ms1_function: String,
    /// The most recently applied MS2 function
    pub ms2_function: String,
}

impl Default for CalibrationReport {
    fn default() -> Self {
        Self {
            rounds: Vec::new(),
            ms1_function: "Identity".into(),
            ms2_function: "Identity".into(),
        }
    }
}

impl CalibrationReport {
    pub fn push(&mut self, round: RoundReport) {
        if let Some(f) = round.ms1_function.as_ref() {
            self.ms1_function = f.clone();
        }
        if let Some(f) = round.ms2_function.as_ref() {
            self.ms2_function = f.clone();
        }
        self.rounds.push(round);
    }

    pub fn rounds_in(&self, phase: Phase) -> impl Iterator<Item = &RoundReport> + '_ {
        self.rounds.iter().filter(move |r| r.phase == phase)
    }

    pub fn last_round(&self) -> Option<&RoundReport> {
        self.rounds.last()
    }
}

/// Terminal conditions of a calibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("No MS2 training points were found, try increasing the product mass tolerance")]
    NoMS2TrainingPoints,
    #[error("No MS1 training points were found, try increasing the precursor mass tolerance")]
    NoMS1TrainingPoints,
    #[error("Calibration was cancelled")]
    Cancelled,
}

/// A failed calibration run with the report of every round completed before it failed
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct CalibrationFailure {
    #[source]
    pub error: CalibrationError,
    pub report: CalibrationReport,
}

impl CalibrationFailure {
    pub fn new(error: CalibrationError, report: CalibrationReport) -> Self {
        Self { error, report }
    }
}
