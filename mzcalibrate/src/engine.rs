/*! The iterative calibration loop.

A run alternates between extracting training points from the current spectra, selecting
the best MS1 and MS2 calibration functions for those points, and applying them to the
spectra. Corrections accumulate across rounds. The linear phase runs first; the forest phase
optionally follows once the linear phase has converged.

A phase stops when a round's training point count fails to exceed the count from two rounds
earlier, see [`ConvergenceTracker`].
*/
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::calibrator::SpectraCalibrator;
use crate::data_points::{DataPointAcquisitionResults, LabeledDataPoint};
use crate::extraction::{ExtractionParams, Identification, TrainingPointExtractor};
use crate::functions::{CalibrationCandidate, FitError};
use crate::peptide::ModificationTable;
use crate::results::{
    CalibrationError, CalibrationFailure, CalibrationReport, Phase, RoundReport,
};
use crate::scan::ScanCollection;
use crate::selection::{ModelSelector, Selection};

/// A cooperative cancellation flag shared between the caller and a running engine
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Remembers the point counts of the last two recorded rounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceTracker {
    counts: [Option<usize>; 2],
}

impl ConvergenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker whose history starts with `count`
    pub fn seeded(count: usize) -> Self {
        let mut this = Self::new();
        this.record(count);
        this
    }

    /// The count from two rounds ago, or from the previous round if only one is known
    pub fn oldest(&self) -> Option<usize> {
        self.counts[0].or(self.counts[1])
    }

    /// Whether a round producing `count` points should end the phase
    pub fn should_halt(&self, count: usize) -> bool {
        self.oldest().is_some_and(|oldest| count <= oldest)
    }

    pub fn record(&mut self, count: usize) {
        if self.counts[1].is_some() {
            self.counts[0] = self.counts[1];
        }
        self.counts[1] = Some(count);
    }
}

/// Parameters for a [`CalibrationEngine`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CalibrationParams {
    pub extraction: ExtractionParams,
    /// Run the random forest phase after the linear phase converges
    pub do_forest: bool,
    pub seed: u64,
    /// The most rounds either phase may run
    pub max_rounds: usize,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            extraction: ExtractionParams::default(),
            do_forest: false,
            seed: 42,
            max_rounds: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
    pub params: CalibrationParams,
    pub modifications: ModificationTable,
    cancel: CancellationToken,
}

type RoundResult<T> = Result<T, CalibrationError>;

impl CalibrationEngine {
    pub fn new(params: CalibrationParams) -> Self {
        Self {
            params,
            modifications: ModificationTable::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_modifications(mut self, modifications: ModificationTable) -> Self {
        self.modifications = modifications;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn check_cancelled(&self) -> RoundResult<()> {
        if self.cancel.is_cancelled() {
            Err(CalibrationError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn extract(
        &self,
        spectra: &ScanCollection,
        identifications: &[Identification],
    ) -> DataPointAcquisitionResults {
        TrainingPointExtractor::new(spectra, &self.params.extraction, &self.modifications)
            .extract_points(identifications)
    }

    fn ensure_points(acquisition: &DataPointAcquisitionResults) -> RoundResult<()> {
        if acquisition.ms2.is_empty() {
            return Err(CalibrationError::NoMS2TrainingPoints);
        }
        if acquisition.ms1.is_empty() {
            return Err(CalibrationError::NoMS1TrainingPoints);
        }
        Ok(())
    }

    fn select(
        &self,
        points: &[LabeledDataPoint],
        candidates: &[CalibrationCandidate],
        rng: &mut ChaCha8Rng,
    ) -> RoundResult<Selection> {
        // Individual fit failures are skipped, so cancellation is the only error
        ModelSelector::select_best(points, candidates, rng, &self.cancel)
            .map_err(|_: FitError| CalibrationError::Cancelled)
    }

    /// Calibrate `spectra` in place.
    ///
    /// On failure the spectra keep every correction applied before the failing round, and the
    /// returned [`CalibrationFailure`] carries the report of those rounds.
    pub fn run(
        &self,
        spectra: &mut ScanCollection,
        identifications: &[Identification],
    ) -> Result<CalibrationReport, CalibrationFailure> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut report = CalibrationReport::default();
        match self.run_phases(spectra, identifications, &mut rng, &mut report) {
            Ok(()) => Ok(report),
            Err(error) => {
                warn!("Calibration failed: {error}");
                Err(CalibrationFailure::new(error, report))
            }
        }
    }

    fn run_phases(
        &self,
        spectra: &mut ScanCollection,
        identifications: &[Identification],
        rng: &mut ChaCha8Rng,
        report: &mut CalibrationReport,
    ) -> RoundResult<()> {
        let last = self.run_linear_phase(spectra, identifications, rng, report)?;
        if self.params.do_forest {
            self.run_forest_phase(spectra, identifications, last, rng, report)?;
        }
        Ok(())
    }

    fn run_linear_phase(
        &self,
        spectra: &mut ScanCollection,
        identifications: &[Identification],
        rng: &mut ChaCha8Rng,
        report: &mut CalibrationReport,
    ) -> RoundResult<DataPointAcquisitionResults> {
        let candidates = CalibrationCandidate::linear_round();
        let mut tracker = ConvergenceTracker::new();
        let mut round = 0;
        loop {
            round += 1;
            self.check_cancelled()?;
            let acquisition = self.extract(spectra, identifications);
            let mut round_report = RoundReport::new(Phase::Linear, round, &acquisition);
            let count = acquisition.count();
            info!(
                "Linear round {round}: {} MS1 points, {} MS2 points",
                acquisition.ms1.len(),
                acquisition.ms2.len()
            );

            if tracker.should_halt(count) {
                debug!("Linear phase converged after {} rounds", round - 1);
                round_report.converged = true;
                report.push(round_report);
                return Ok(acquisition);
            }
            tracker.record(count);

            if let Err(e) = Self::ensure_points(&acquisition) {
                report.push(round_report);
                return Err(e);
            }

            let ms1 = self.select(&acquisition.ms1, &candidates, rng)?;
            let ms2 = self.select(&acquisition.ms2, &candidates, rng)?;
            info!(
                "Linear round {round}: MS1 {} (MSE {:e}), MS2 {} (MSE {:e})",
                ms1.function, ms1.test_mse, ms2.function, ms2.test_mse
            );
            self.check_cancelled()?;
            SpectraCalibrator::apply(&ms1.function, &ms2.function, spectra);
            round_report.set_selections(&ms1, &ms2);
            report.push(round_report);

            if round >= self.params.max_rounds {
                warn!("Linear phase stopped after reaching the {round} round limit");
                return Ok(self.extract(spectra, identifications));
            }
        }
    }

    fn run_forest_phase(
        &self,
        spectra: &mut ScanCollection,
        identifications: &[Identification],
        start: DataPointAcquisitionResults,
        rng: &mut ChaCha8Rng,
        report: &mut CalibrationReport,
    ) -> RoundResult<()> {
        let ms1_candidates = CalibrationCandidate::ms1_forest_round();
        let ms2_candidates = CalibrationCandidate::ms2_forest_round();
        let mut tracker = ConvergenceTracker::seeded(start.count());
        let mut acquisition = start;
        let mut round = 0;
        loop {
            round += 1;
            self.check_cancelled()?;
            let mut round_report = RoundReport::new(Phase::Forest, round, &acquisition);
            if let Err(e) = Self::ensure_points(&acquisition) {
                report.push(round_report);
                return Err(e);
            }

            let ms1 = self.select(&acquisition.ms1, &ms1_candidates, rng)?;
            let ms2 = self.select(&acquisition.ms2, &ms2_candidates, rng)?;
            info!(
                "Forest round {round}: MS1 {} (MSE {:e}), MS2 {} (MSE {:e})",
                ms1.function, ms1.test_mse, ms2.function, ms2.test_mse
            );
            self.check_cancelled()?;
            SpectraCalibrator::apply(&ms1.function, &ms2.function, spectra);
            round_report.set_selections(&ms1, &ms2);

            acquisition = self.extract(spectra, identifications);
            let count = acquisition.count();
            info!(
                "Forest round {round}: {} MS1 points, {} MS2 points after calibration",
                acquisition.ms1.len(),
                acquisition.ms2.len()
            );
            if tracker.should_halt(count) {
                debug!("Forest phase converged after {round} rounds");
                round_report.converged = true;
                report.push(round_report);
                return Ok(());
            }
            tracker.record(count);
            report.push(round_report);

            if round >= self.params.max_rounds {
                warn!("Forest phase stopped after reaching the {round} round limit");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tracker_lookback() {
        let mut tracker = ConvergenceTracker::new();
        assert!(!tracker.should_halt(0));
        tracker.record(100);
        // round 2 compares against round 1
        assert!(tracker.should_halt(100));
        assert!(!tracker.should_halt(101));
        tracker.record(120);
        // round 3 compares against round 1
        assert!(!tracker.should_halt(110));
        assert!(tracker.should_halt(100));
        tracker.record(110);
        // round 4 compares against round 2
        assert!(tracker.should_halt(120));
        assert!(!tracker.should_halt(121));
    }

    #[test]
    fn test_tracker_seeded() {
        let tracker = ConvergenceTracker::seeded(50);
        assert_eq!(tracker.oldest(), Some(50));
        assert!(tracker.should_halt(50));
        assert!(!tracker.should_halt(51));
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancelled_run_keeps_spectra() {
        let engine = CalibrationEngine::default();
        engine.cancellation_token().cancel();
        let mut spectra = ScanCollection::new();
        let failure = engine.run(&mut spectra, &[]).unwrap_err();
        assert_eq!(failure.error, CalibrationError::Cancelled);
        assert!(failure.report.rounds.is_empty());
    }
}
