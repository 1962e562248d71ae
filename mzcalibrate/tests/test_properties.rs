use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use mzcalibrate::data_points::feature_vector;
use mzcalibrate::selection::ModelSelector;
use mzcalibrate::transforms::TRANSFORMS;
use mzcalibrate::{
    CalibrationCandidate, CalibrationEngine, CalibrationFunction, CalibrationParams,
    CancellationToken, Identification, LabeledDataPoint, Phase,
};

mod common;

#[test_log::test]
fn test_point_counts_grow_until_convergence() {
    let mut spectra = common::shifted_run(0.004, 0.003);
    let params = CalibrationParams {
        do_forest: true,
        ..Default::default()
    };
    let report = CalibrationEngine::new(params)
        .run(&mut spectra, &[common::identification()])
        .unwrap();

    for phase in [Phase::Linear, Phase::Forest] {
        let rounds: Vec<_> = report.rounds_in(phase).collect();
        assert!(!rounds.is_empty());
        assert!(rounds.iter().filter(|r| r.converged).count() <= 1);
        if let Some(last) = rounds.last() {
            if phase == Phase::Linear {
                assert!(last.converged);
            }
        }
    }

    let linear: Vec<_> = report.rounds_in(Phase::Linear).collect();
    for (k, round) in linear.iter().enumerate().skip(1) {
        if round.converged {
            continue;
        }
        let lookback = linear[k.saturating_sub(2)].point_count();
        assert!(round.point_count() > lookback);
    }
    assert!(!report.ms1_function.is_empty());
}

#[test_log::test]
fn test_ms1_peaks_used_once() {
    let spectra = common::shifted_run(0.0, 0.0);
    let identifications: Vec<Identification> = (0..3).map(|_| common::identification()).collect();
    let engine = CalibrationEngine::default();
    let acquisition = engine.extract(&spectra, &identifications);

    assert_eq!(acquisition.identifications_used, 3);
    assert_eq!(acquisition.ms1.len(), 2);
    // every identification still contributes its fragments
    assert_eq!(acquisition.ms2.len() % 3, 0);
    let pairs: HashSet<(u64, u64)> = acquisition
        .ms1
        .iter()
        .map(|p| (p.mz().to_bits(), p.retention_time().to_bits()))
        .collect();
    assert_eq!(pairs.len(), acquisition.ms1.len());
}

#[test_log::test]
fn test_label_is_observed_minus_theoretical() {
    let spectra = common::shifted_run(0.004, -0.003);
    let acquisition = CalibrationEngine::default().extract(&spectra, &[common::identification()]);
    assert!(!acquisition.ms1.is_empty());
    assert!(!acquisition.ms2.is_empty());
    for point in acquisition.ms1.iter() {
        assert!((point.expected_mz + point.label - point.mz()).abs() < 1e-9);
        assert!((point.label - 0.004).abs() < 1e-9);
    }
    for point in acquisition.ms2.iter() {
        assert!((point.expected_mz + point.label - point.mz()).abs() < 1e-9);
        assert!((point.label + 0.003).abs() < 1e-9);
    }
}

#[test_log::test]
fn test_unusable_identifications_are_skipped() {
    let spectra = common::shifted_run(0.0, 0.0);
    let identifications = vec![
        Identification::new(2, 2, "PEPT[Unknown]IDE"),
        Identification::new(2, 2, "PEPTIDE|PEPTLDE"),
        common::identification(),
        // not an MSn scan
        Identification::new(1, 2, common::SEQUENCE),
    ];
    let acquisition = CalibrationEngine::default().extract(&spectra, &identifications);
    assert_eq!(acquisition.identifications_skipped, 2);
    assert_eq!(acquisition.identifications_used, 1);
    assert!(acquisition.ms2.iter().all(|p| p.identification == 2));
}

fn noisy_points(rng: &mut ChaCha8Rng, n: usize) -> Vec<LabeledDataPoint> {
    (0..n)
        .map(|i| {
            let mz = rng.gen_range(300.0..1500.0);
            let rt = rng.gen_range(0.0..60.0);
            let label = rng.gen_range(-0.005..0.005);
            LabeledDataPoint::new(
                feature_vector(mz, rt, rng.gen_range(1e3..1e6), 1e8, Some(25.0), None),
                label,
                mz - label,
                i,
            )
        })
        .collect()
}

#[test_log::test]
fn test_selection_never_worse_than_identity() {
    let mut rng = ChaCha8Rng::seed_from_u64(1024);
    let cancel = CancellationToken::new();
    for n in [0, 1, 3, 10, 50, 200] {
        let points = noisy_points(&mut rng, n);
        for candidates in [
            CalibrationCandidate::linear_round(),
            CalibrationCandidate::ms1_forest_round(),
        ] {
            let selection =
                ModelSelector::select_best(&points, &candidates, &mut rng, &cancel).unwrap();
            assert!(selection.test_mse <= selection.identity_mse || selection.test_len == 0);
        }
    }
}

#[test]
fn test_transform_arity() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for point in noisy_points(&mut rng, 20) {
        for transform in TRANSFORMS.iter() {
            assert_eq!(transform.apply(&point.inputs).len(), transform.arity());
        }
    }
    assert_eq!(CalibrationFunction::Identity.predict(&[]), 0.0);
}
