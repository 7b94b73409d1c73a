use pbx_core::RngHandle;
use pbx_model::{Alignment, AlignmentDocument, GlobalParameterState, ModelFlags, StarTreeEngine};

use pbx_mcmc::resample::component_range;
use pbx_mcmc::stepping::{check_candidate, combine_partials, SteppingOutcome};
use pbx_mcmc::{dimensions_for, estimate_marginal, spawn, Coordinator, EnsembleSettings};

fn sample_alignment() -> Alignment {
    Alignment::from_document(&AlignmentDocument {
        alphabet: "ACGT".into(),
        taxa: vec!["a".into(), "b".into(), "c".into()],
        sequences: vec!["ACGTAC".into(), "ACGAAC".into(), "TCGTAG".into()],
    })
    .unwrap()
}

fn start_with_weights(weights: &[f64]) -> Coordinator {
    let data = sample_alignment();
    let dims = dimensions_for(&data, weights.len());
    let mut rng = RngHandle::from_seed(3);
    let mut state = GlobalParameterState::initial(&dims, &mut rng).unwrap();
    for (component, &weight) in state.components.iter_mut().zip(weights) {
        component.weight = weight;
    }
    state.allocation = vec![0; dims.n_sites];
    let settings = EnsembleSettings {
        workers: 2,
        master_seed: 5,
        flags: ModelFlags::default(),
    };
    spawn(&settings, dims, state, data, StarTreeEngine::new(2)).unwrap()
}

#[test]
fn restore_leaves_allocation_identical() {
    let mut coordinator = start_with_weights(&[0.3, 0.3, 0.4]);
    let before = coordinator.state().clone();
    let estimate = estimate_marginal(&mut coordinator, 0..6, 4, true).unwrap();
    assert_eq!(estimate.sites.len(), 6);
    assert!(estimate.total.is_finite());
    assert_eq!(coordinator.state(), &before);
    for replica in coordinator.shutdown().unwrap() {
        assert_eq!(replica.state.allocation, before.allocation);
    }
}

#[test]
fn commit_sets_the_selected_candidate() {
    let mut coordinator = start_with_weights(&[0.0, 0.0, 1.0]);
    let logl = coordinator.site_log_likelihood_stepping(4, 2, false).unwrap();
    assert!(logl.is_finite());
    assert_eq!(coordinator.state().allocation[4], 2);
    let canonical = coordinator.state().clone();
    for replica in coordinator.shutdown().unwrap() {
        assert_eq!(replica.state.allocation, canonical.allocation);
    }
}

#[test]
fn commit_follows_the_drawn_worker_candidate() {
    let mut coordinator = start_with_weights(&[0.3, 0.3, 0.4]);
    let mut workers_seen = Vec::new();
    for site in 0..6 {
        let outcome = coordinator.stepping_round(site, 2, false).unwrap();
        assert!(outcome.log_likelihood.is_finite());
        assert!(component_range(3, 2, outcome.worker).contains(&outcome.candidate));
        assert_eq!(coordinator.state().allocation[site], outcome.candidate);
        workers_seen.push(outcome.worker);
    }
    assert!(workers_seen.iter().all(|&worker| worker == 1 || worker == 2));
    let canonical = coordinator.state().clone();
    for replica in coordinator.shutdown().unwrap() {
        assert_eq!(replica.state.allocation, canonical.allocation);
    }
}

#[test]
fn restored_round_reports_candidate_without_committing() {
    let mut coordinator = start_with_weights(&[0.3, 0.3, 0.4]);
    let before = coordinator.state().clone();
    let outcome = coordinator.stepping_round(2, 2, true).unwrap();
    assert!(component_range(3, 2, outcome.worker).contains(&outcome.candidate));
    assert_eq!(coordinator.state(), &before);
    coordinator.shutdown().unwrap();
}

#[test]
fn candidate_outside_the_worker_range_is_rejected() {
    // Three components over two workers: rank 1 owns 0..2, rank 2 owns 2..3.
    let owned = SteppingOutcome {
        log_likelihood: -1.0,
        worker: 2,
        candidate: 2,
    };
    check_candidate(&owned, 3, 2).unwrap();
    let stray = SteppingOutcome {
        candidate: 1,
        ..owned
    };
    let err = check_candidate(&stray, 3, 2).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.info().code, "candidate-range");
    assert_eq!(err.info().context.get("worker").map(String::as_str), Some("2"));
}

#[test]
fn zero_weights_report_zero_total_likelihood() {
    let mut rng = RngHandle::from_seed(1);
    let err = combine_partials(&[0.0, 0.0], &[-1, -1], &mut rng).unwrap_err();
    assert_eq!(err.info().message, "total likelihood is 0");

    let mut coordinator = start_with_weights(&[0.0, 0.0, 0.0]);
    let err = coordinator
        .site_log_likelihood_stepping(0, 1, true)
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.info().message, "total likelihood is 0");
    let err = coordinator.abort(err);
    assert_eq!(err.info().code, "zero-total-likelihood");
}

#[test]
fn combine_picks_the_only_valid_worker() {
    let mut rng = RngHandle::from_seed(9);
    let outcome = combine_partials(&[-3.0, 0.0, -1.5], &[1, -1, 4], &mut rng).unwrap();
    assert!(outcome.worker == 1 || outcome.worker == 3);
    let expected = ((-3.0f64).exp() + (-1.5f64).exp()).ln();
    assert!((outcome.log_likelihood - expected).abs() < 1e-12);

    let single = combine_partials(&[-2.0, -8.0], &[-1, 0], &mut rng).unwrap();
    assert_eq!(single.worker, 2);
    assert_eq!(single.candidate, 0);
    assert!((single.log_likelihood + 8.0).abs() < 1e-12);
}

#[test]
fn out_of_range_site_is_rejected() {
    let mut coordinator = start_with_weights(&[0.5, 0.5]);
    let err = coordinator
        .site_log_likelihood_stepping(6, 1, true)
        .unwrap_err();
    assert_eq!(err.info().code, "site-range");
    coordinator.shutdown().unwrap();
}

#[test]
fn stepping_requires_a_single_preparation() {
    let mut coordinator = start_with_weights(&[0.5, 0.5]);
    let err = coordinator.set_stepping_fraction(3).unwrap_err();
    assert_eq!(err.info().code, "stepping-unprepared");
    coordinator.prepare_stepping().unwrap();
    let err = coordinator.prepare_stepping().unwrap_err();
    assert_eq!(err.info().code, "stepping-prepared");
    coordinator.shutdown().unwrap();
}

#[test]
fn masks_follow_the_backup() {
    let mut coordinator = start_with_weights(&[0.5, 0.5]);
    coordinator.prepare_stepping().unwrap();

    coordinator.set_stepping_fraction(0).unwrap();
    assert!((0..6).all(|site| !coordinator.data().is_active(site)));
    let masked = coordinator.compute_cv_score().unwrap();
    assert!(masked.abs() < 1e-9);

    coordinator.set_stepping_fraction(18).unwrap();
    assert!((0..6).all(|site| coordinator.data().is_active(site)));

    coordinator.set_empirical_frac(0.5).unwrap();
    let active = (0..6).filter(|&site| coordinator.data().is_active(site)).count();
    assert_eq!(active, 3);
    assert_eq!(coordinator.empirical_frac(), 0.5);

    let replicas = coordinator.shutdown().unwrap();
    for replica in replicas {
        assert!(replica.backup.is_some());
        assert_eq!(replica.empirical_frac, 0.5);
    }
}
