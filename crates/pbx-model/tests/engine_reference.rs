use pbx_core::numeric::discrete_gamma_rates;
use pbx_core::RngHandle;
use pbx_model::{
    Alignment, Dimensions, GlobalParameterState, LikelihoodEngine, SequenceStore, StarTreeEngine,
};

fn fixture() -> (Alignment, GlobalParameterState, Dimensions) {
    let rows = vec![
        vec![Some(0), Some(1), None, Some(3)],
        vec![Some(0), Some(2), None, Some(3)],
        vec![Some(0), Some(1), None, Some(2)],
    ];
    let alignment =
        Alignment::from_states("ACGT", vec!["a".into(), "b".into(), "c".into()], rows).unwrap();
    let dims = Dimensions::new(4, 3, 3, 4, 2);
    let mut rng = RngHandle::from_seed(17);
    let state = GlobalParameterState::initial(&dims, &mut rng).unwrap();
    (alignment, state, dims)
}

#[test]
fn rates_have_unit_mean() {
    let rates = discrete_gamma_rates(0.7, 4);
    let mean: f64 = rates.iter().sum::<f64>() / 4.0;
    assert!((mean - 1.0).abs() < 1e-6);
    let mut engine = StarTreeEngine::new(4);
    let (_, mut state, _) = fixture();
    state.alpha = 0.7;
    engine.update_matrices(&state);
    assert_eq!(engine.rates(), rates.as_slice());
}

#[test]
fn site_log_likelihoods_are_finite_and_missing_columns_are_neutral() {
    let (alignment, state, _) = fixture();
    let mut engine = StarTreeEngine::new(4);
    engine.update_matrices(&state);
    engine.recompute_conditional_likelihoods(&state, &alignment, 0..alignment.n_sites());
    for site in [0, 1, 3] {
        let logl = engine.site_log_likelihood(site);
        assert!(logl.is_finite() && logl < 0.0, "site {site} gave {logl}");
    }
    assert!(engine.site_log_likelihood(2).abs() < 1e-12);
}

#[test]
fn constant_site_prefers_its_observed_root() {
    let (alignment, state, _) = fixture();
    let mut engine = StarTreeEngine::new(2);
    engine.update_matrices(&state);
    let posterior = engine.root_state_posterior(&state, &alignment, 0);
    assert!((posterior.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    let best = posterior
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k);
    assert_eq!(best, Some(0));
}

#[test]
fn suff_stats_count_changes_from_the_root() {
    let (alignment, state, dims) = fixture();
    let mut engine = StarTreeEngine::new(2);
    engine.update_matrices(&state);
    let constant = engine.site_suff_stat(&state, &alignment, 0);
    assert_eq!(constant.rate_count, 0.0);
    assert!((constant.rate_beta - 0.3).abs() < 1e-12);
    assert_eq!(constant.rr_count.len(), dims.n_rr);

    let variable = engine.site_suff_stat(&state, &alignment, 1);
    assert!(variable.rate_count >= 1.0);
    assert_eq!(variable.rr_count.iter().sum::<f64>(), variable.rate_count);
}

#[test]
fn simulated_columns_use_the_state_space() {
    let (_, state, _) = fixture();
    let mut engine = StarTreeEngine::new(4);
    engine.update_matrices(&state);
    let mut rng = RngHandle::from_seed(2);
    let column = engine.simulate_site(&state, 1, 6, &mut rng);
    assert_eq!(column.len(), 6);
    assert!(column.iter().all(|&s| s < 4));
    let rate = engine.site_rate(&state, &fixture().0, 1);
    assert!(rate > 0.0);
}
