use std::fs;
use std::path::Path;

use pbx_model::{Alignment, AlignmentDocument, StarTreeEngine};
use tempfile::tempdir;

use pbx_mcmc::{
    count_snapshots, run, run_stepping, ChainReader, JsonLinesChain, MoveCounts, RunConfig,
    RunManifest, SteppingRequest,
};

fn sample_alignment() -> Alignment {
    Alignment::from_document(&AlignmentDocument {
        alphabet: "ACGT".into(),
        taxa: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        sequences: vec![
            "ACGTACGTAC".into(),
            "ACGTACGAAC".into(),
            "ACTAACG-CC".into(),
            "TCGTACNTAC".into(),
        ],
    })
    .unwrap()
}

fn small_config(root: Option<&Path>) -> RunConfig {
    let mut config = RunConfig::default();
    config.cycles = 4;
    config.burn_in = 1;
    config.thinning = 2;
    config.workers = 2;
    config.model.max_components = 3;
    config.model.rate_categories = 2;
    config.moves = MoveCounts {
        realloc_reps: 1,
        profile_reps: 2,
        profile_step: 0.1,
        alpha_reps: 1,
        alpha_step: 0.5,
    };
    config.output.run_directory = root.map(Path::to_path_buf);
    config
}

#[test]
fn run_writes_chain_metrics_and_manifest() {
    let dir = tempdir().unwrap();
    let config = small_config(Some(dir.path()));
    let summary = run(&config, sample_alignment(), StarTreeEngine::new(2)).unwrap();

    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.samples_written, 2);
    assert_eq!(summary.samples.len(), 4);
    assert!(summary.final_log_likelihood.is_finite());
    assert!(summary.coverage.distinct_allocations >= 1);
    assert!((0.0..=1.0).contains(&summary.alpha_acceptance));

    let chain_path = summary.chain_path.clone().unwrap();
    assert_eq!(count_snapshots(&chain_path).unwrap(), 2);
    let mut reader = JsonLinesChain::open(&chain_path).unwrap();
    let mut last = None;
    while let Some(state) = reader.next_snapshot().unwrap() {
        assert_eq!(state.allocation.len(), 10);
        last = Some(state);
    }
    let last = last.unwrap();
    assert_eq!(last.allocation, summary.final_state.allocation);
    assert!((last.alpha - summary.final_state.alpha).abs() < 1e-12);

    let metrics = fs::read_to_string(summary.metrics_path.unwrap()).unwrap();
    assert!(metrics.starts_with("cycle,log_likelihood,log_prior"));
    assert_eq!(metrics.lines().count(), 5);

    let manifest = RunManifest::load(&summary.manifest_path.unwrap()).unwrap();
    assert_eq!(manifest.final_hash, summary.final_hash);
    assert_eq!(manifest.samples_written, 2);
    assert_eq!(manifest.config, config);
}

#[test]
fn identical_seeds_reproduce_the_final_state() {
    let config = small_config(None);
    let first = run(&config, sample_alignment(), StarTreeEngine::new(2)).unwrap();
    let second = run(&config, sample_alignment(), StarTreeEngine::new(2)).unwrap();
    assert_eq!(first.final_hash, second.final_hash);
    assert_eq!(first.samples, second.samples);
    assert!(first.chain_path.is_none());
    assert!(first.manifest_path.is_none());
}

#[test]
fn run_rejects_zero_workers_before_spawning() {
    let mut config = small_config(None);
    config.workers = 0;
    let err = run(&config, sample_alignment(), StarTreeEngine::new(2)).unwrap_err();
    assert_eq!(err.info().code, "config-invalid");
}

#[test]
fn stepping_session_restores_every_site() {
    let config = small_config(None);
    let request = SteppingRequest {
        repeats: 3,
        restore: true,
        empirical_frac: Some(1.0),
        cell_cutoff: None,
    };
    let estimate = run_stepping(
        &config,
        sample_alignment(),
        StarTreeEngine::new(2),
        None,
        &request,
    )
    .unwrap();
    assert_eq!(estimate.sites.len(), 10);
    let sum: f64 = estimate.sites.iter().map(|(_, logl)| logl).sum();
    assert!((sum - estimate.total).abs() < 1e-9);
    assert!(estimate.sites.iter().all(|(_, logl)| *logl < 0.0));
}

#[test]
fn empirical_prior_file_is_installed() {
    let dir = tempdir().unwrap();
    let prior_path = dir.path().join("prior.posthyper");
    let mut text = String::from("2 2\n");
    text.push_str(&"1 1\n".repeat(4));
    text.push_str(&"1 1\n".repeat(6));
    text.push_str(&"1 10\n".repeat(3));
    fs::write(&prior_path, text).unwrap();

    let mut config = small_config(None);
    config.cycles = 2;
    config.model.empirical_prior = Some(prior_path);
    let summary = run(&config, sample_alignment(), StarTreeEngine::new(2)).unwrap();
    assert!(summary
        .samples
        .iter()
        .all(|sample| sample.log_prior.is_some_and(f64::is_finite)));

    config.model.empirical_prior = Some(dir.path().join("missing.posthyper"));
    let err = run(&config, sample_alignment(), StarTreeEngine::new(2)).unwrap_err();
    assert_eq!(err.info().code, "empirical-prior-open");
}
