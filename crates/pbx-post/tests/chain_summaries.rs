use std::fs;
use std::path::{Path, PathBuf};

use pbx_core::RngHandle;
use pbx_mcmc::{dimensions_for, ChainWriter, JsonLinesChain};
use pbx_model::{
    Alignment, AlignmentDocument, EmpiricalPrior, GlobalParameterState, ModelFlags,
    StarTreeEngine,
};
use pbx_post::{
    ancestral, for_each_sample, post_hyper, relrates, site_profiles, site_rates, write_report,
    SampleSchedule,
};
use tempfile::tempdir;

fn sample_alignment() -> Alignment {
    Alignment::from_document(&AlignmentDocument {
        alphabet: "ACGT".into(),
        taxa: vec!["a".into(), "b".into(), "c".into()],
        sequences: vec!["ACGTAC".into(), "ACGAAC".into(), "TCGTAG".into()],
    })
    .unwrap()
}

fn snapshot(data: &Alignment, seed: u64) -> GlobalParameterState {
    let dims = dimensions_for(data, 3);
    let mut rng = RngHandle::from_seed(seed);
    GlobalParameterState::initial(&dims, &mut rng).unwrap()
}

/// Writes `n` snapshots; alpha alternates between 1 and 3.
fn write_chain(dir: &Path, n: usize) -> PathBuf {
    let data = sample_alignment();
    let path = dir.join("run.chain");
    let mut writer = ChainWriter::create(&path).unwrap();
    for i in 0..n {
        let mut state = snapshot(&data, i as u64);
        state.alpha = if i % 2 == 0 { 1.0 } else { 3.0 };
        state.exchangeabilities = vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        writer.append(&state).unwrap();
    }
    writer.finish().unwrap()
}

#[test]
fn schedule_defaults_to_a_fifth_burn_in() {
    let schedule = SampleSchedule::resolve(10, None, 3, None).unwrap();
    assert_eq!(schedule.burnin, 2);
    assert_eq!(schedule.until, 10);
    assert_eq!(schedule.positions().collect::<Vec<_>>(), vec![2, 5, 8]);
}

#[test]
fn zero_stride_is_rejected() {
    let err = SampleSchedule::resolve(10, None, 0, None).unwrap_err();
    assert_eq!(err.info().code, "schedule-every");
}

#[test]
fn walk_visits_the_scheduled_positions() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 10);
    let schedule = SampleSchedule::resolve(10, Some(1), 4, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let mut visited = Vec::new();
    let count = for_each_sample(&mut reader, &schedule, |position, state| {
        visited.push((position, state.alpha));
        Ok(())
    })
    .unwrap();
    assert_eq!(count, 3);
    assert_eq!(visited, vec![(1, 3.0), (5, 3.0), (9, 3.0)]);
}

#[test]
fn walk_stops_at_the_end_of_a_short_chain() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 4);
    let schedule = SampleSchedule::resolve(4, Some(0), 1, Some(100)).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let count = for_each_sample(&mut reader, &schedule, |_, _| Ok(())).unwrap();
    assert_eq!(count, 4);
}

#[test]
fn burn_in_past_the_chain_gives_an_empty_sample() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 5);
    let schedule = SampleSchedule::resolve(5, Some(50), 1, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let err = relrates(&mut reader, &schedule, &['A', 'C', 'G', 'T']).unwrap_err();
    assert_eq!(err.info().code, "empty-sample");
    assert!(err.info().hint.is_some());
}

#[test]
fn relative_rates_are_rescaled_to_mean_one() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 6);
    let schedule = SampleSchedule::resolve(6, Some(0), 1, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let rates = relrates(&mut reader, &schedule, &['A', 'C', 'G', 'T']).unwrap();
    assert_eq!(rates.sample_size, 6);
    let expected = [0.5, 1.0, 1.5, 0.5, 1.0, 1.5];
    for (value, want) in rates.values.iter().zip(expected) {
        assert!((value - want).abs() < 1e-12);
    }

    let written = write_report(&dir.path().join("run"), &rates).unwrap();
    assert_eq!(written, dir.path().join("run.meanrr"));
    assert!(!fs::read_to_string(written).unwrap().is_empty());
}

#[test]
fn site_profiles_are_probability_vectors() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 5);
    let schedule = SampleSchedule::resolve(5, Some(0), 1, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let profiles = site_profiles(&mut reader, &schedule, &['A', 'C', 'G', 'T'], 6).unwrap();
    assert_eq!(profiles.profiles.len(), 6);
    for profile in &profiles.profiles {
        assert!((profile.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    let written = write_report(&dir.path().join("run"), &profiles).unwrap();
    let text = fs::read_to_string(written).unwrap();
    assert_eq!(text.lines().filter(|line| line.starts_with(char::is_numeric)).count(), 6);
}

#[test]
fn site_count_mismatch_is_reported() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 3);
    let schedule = SampleSchedule::resolve(3, Some(0), 1, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let err = site_profiles(&mut reader, &schedule, &['A', 'C', 'G', 'T'], 9).unwrap_err();
    assert_eq!(err.info().code, "chain-dimensions");
}

#[test]
fn posterior_hyper_matches_moments_and_reads_back() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 8);
    let schedule = SampleSchedule::resolve(8, Some(0), 1, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let hyper = post_hyper(&mut reader, &schedule, &ModelFlags::default()).unwrap();
    assert_eq!(hyper.sample_size, 8);

    // alpha alternates 1 and 3: mean 2, variance 1
    let (shape, rate) = hyper.prior.alpha;
    assert!((shape - 4.0).abs() < 1e-9);
    assert!((rate - 2.0).abs() < 1e-9);
    assert_eq!(hyper.prior.branch_lengths[0], (0.0, 0.0));

    // constant traces still give finite pairs
    let weights = hyper.prior.dirichlet_weights.as_ref().unwrap();
    assert!(weights.iter().all(|(s, r)| s.is_finite() && r.is_finite() && *s > 0.0));
    assert!(hyper.prior.frequencies.is_none());

    let data = sample_alignment();
    let dims = dimensions_for(&data, 3);
    let text = hyper.prior.to_text();
    let parsed = EmpiricalPrior::parse(text.as_bytes(), hyper.prior.layout(), &dims).unwrap();
    assert_eq!(parsed, hyper.prior);

    let written = write_report(&dir.path().join("run"), &hyper).unwrap();
    assert_eq!(fs::read_to_string(written).unwrap(), text);
}

#[test]
fn single_fixed_component_fits_frequencies() {
    let dir = tempdir().unwrap();
    let data = sample_alignment();
    let path = dir.path().join("fixed.chain");
    let mut writer = ChainWriter::create(&path).unwrap();
    for i in 0..4 {
        let mut state = snapshot(&data, 40 + i);
        state.component_count = 1;
        state.allocation = vec![0; 6];
        writer.append(&state).unwrap();
    }
    writer.finish().unwrap();

    let flags = ModelFlags {
        fix_components: true,
        ..ModelFlags::default()
    };
    let schedule = SampleSchedule::resolve(4, Some(0), 1, None).unwrap();
    let mut reader = JsonLinesChain::open(&path).unwrap();
    let hyper = post_hyper(&mut reader, &schedule, &flags).unwrap();
    let frequencies = hyper.prior.frequencies.unwrap();
    assert_eq!(frequencies.len(), 4);
    assert!(frequencies.iter().all(|c| c.is_finite() && *c > 0.0));
}

#[test]
fn site_rates_and_ancestral_states_run_locally() {
    let dir = tempdir().unwrap();
    let path = write_chain(dir.path(), 4);
    let data = sample_alignment();
    let schedule = SampleSchedule::resolve(4, Some(0), 1, None).unwrap();
    let mut engine = StarTreeEngine::new(4);

    let mut reader = JsonLinesChain::open(&path).unwrap();
    let rates = site_rates(&mut reader, &schedule, &mut engine, &data).unwrap();
    assert_eq!(rates.rates.len(), 6);
    assert!(rates.rates.iter().all(|r| r.is_finite() && *r > 0.0));

    let mut reader = JsonLinesChain::open(&path).unwrap();
    let states = ancestral(&mut reader, &schedule, &mut engine, &data, data.alphabet()).unwrap();
    assert_eq!(states.sample_size, 4);
    for row in &states.probabilities {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
    // column 2 is all C
    assert!(states.probabilities[1][1] > 0.5);

    let written = write_report(&dir.path().join("run"), &states).unwrap();
    let text = fs::read_to_string(written).unwrap();
    assert!(text.starts_with("site\tA\tC\tG\tT"));
}
