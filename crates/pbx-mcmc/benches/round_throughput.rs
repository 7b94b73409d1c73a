use criterion::{criterion_group, criterion_main, Criterion};
use pbx_core::RngHandle;
use pbx_model::{Alignment, GlobalParameterState, ModelFlags, StarTreeEngine};

use pbx_mcmc::{dimensions_for, spawn, EnsembleSettings};

fn sample_alignment() -> Alignment {
    let rows = (0..8)
        .map(|taxon| (0..200).map(|site| Some((site * (taxon + 1) / 7) % 4)).collect())
        .collect();
    let taxa = (0..8).map(|taxon| format!("t{taxon}")).collect();
    Alignment::from_states("ACGT", taxa, rows).unwrap()
}

fn bench_rounds(c: &mut Criterion) {
    let data = sample_alignment();
    let dims = dimensions_for(&data, 6);
    let mut rng = RngHandle::from_seed(42);
    let state = GlobalParameterState::initial(&dims, &mut rng).unwrap();
    let settings = EnsembleSettings {
        workers: 4,
        master_seed: 42,
        flags: ModelFlags::default(),
    };
    let mut coordinator = spawn(&settings, dims, state, data, StarTreeEngine::new(4)).unwrap();

    c.bench_function("broadcast_and_cv_round", |b| {
        b.iter(|| {
            coordinator.broadcast_parameters().unwrap();
            coordinator.compute_cv_score().unwrap()
        })
    });
    coordinator.shutdown().unwrap();
}

criterion_group!(benches, bench_rounds);
criterion_main!(benches);
