use std::thread;

use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_model::{Dimensions, GlobalParameterState, LikelihoodEngine, ModelFlags, SequenceStore};
use pbx_wire::rendezvous;
use tracing::info;

use crate::coordinator::Coordinator;
use crate::handlers::HandlerRegistry;
use crate::worker::Worker;

/// Settings every participant of an ensemble agrees on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleSettings {
    /// Number of workers to spawn.
    pub workers: usize,
    /// Master seed from which every participant derives its stream.
    pub master_seed: u64,
    /// Model flags.
    pub flags: ModelFlags,
}

/// Derives the shared dimensions for `data` under a model with
/// `max_components` component slots and one branch per taxon.
pub fn dimensions_for(data: &dyn SequenceStore, max_components: usize) -> Dimensions {
    Dimensions::new(
        data.n_sites(),
        data.n_taxa(),
        data.n_taxa(),
        data.dim(),
        max_components,
    )
}

/// Spawns one thread per worker, each with its own copy of `data` and
/// `engine`, and returns the coordinator after an initial parameter broadcast.
pub fn spawn<E, D>(
    settings: &EnsembleSettings,
    dims: Dimensions,
    state: GlobalParameterState,
    data: D,
    engine: E,
) -> Result<Coordinator, PbxError>
where
    E: LikelihoodEngine + Clone + 'static,
    D: SequenceStore + Clone + 'static,
{
    if settings.workers == 0 {
        return Err(PbxError::Config(
            ErrorInfo::new("no-workers", "an ensemble needs at least one worker")
                .with_hint("run with two or more participants"),
        ));
    }
    if (data.n_sites(), data.n_taxa(), data.dim()) != (dims.n_sites, dims.n_taxa, dims.dim) {
        return Err(PbxError::Data(
            ErrorInfo::new("data-dimensions", "alignment does not match the model dimensions")
                .with_context("n_sites", data.n_sites())
                .with_context("n_taxa", data.n_taxa())
                .with_context("dim", data.dim()),
        ));
    }
    state.validate(&dims)?;

    let (link, worker_links) = rendezvous(settings.workers);
    let mut handles = Vec::with_capacity(settings.workers);
    for worker_link in worker_links {
        let rank = worker_link.rank();
        let worker_state = state.clone();
        let worker_data = data.clone();
        let worker_engine = engine.clone();
        let n_workers = settings.workers;
        let (flags, seed) = (settings.flags, settings.master_seed);
        let handle = thread::Builder::new()
            .name(format!("pbx-worker-{rank}"))
            .spawn(move || {
                let worker = Worker::new(
                    worker_link,
                    n_workers,
                    dims,
                    flags,
                    worker_state,
                    Box::new(worker_data),
                    worker_engine,
                    seed,
                );
                worker.run(&HandlerRegistry::cat_gtr())
            })
            .map_err(|err| {
                PbxError::Protocol(
                    ErrorInfo::new("worker-spawn", err.to_string()).with_context("rank", rank),
                )
            })?;
        handles.push(handle);
    }
    info!(
        workers = settings.workers,
        sites = dims.n_sites,
        components = dims.max_components,
        "ensemble started"
    );

    let mut coordinator = Coordinator::new(
        link,
        dims,
        settings.flags,
        state,
        Box::new(data),
        settings.master_seed,
        handles,
    );
    match coordinator.broadcast_parameters() {
        Ok(()) => Ok(coordinator),
        Err(err) => Err(coordinator.abort(err)),
    }
}
