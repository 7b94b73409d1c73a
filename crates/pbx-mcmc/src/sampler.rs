use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pbx_core::{PbxError, RngHandle};
use pbx_model::{GlobalParameterState, LikelihoodEngine, SequenceStore};
use pbx_wire::encode;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::ChainWriter;
use crate::config::{OutputConfig, RunConfig};
use crate::coordinator::Coordinator;
use crate::determinism;
use crate::ensemble::{self, EnsembleSettings};
use crate::manifest::RunManifest;
use crate::metrics::{MetricSample, MetricsRecorder, RunCoverage};
use crate::moves;
use crate::stepping::{estimate_marginal, MarginalEstimate};

/// Summary returned by a completed sampler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Cycles executed.
    pub cycles: usize,
    /// Snapshots appended to the chain.
    pub samples_written: usize,
    /// Total log-likelihood after the last cycle.
    pub final_log_likelihood: f64,
    /// Accepted over proposed rate-shape updates.
    pub alpha_acceptance: f64,
    /// Coverage aggregated over every cycle.
    pub coverage: RunCoverage,
    /// Canonical hash of the terminal parameter vector.
    pub final_hash: String,
    /// Terminal canonical state.
    pub final_state: GlobalParameterState,
    /// Chain written during the run.
    pub chain_path: Option<PathBuf>,
    /// Metrics CSV written during the run.
    pub metrics_path: Option<PathBuf>,
    /// Manifest path, if emitted.
    pub manifest_path: Option<PathBuf>,
    /// Per-cycle metrics (useful for tests/diagnostics).
    pub samples: Vec<MetricSample>,
}

#[derive(Default)]
struct ResolvedOutput {
    chain: Option<PathBuf>,
    metrics: Option<PathBuf>,
    manifest: Option<PathBuf>,
}

fn resolve_output_paths(config: &OutputConfig) -> ResolvedOutput {
    match &config.run_directory {
        None => ResolvedOutput::default(),
        Some(dir) => ResolvedOutput {
            chain: Some(dir.join(&config.chain_file)),
            metrics: Some(dir.join(&config.metrics_file)),
            manifest: Some(dir.join(&config.manifest_file)),
        },
    }
}

struct Progress {
    recorder: MetricsRecorder,
    samples_written: usize,
    final_log_likelihood: f64,
    alpha_accepted: usize,
}

/// Runs a full sampler on `data`: spawns the ensemble, performs
/// `config.cycles` cycles, writes the chain, metrics and manifest when a run
/// directory is configured, and shuts the ensemble down.
pub fn run<E, D>(config: &RunConfig, data: D, engine: E) -> Result<RunSummary, PbxError>
where
    E: LikelihoodEngine + Clone + 'static,
    D: SequenceStore + Clone + 'static,
{
    config.validate()?;
    let seed = config.seed_policy.master_seed;
    let mut coordinator = start(config, data, engine, None)?;
    let output = resolve_output_paths(&config.output);
    let progress = match drive(&mut coordinator, config, output.chain.as_deref()) {
        Ok(progress) => progress,
        Err(err) => return Err(coordinator.abort(err)),
    };
    let final_state = coordinator.state().clone();
    coordinator.shutdown()?;

    let final_hash = encode(&final_state).canonical_hash();
    if let Some(path) = &output.metrics {
        progress.recorder.write_csv(path)?;
    }
    if let Some(path) = &output.manifest {
        RunManifest {
            config: config.clone(),
            master_seed: seed,
            seed_label: config.seed_policy.label.clone(),
            final_hash: final_hash.clone(),
            samples_written: progress.samples_written,
            chain_file: output.chain.as_ref().map(|_| config.output.chain_file.clone()),
            metrics_file: output.metrics.as_ref().map(|_| config.output.metrics_file.clone()),
            finished_at: Utc::now(),
        }
        .write(path)?;
    }
    let proposed_alpha = config.moves.alpha_reps * config.cycles;
    info!(
        cycles = config.cycles,
        samples = progress.samples_written,
        hash = %final_hash,
        "run complete"
    );
    Ok(RunSummary {
        cycles: config.cycles,
        samples_written: progress.samples_written,
        final_log_likelihood: progress.final_log_likelihood,
        alpha_acceptance: if proposed_alpha > 0 {
            progress.alpha_accepted as f64 / proposed_alpha as f64
        } else {
            0.0
        },
        coverage: progress.recorder.coverage(),
        final_hash,
        final_state,
        chain_path: output.chain,
        metrics_path: output.metrics,
        manifest_path: output.manifest,
        samples: progress.recorder.samples().to_vec(),
    })
}

/// Options of a stepping-stone session.
#[derive(Debug, Clone, PartialEq)]
pub struct SteppingRequest {
    /// Repeats forwarded (split between workers) for every site.
    pub repeats: usize,
    /// Leave the canonical allocation untouched.
    pub restore: bool,
    /// Fraction of sites kept unmasked, in site-rank order.
    pub empirical_frac: Option<f64>,
    /// Number of cells kept unmasked, in cell-rank order.
    pub cell_cutoff: Option<usize>,
}

/// Spawns an ensemble at `start` (or a fresh state), prepares stepping,
/// applies the requested masks and evaluates every site.
pub fn run_stepping<E, D>(
    config: &RunConfig,
    data: D,
    engine: E,
    start_state: Option<GlobalParameterState>,
    request: &SteppingRequest,
) -> Result<MarginalEstimate, PbxError>
where
    E: LikelihoodEngine + Clone + 'static,
    D: SequenceStore + Clone + 'static,
{
    config.validate()?;
    let n_sites = data.n_sites();
    let mut coordinator = start(config, data, engine, start_state)?;
    let session = |coordinator: &mut Coordinator| -> Result<MarginalEstimate, PbxError> {
        coordinator.prepare_stepping()?;
        if let Some(frac) = request.empirical_frac {
            coordinator.set_empirical_frac(frac)?;
        }
        if let Some(cutoff) = request.cell_cutoff {
            coordinator.set_stepping_fraction(cutoff)?;
        }
        estimate_marginal(coordinator, 0..n_sites, request.repeats, request.restore)
    };
    match session(&mut coordinator) {
        Ok(estimate) => {
            coordinator.shutdown()?;
            Ok(estimate)
        }
        Err(err) => Err(coordinator.abort(err)),
    }
}

fn start<E, D>(
    config: &RunConfig,
    data: D,
    engine: E,
    start_state: Option<GlobalParameterState>,
) -> Result<Coordinator, PbxError>
where
    E: LikelihoodEngine + Clone + 'static,
    D: SequenceStore + Clone + 'static,
{
    let seed = config.seed_policy.master_seed;
    let dims = ensemble::dimensions_for(&data, config.model.max_components);
    let state = match start_state {
        Some(state) => state,
        None => {
            let mut rng = RngHandle::from_seed(determinism::initial_state_seed(seed));
            GlobalParameterState::initial(&dims, &mut rng)?
        }
    };
    let settings = EnsembleSettings {
        workers: config.workers,
        master_seed: seed,
        flags: config.model.flags,
    };
    let mut coordinator = ensemble::spawn(&settings, dims, state, data, engine)?;
    if let Some(path) = &config.model.empirical_prior {
        if let Err(err) = install_prior(&mut coordinator, path) {
            return Err(coordinator.abort(err));
        }
    }
    Ok(coordinator)
}

fn install_prior(coordinator: &mut Coordinator, path: &Path) -> Result<(), PbxError> {
    let file = File::open(path).map_err(|err| PbxError::io("empirical-prior-open", err, path))?;
    coordinator.set_empirical_prior(file)?;
    info!(path = %path.display(), "empirical prior installed");
    Ok(())
}

fn drive(
    coordinator: &mut Coordinator,
    config: &RunConfig,
    chain_path: Option<&Path>,
) -> Result<Progress, PbxError> {
    let seed = config.seed_policy.master_seed;
    let moves_config = &config.moves;
    let mut chain = chain_path.map(ChainWriter::create).transpose()?;
    let mut progress = Progress {
        recorder: MetricsRecorder::new(),
        samples_written: 0,
        final_log_likelihood: 0.0,
        alpha_accepted: 0,
    };
    for cycle in 0..config.cycles {
        let mut rng = RngHandle::from_seed(determinism::cycle_seed(seed, cycle));

        coordinator.realloc_move(moves_config.realloc_reps)?;
        moves::resample_weights(coordinator.state_mut(), &mut rng)?;
        let proposed_profiles = coordinator.state().component_count * moves_config.profile_reps;
        let accepted_profiles =
            coordinator.profile_move(moves_config.profile_reps, moves_config.profile_step)?;

        let prior = coordinator.empirical_prior().cloned();
        moves::dirichlet_weight_move(coordinator.state_mut(), prior.as_ref(), 1.0, &mut rng);
        if !coordinator.flags().fix_exchangeabilities {
            let rr = coordinator.update_rr_suff_stats()?;
            moves::gibbs_exchangeabilities(coordinator.state_mut(), &rr, prior.as_ref(), &mut rng)?;
        }
        let rates = coordinator.update_rate_suff_stats()?;
        moves::rescale_tree(coordinator.state_mut(), &rates, &mut rng)?;
        coordinator.broadcast_parameters()?;

        let accepted_alpha = moves::alpha_move(
            coordinator,
            moves_config.alpha_reps,
            moves_config.alpha_step,
            &mut rng,
        )?;
        progress.alpha_accepted += accepted_alpha;

        let log_likelihood: f64 = coordinator.compute_site_log_likelihoods()?.iter().sum();
        let state = coordinator.state();
        let log_prior = prior.as_ref().map(|prior| prior.log_density(state));

        if let Some(writer) = chain.as_mut() {
            if cycle >= config.burn_in && (cycle - config.burn_in) % config.thinning == 0 {
                writer.append(state)?;
                progress.samples_written = writer.written();
            }
        }
        let occupied_components = state.occupancy().iter().filter(|&&n| n > 0).count();
        info!(
            cycle,
            logl = log_likelihood,
            occupied = occupied_components,
            alpha = state.alpha,
            "cycle complete"
        );
        progress.recorder.push_sample(
            MetricSample {
                cycle,
                log_likelihood,
                log_prior,
                occupied_components,
                accepted_profiles,
                proposed_profiles,
                accepted_alpha,
                alpha: state.alpha,
                tree_length: state.branch_lengths.iter().sum(),
            },
            &state.allocation,
        );
        progress.final_log_likelihood = log_likelihood;
    }
    if let Some(writer) = chain {
        writer.finish()?;
    }
    Ok(progress)
}
