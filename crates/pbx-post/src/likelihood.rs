//! Analyses that need a worker ensemble: cross-validation, site
//! log-likelihoods and posterior predictive checks. Each scheduled snapshot
//! is broadcast to the workers before its round.

use std::io::{self, Write};

use pbx_core::errors::ErrorInfo;
use pbx_core::{derive_substream_seed, PbxError, RngHandle};
use pbx_mcmc::{dimensions_for, spawn, ChainReader, Coordinator, EnsembleSettings};
use pbx_model::{GlobalParameterState, LikelihoodEngine, ModelFlags, SequenceStore};
use tracing::info;

use crate::local::check_sites;
use crate::report::Report;
use crate::schedule::{for_each_sample, require_samples, SampleSchedule};

const PREDICTIVE_STREAM: u64 = 0x9D_0000;

/// Ensemble settings of the likelihood analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleOptions {
    /// Number of workers; at least one is required.
    pub workers: usize,
    /// Master seed of the ensemble streams.
    pub master_seed: u64,
    /// Model flags the chain was produced with.
    pub flags: ModelFlags,
}

/// Rejects likelihood analyses without workers before anything starts.
pub fn require_workers(options: &EnsembleOptions) -> Result<(), PbxError> {
    if options.workers == 0 {
        return Err(PbxError::Config(
            ErrorInfo::new("likelihood-needs-workers", "likelihood analyses need workers")
                .with_context("workers", options.workers)
                .with_hint("run with --workers 1 or more (two or more participants)"),
        ));
    }
    Ok(())
}

/// Coordinator started on the first snapshot and reused for the others.
struct SampleEnsemble<D, E> {
    options: EnsembleOptions,
    data: D,
    engine: E,
    coordinator: Option<Coordinator>,
}

impl<D, E> SampleEnsemble<D, E>
where
    D: SequenceStore + Clone + 'static,
    E: LikelihoodEngine + Clone + 'static,
{
    fn new(options: EnsembleOptions, data: D, engine: E) -> Self {
        Self {
            options,
            data,
            engine,
            coordinator: None,
        }
    }

    /// Installs `state` on every participant and runs `round`.
    fn round<T>(
        &mut self,
        state: GlobalParameterState,
        round: impl FnOnce(&mut Coordinator) -> Result<T, PbxError>,
    ) -> Result<T, PbxError> {
        let mut coordinator = match self.coordinator.take() {
            Some(coordinator) => coordinator,
            None => {
                let dims = dimensions_for(&self.data, state.components.len());
                let settings = EnsembleSettings {
                    workers: self.options.workers,
                    master_seed: self.options.master_seed,
                    flags: self.options.flags,
                };
                spawn(&settings, dims, state.clone(), self.data.clone(), self.engine.clone())?
            }
        };
        match install_and_run(&mut coordinator, state, round) {
            Ok(value) => {
                self.coordinator = Some(coordinator);
                Ok(value)
            }
            Err(err) => Err(coordinator.abort(err)),
        }
    }

    fn finish(self, outcome: Result<usize, PbxError>) -> Result<usize, PbxError> {
        match (outcome, self.coordinator) {
            (Ok(samples), Some(coordinator)) => {
                coordinator.shutdown()?;
                Ok(samples)
            }
            (Ok(samples), None) => Ok(samples),
            (Err(err), Some(coordinator)) => Err(coordinator.abort(err)),
            (Err(err), None) => Err(err),
        }
    }
}

fn install_and_run<T>(
    coordinator: &mut Coordinator,
    state: GlobalParameterState,
    round: impl FnOnce(&mut Coordinator) -> Result<T, PbxError>,
) -> Result<T, PbxError> {
    *coordinator.state_mut() = state;
    coordinator.broadcast_parameters()?;
    round(coordinator)
}

/// Cross-validation score of every sample on held-out data.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    /// Chain position and score of every sample.
    pub scores: Vec<(usize, f64)>,
    /// Arithmetic mean of the scores.
    pub mean: f64,
}

impl Report for CrossValidation {
    fn extension(&self) -> &'static str {
        "cv"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        for (position, score) in &self.scores {
            writeln!(out, "{position}\t{score}")?;
        }
        writeln!(out)?;
        writeln!(out, "mean\t{}", self.mean)
    }
}

/// Scores each sample on `test_data`. The test alignment has its own site
/// count, so every snapshot is evaluated with a fresh all-zero allocation;
/// the score sums over all components and does not depend on it.
pub fn cross_validation<R, D, E>(
    reader: &mut R,
    schedule: &SampleSchedule,
    options: &EnsembleOptions,
    test_data: D,
    engine: E,
) -> Result<CrossValidation, PbxError>
where
    R: ChainReader + ?Sized,
    D: SequenceStore + Clone + 'static,
    E: LikelihoodEngine + Clone + 'static,
{
    require_workers(options)?;
    let n_sites = test_data.n_sites();
    let dim = test_data.dim();
    let mut ensemble = SampleEnsemble::new(*options, test_data, engine);
    let mut scores = Vec::new();
    let outcome = for_each_sample(reader, schedule, |position, mut state| {
        if state.dirichlet_weights.len() != dim {
            return Err(PbxError::Data(
                ErrorInfo::new("chain-dimensions", "snapshot alphabet differs from the test data")
                    .with_context("position", position),
            ));
        }
        state.allocation = vec![0; n_sites];
        let score = ensemble.round(state, |coordinator| coordinator.compute_cv_score())?;
        scores.push((position, score));
        Ok(())
    });
    let sample_size = ensemble.finish(outcome)?;
    require_samples(sample_size, schedule)?;
    let mean = scores.iter().map(|(_, s)| s).sum::<f64>() / sample_size as f64;
    info!(samples = sample_size, mean, "cross-validation complete");
    Ok(CrossValidation { scores, mean })
}

/// Posterior mean log-likelihood of every site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteLogLikelihoods {
    /// Mean log-likelihood per site.
    pub mean: Vec<f64>,
    /// Number of samples averaged.
    pub sample_size: usize,
}

impl Report for SiteLogLikelihoods {
    fn extension(&self) -> &'static str {
        "sitelogl"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        for (site, value) in self.mean.iter().enumerate() {
            writeln!(out, "{}\t{value}", site + 1)?;
        }
        writeln!(out)?;
        writeln!(out, "total\t{}", self.mean.iter().sum::<f64>())
    }
}

/// Averages the per-site log-likelihoods gathered from the workers.
pub fn site_log_likelihood<R, D, E>(
    reader: &mut R,
    schedule: &SampleSchedule,
    options: &EnsembleOptions,
    data: D,
    engine: E,
) -> Result<SiteLogLikelihoods, PbxError>
where
    R: ChainReader + ?Sized,
    D: SequenceStore + Clone + 'static,
    E: LikelihoodEngine + Clone + 'static,
{
    require_workers(options)?;
    let mut mean = vec![0.0; data.n_sites()];
    let probe = data.clone();
    let mut ensemble = SampleEnsemble::new(*options, data, engine);
    let outcome = for_each_sample(reader, schedule, |position, state| {
        check_sites(&state, &probe, position)?;
        let logls = ensemble.round(state, |coordinator| {
            coordinator.compute_site_log_likelihoods()
        })?;
        for (sum, value) in mean.iter_mut().zip(logls) {
            *sum += value;
        }
        Ok(())
    });
    let sample_size = ensemble.finish(outcome)?;
    require_samples(sample_size, schedule)?;
    mean.iter_mut().for_each(|v| *v /= sample_size as f64);
    Ok(SiteLogLikelihoods { mean, sample_size })
}

/// Posterior predictive check of the site diversity statistic: the mean
/// number of distinct observed states per site.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorPredictive {
    /// Statistic on the observed data.
    pub observed: f64,
    /// Statistic on one replicate per sample.
    pub replicates: Vec<f64>,
    /// Mean of the replicates.
    pub mean: f64,
    /// Standard deviation of the replicates.
    pub sd: f64,
    /// Fraction of replicates at least as diverse as the data.
    pub p_value: f64,
}

impl Report for PosteriorPredictive {
    fn extension(&self) -> &'static str {
        "ppred"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "observed\t{}", self.observed)?;
        writeln!(out, "mean\t{}", self.mean)?;
        writeln!(out, "sd\t{}", self.sd)?;
        writeln!(out, "pp\t{}", self.p_value)?;
        writeln!(out)?;
        for value in &self.replicates {
            writeln!(out, "{value}")?;
        }
        Ok(())
    }
}

/// Mean number of distinct observed states per site.
pub fn site_diversity(data: &dyn SequenceStore) -> f64 {
    let columns = (0..data.n_sites()).map(|site| {
        (0..data.n_taxa())
            .filter_map(|taxon| data.state(taxon, site))
            .collect::<Vec<_>>()
    });
    diversity(columns, data.dim(), data.n_sites())
}

fn diversity<I: Iterator<Item = Vec<usize>>>(columns: I, dim: usize, n_sites: usize) -> f64 {
    if n_sites == 0 {
        return 0.0;
    }
    let mut seen = vec![false; dim];
    let mut total = 0usize;
    for column in columns {
        seen.iter_mut().for_each(|flag| *flag = false);
        for state in column {
            if let Some(flag) = seen.get_mut(state) {
                *flag = true;
            }
        }
        total += seen.iter().filter(|&&flag| flag).count();
    }
    total as f64 / n_sites as f64
}

/// For each sample the workers resample the allocations given the data, then
/// one replicate alignment is simulated under the resulting state.
pub fn posterior_predictive<R, D, E>(
    reader: &mut R,
    schedule: &SampleSchedule,
    options: &EnsembleOptions,
    data: D,
    engine: E,
) -> Result<PosteriorPredictive, PbxError>
where
    R: ChainReader + ?Sized,
    D: SequenceStore + Clone + 'static,
    E: LikelihoodEngine + Clone + 'static,
{
    require_workers(options)?;
    let observed = site_diversity(&data);
    let (n_sites, n_taxa, dim) = (data.n_sites(), data.n_taxa(), data.dim());
    let probe = data.clone();
    let mut simulator = engine.clone();
    let mut rng = RngHandle::from_seed(derive_substream_seed(
        options.master_seed,
        PREDICTIVE_STREAM,
    ));
    let mut ensemble = SampleEnsemble::new(*options, data, engine);
    let mut replicates = Vec::new();
    let outcome = for_each_sample(reader, schedule, |position, state| {
        check_sites(&state, &probe, position)?;
        let resampled = ensemble.round(state, |coordinator| {
            coordinator.compute_site_log_likelihoods()?;
            Ok(coordinator.state().clone())
        })?;
        simulator.update_matrices(&resampled);
        let columns =
            (0..n_sites).map(|site| simulator.simulate_site(&resampled, site, n_taxa, &mut rng));
        replicates.push(diversity(columns, dim, n_sites));
        Ok(())
    });
    let sample_size = ensemble.finish(outcome)?;
    require_samples(sample_size, schedule)?;

    let n = sample_size as f64;
    let mean = replicates.iter().sum::<f64>() / n;
    let sd = (replicates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    let p_value = replicates.iter().filter(|&&r| r >= observed).count() as f64 / n;
    info!(samples = sample_size, observed, mean, p_value, "posterior predictive complete");
    Ok(PosteriorPredictive {
        observed,
        replicates,
        mean,
        sd,
        p_value,
    })
}
