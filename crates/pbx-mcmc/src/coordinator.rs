use std::io::Read;
use std::ops::Range;
use std::thread::JoinHandle;

use pbx_core::errors::ErrorInfo;
use pbx_core::{partition, PbxError, RngHandle};
use pbx_model::{
    Dimensions, EmpiricalLayout, EmpiricalPrior, GlobalParameterState, ModelFlags, SequenceStore,
};
use pbx_wire::{encode, CoordinatorLink, Packet, Signal};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::determinism;
use crate::masking::{DataSnapshot, SteppingRanks};
use crate::resample::component_range;
use crate::stepping::{check_candidate, combine_partials, repeats_per_worker, SteppingOutcome};
use crate::worker::{already_prepared, WorkerLocalReplica};

/// Per-site rate sufficient statistics assembled from every partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSuffStats {
    /// Substitution count of every site.
    pub counts: Vec<f64>,
    /// Exposure of every site.
    pub betas: Vec<f64>,
}

/// Exchangeability sufficient statistics summed over all sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrSuffStats {
    /// Substitution count per exchangeability pair.
    pub counts: Vec<f64>,
    /// Exposure per exchangeability pair.
    pub betas: Vec<f64>,
}

pub(crate) type WorkerHandle = JoinHandle<Result<WorkerLocalReplica, PbxError>>;

/// Sole owner of the canonical [`GlobalParameterState`] and sole issuer of
/// signals. Every public operation is one protocol round with all workers.
pub struct Coordinator {
    link: CoordinatorLink,
    dims: Dimensions,
    flags: ModelFlags,
    state: GlobalParameterState,
    data: Box<dyn SequenceStore>,
    master_seed: u64,
    rng: RngHandle,
    partitions: Vec<Range<usize>>,
    backup: Option<DataSnapshot>,
    ranks: Option<SteppingRanks>,
    empirical_frac: f64,
    empirical_prior: Option<EmpiricalPrior>,
    workers: Vec<WorkerHandle>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        link: CoordinatorLink,
        dims: Dimensions,
        flags: ModelFlags,
        state: GlobalParameterState,
        data: Box<dyn SequenceStore>,
        master_seed: u64,
        workers: Vec<WorkerHandle>,
    ) -> Self {
        let partitions = partition(dims.n_sites, link.n_workers());
        Self {
            link,
            dims,
            flags,
            state,
            data,
            master_seed,
            rng: RngHandle::from_seed(determinism::rank_seed(master_seed, 0)),
            partitions,
            backup: None,
            ranks: None,
            empirical_frac: 1.0,
            empirical_prior: None,
            workers,
        }
    }

    /// Canonical state.
    pub fn state(&self) -> &GlobalParameterState {
        &self.state
    }

    /// Mutable canonical state; changes reach workers on the next
    /// [`Coordinator::broadcast_parameters`].
    pub fn state_mut(&mut self) -> &mut GlobalParameterState {
        &mut self.state
    }

    /// Shared model dimensions.
    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    /// Model flags shared with workers.
    pub fn flags(&self) -> &ModelFlags {
        &self.flags
    }

    /// Number of workers.
    pub fn n_workers(&self) -> usize {
        self.link.n_workers()
    }

    /// Site range owned by each worker, rank order.
    pub fn partitions(&self) -> &[Range<usize>] {
        &self.partitions
    }

    /// Coordinator copy of the data, masked like the workers' copies.
    pub fn data(&self) -> &dyn SequenceStore {
        self.data.as_ref()
    }

    /// Installed empirical prior.
    pub fn empirical_prior(&self) -> Option<&EmpiricalPrior> {
        self.empirical_prior.as_ref()
    }

    /// Last empirical fraction sent.
    pub fn empirical_frac(&self) -> f64 {
        self.empirical_frac
    }

    /// Coordinator random stream.
    pub fn rng_mut(&mut self) -> &mut RngHandle {
        &mut self.rng
    }

    /// Sends `signal` followed by every payload buffer, each broadcast to all workers.
    pub fn dispatch(&self, signal: Signal, payload: &[Packet]) -> Result<(), PbxError> {
        self.link.signal(signal)?;
        for packet in payload {
            match packet {
                Packet::Ints(values) => self.link.broadcast_ints(values)?,
                Packet::Doubles(values) => self.link.broadcast_doubles(values)?,
                Packet::Signal(nested) => {
                    return Err(PbxError::Protocol(
                        ErrorInfo::new("nested-signal", "signals cannot be sent as payload")
                            .with_context("signal", signal)
                            .with_context("payload", nested),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Renormalizes profiles, validates, and broadcasts the canonical state.
    pub fn broadcast_parameters(&mut self) -> Result<(), PbxError> {
        self.state.renormalize_profiles();
        self.state.validate(&self.dims)?;
        let vector = encode(&self.state);
        debug!(
            ints = vector.ints.len(),
            doubles = vector.doubles.len(),
            "broadcasting parameters"
        );
        self.dispatch(
            Signal::ParameterUpdate,
            &[Packet::Ints(vector.ints), Packet::Doubles(vector.doubles)],
        )
    }

    /// Backs up the data on every participant and installs fresh stepping ranks.
    pub fn prepare_stepping(&mut self) -> Result<(), PbxError> {
        if self.backup.is_some() {
            return Err(already_prepared(0));
        }
        let mut rng = RngHandle::from_seed(determinism::stepping_seed(self.master_seed));
        let ranks = SteppingRanks::random(self.dims.n_sites, self.dims.n_taxa, &mut rng);
        self.dispatch(
            Signal::PrepareStepping,
            &[
                Packet::Ints(ranks.site_buffer()),
                Packet::Ints(ranks.cell_buffer()),
            ],
        )?;
        self.backup = Some(DataSnapshot::capture(self.data.as_ref()));
        self.ranks = Some(ranks);
        info!(sites = self.dims.n_sites, taxa = self.dims.n_taxa, "stepping prepared");
        Ok(())
    }

    /// Keeps the cells ranked below `cutoff` and masks the rest, everywhere.
    pub fn set_stepping_fraction(&mut self, cutoff: usize) -> Result<(), PbxError> {
        let (Some(ranks), Some(backup)) = (&self.ranks, &self.backup) else {
            return Err(unprepared());
        };
        self.link.signal(Signal::SetSteppingFraction)?;
        self.link.broadcast_ints(&[cutoff as i64])?;
        ranks.apply_cell_cutoff(self.data.as_mut(), backup, cutoff);
        debug!(cutoff, "stepping fraction set");
        Ok(())
    }

    /// Records the empirical fraction everywhere; once stepping is prepared it
    /// also masks every site beyond the fraction.
    pub fn set_empirical_frac(&mut self, frac: f64) -> Result<(), PbxError> {
        self.dispatch(Signal::SetEmpiricalFrac, &[Packet::Doubles(vec![frac])])?;
        self.empirical_frac = frac;
        if let (Some(ranks), Some(backup)) = (&self.ranks, &self.backup) {
            let kept = ranks.apply_empirical_fraction(self.data.as_mut(), backup, frac);
            debug!(frac, kept, "empirical fraction applied");
        }
        Ok(())
    }

    /// Parses an empirical prior and installs it on every participant.
    pub fn set_empirical_prior<R: Read>(&mut self, reader: R) -> Result<(), PbxError> {
        let layout = EmpiricalLayout::from_flags(&self.flags, self.state.component_count);
        let prior = EmpiricalPrior::parse(reader, layout, &self.dims)?;
        self.dispatch(
            Signal::SetEmpiricalPrior,
            &[Packet::Doubles(prior.to_buffer())],
        )?;
        self.empirical_prior = Some(prior);
        Ok(())
    }

    /// Sum of the workers' partial cross-validation scores.
    pub fn compute_cv_score(&mut self) -> Result<f64, PbxError> {
        self.link.signal(Signal::CvScore)?;
        let partials = self.link.gather_doubles(|_| 1)?;
        Ok(partials.iter().map(|partial| partial[0]).sum())
    }

    /// Per-site log-likelihoods summed over workers. Workers also resample
    /// the allocation of their active sites; those allocations are committed
    /// to the canonical state and rebroadcast.
    pub fn compute_site_log_likelihoods(&mut self) -> Result<Vec<f64>, PbxError> {
        self.link.signal(Signal::SiteLogL)?;
        let n_sites = self.dims.n_sites;
        let vectors = self.link.gather_doubles(|_| n_sites)?;
        let allocations = self.gather_partition_ints()?;
        let mut total = vec![0.0; n_sites];
        for vector in &vectors {
            for (slot, value) in total.iter_mut().zip(vector) {
                *slot += value;
            }
        }
        self.commit_allocations(&allocations)?;
        self.broadcast_parameters()?;
        Ok(total)
    }

    /// Rate sufficient statistics of every site.
    pub fn update_rate_suff_stats(&mut self) -> Result<RateSuffStats, PbxError> {
        self.link.signal(Signal::UpdateRate)?;
        let partitions = self.partitions.clone();
        let buffers = self
            .link
            .gather_doubles(|rank| 2 * partitions[rank - 1].len())?;
        let mut stats = RateSuffStats {
            counts: vec![0.0; self.dims.n_sites],
            betas: vec![0.0; self.dims.n_sites],
        };
        for (range, buffer) in partitions.iter().zip(&buffers) {
            let (counts, betas) = buffer.split_at(range.len());
            stats.counts[range.clone()].copy_from_slice(counts);
            stats.betas[range.clone()].copy_from_slice(betas);
        }
        Ok(stats)
    }

    /// Exchangeability sufficient statistics summed over workers.
    pub fn update_rr_suff_stats(&mut self) -> Result<RrSuffStats, PbxError> {
        self.link.signal(Signal::UpdateRRate)?;
        let n_rr = self.dims.n_rr;
        let buffers = self.link.gather_doubles(|_| 2 * n_rr)?;
        let mut stats = RrSuffStats {
            counts: vec![0.0; n_rr],
            betas: vec![0.0; n_rr],
        };
        for buffer in &buffers {
            for i in 0..n_rr {
                stats.counts[i] += buffer[i];
                stats.betas[i] += buffer[n_rr + i];
            }
        }
        Ok(stats)
    }

    /// Gibbs-resamples every allocation `repeats` times on the workers,
    /// commits the result and rebroadcasts.
    pub fn realloc_move(&mut self, repeats: usize) -> Result<(), PbxError> {
        self.dispatch(
            Signal::ReallocMove,
            &[Packet::Ints(vec![repeats as i64])],
        )?;
        let allocations = self.gather_partition_ints()?;
        self.commit_allocations(&allocations)?;
        self.broadcast_parameters()
    }

    /// Metropolis updates of every active profile, split between workers.
    /// Returns the number of accepted proposals.
    pub fn profile_move(&mut self, repeats: usize, step: f64) -> Result<usize, PbxError> {
        self.dispatch(
            Signal::ProfileMove,
            &[
                Packet::Ints(vec![repeats as i64]),
                Packet::Doubles(vec![step]),
            ],
        )?;
        let (count, n_workers, dim) = (self.state.component_count, self.n_workers(), self.dims.dim);
        let profiles = self
            .link
            .gather_doubles(|rank| component_range(count, n_workers, rank).len() * dim)?;
        let accepted = self.link.gather_ints(|_| 1)?;
        for (index, buffer) in profiles.iter().enumerate() {
            let range = component_range(count, n_workers, index + 1);
            for (k, profile) in range.zip(buffer.chunks(dim)) {
                self.state.components[k].profile.copy_from_slice(profile);
            }
        }
        self.broadcast_parameters()?;
        Ok(accepted.iter().map(|a| a[0].max(0) as usize).sum())
    }

    /// Stepping-stone round for one site; returns its marginal log-likelihood.
    ///
    /// Without `restore` the site is reassigned to the drawn candidate and the
    /// parameters are rebroadcast.
    pub fn site_log_likelihood_stepping(
        &mut self,
        site: usize,
        repeats: usize,
        restore: bool,
    ) -> Result<f64, PbxError> {
        Ok(self.stepping_round(site, repeats, restore)?.log_likelihood)
    }

    /// Same round as [`Coordinator::site_log_likelihood_stepping`], returning
    /// the selected worker and candidate alongside the marginal.
    ///
    /// A candidate outside the selected worker's component range is a
    /// protocol error.
    pub fn stepping_round(
        &mut self,
        site: usize,
        repeats: usize,
        restore: bool,
    ) -> Result<SteppingOutcome, PbxError> {
        if site >= self.dims.n_sites {
            return Err(PbxError::Protocol(
                ErrorInfo::new("site-range", "stepping site out of range")
                    .with_context("site", site)
                    .with_context("n_sites", self.dims.n_sites),
            ));
        }
        let per_worker = repeats_per_worker(repeats, self.n_workers());
        self.dispatch(
            Signal::SteppingSiteLogL,
            &[Packet::Ints(vec![
                site as i64,
                per_worker as i64,
                i64::from(restore),
            ])],
        )?;
        let logls: Vec<f64> = self.link.gather_doubles(|_| 1)?.concat();
        let candidates: Vec<i64> = self.link.gather_ints(|_| 1)?.concat();
        let outcome = combine_partials(&logls, &candidates, &mut self.rng)?;
        check_candidate(&outcome, self.state.component_count, self.n_workers())
            .map_err(|err| PbxError::Protocol(err.info().clone().with_context("site", site)))?;
        debug!(
            site,
            logl = outcome.log_likelihood,
            worker = outcome.worker,
            candidate = outcome.candidate,
            restore,
            "stepping site combined"
        );
        if !restore {
            self.state.reassign_site(site, outcome.candidate)?;
            self.broadcast_parameters()?;
        }
        Ok(outcome)
    }

    /// Stops every worker and returns their final replicas.
    ///
    /// The first worker error wins over coordinator-side disconnects.
    pub fn shutdown(self) -> Result<Vec<WorkerLocalReplica>, PbxError> {
        let sent = self.link.signal(Signal::Kill);
        let Self { link, workers, .. } = self;
        drop(link);
        let joined = join_workers(workers);
        match (joined, sent) {
            (Err(err), _) | (Ok(_), Err(err)) => {
                error!(error = %err, "ensemble shutdown failed");
                Err(err)
            }
            (Ok(replicas), Ok(())) => {
                info!(workers = replicas.len(), "ensemble shut down");
                Ok(replicas)
            }
        }
    }

    /// Tears the ensemble down after `cause` and returns it.
    pub fn abort(self, cause: PbxError) -> PbxError {
        error!(error = %cause, "aborting ensemble");
        let Self { link, workers, .. } = self;
        drop(link);
        let _ = join_workers(workers);
        cause
    }

    fn gather_partition_ints(&self) -> Result<Vec<Vec<i64>>, PbxError> {
        let partitions = &self.partitions;
        self.link.gather_ints(|rank| partitions[rank - 1].len())
    }

    fn commit_allocations(&mut self, allocations: &[Vec<i64>]) -> Result<(), PbxError> {
        for (range, values) in self.partitions.iter().zip(allocations) {
            for (site, &value) in range.clone().zip(values) {
                if value < 0 || value as usize >= self.state.component_count {
                    return Err(allocation_range(site, value, self.state.component_count));
                }
                self.state.allocation[site] = value as usize;
            }
        }
        Ok(())
    }
}

fn unprepared() -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("stepping-unprepared", "stepping session was never prepared")
            .with_hint("call prepare_stepping first"),
    )
}

fn allocation_range(site: usize, value: i64, component_count: usize) -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("allocation-range", "allocation index out of range")
            .with_context("site", site)
            .with_context("component", value)
            .with_context("component_count", component_count),
    )
}

fn join_workers(workers: Vec<WorkerHandle>) -> Result<Vec<WorkerLocalReplica>, PbxError> {
    let mut replicas = Vec::with_capacity(workers.len());
    let mut first_error: Option<PbxError> = None;
    for (index, handle) in workers.into_iter().enumerate() {
        let outcome = handle.join().unwrap_or_else(|_| {
            Err(PbxError::Protocol(
                ErrorInfo::new("worker-panicked", "worker thread panicked")
                    .with_context("rank", index + 1),
            ))
        });
        match outcome {
            Ok(replica) => replicas.push(replica),
            Err(err) => {
                let replaces = match &first_error {
                    None => true,
                    Some(previous) => {
                        previous.info().code == "peer-disconnected"
                            && err.info().code != "peer-disconnected"
                    }
                };
                if replaces {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(replicas),
    }
}
