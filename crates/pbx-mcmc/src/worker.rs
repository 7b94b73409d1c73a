use std::ops::Range;

use pbx_core::errors::ErrorInfo;
use pbx_core::{partition, PbxError, RngHandle};
use pbx_model::{
    Dimensions, EmpiricalLayout, EmpiricalPrior, GlobalParameterState, LikelihoodEngine,
    ModelFlags, SequenceStore,
};
use pbx_wire::{decode, Extent, ExtentContext, ParameterVector, WorkerLink};
use tracing::{debug, error};

use crate::handlers::{Flow, HandlerRegistry};
use crate::masking::{DataSnapshot, SteppingRanks};
use crate::resample;

/// Everything a worker knows about the model: a full copy of the last
/// broadcast state plus its own data and stepping bookkeeping.
#[derive(Debug, Clone)]
pub struct WorkerLocalReplica {
    /// Replica of the coordinator's state as of the last broadcast, with any
    /// local allocation changes made since.
    pub state: GlobalParameterState,
    /// Contiguous sites owned by this worker.
    pub sites: Range<usize>,
    /// Snapshot of the data taken at `PrepareStepping`.
    pub backup: Option<DataSnapshot>,
    /// Permutations received at `PrepareStepping`.
    pub ranks: Option<SteppingRanks>,
    /// Installed empirical prior.
    pub empirical_prior: Option<EmpiricalPrior>,
    /// Last empirical fraction received.
    pub empirical_frac: f64,
}

/// One worker participant: owns its replica, data copy and engine, and
/// answers signals until told to stop.
pub struct Worker<E> {
    link: WorkerLink,
    dims: Dimensions,
    flags: ModelFlags,
    n_workers: usize,
    data: Box<dyn SequenceStore>,
    engine: E,
    rng: RngHandle,
    replica: WorkerLocalReplica,
}

impl<E: LikelihoodEngine> Worker<E> {
    /// Builds the worker for `link.rank()` out of `n_workers`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: WorkerLink,
        n_workers: usize,
        dims: Dimensions,
        flags: ModelFlags,
        state: GlobalParameterState,
        data: Box<dyn SequenceStore>,
        engine: E,
        master_seed: u64,
    ) -> Self {
        let rank = link.rank();
        let sites = partition(dims.n_sites, n_workers)
            .get(rank - 1)
            .cloned()
            .unwrap_or(0..0);
        let mut engine = engine;
        engine.update_matrices(&state);
        engine.recompute_conditional_likelihoods(&state, data.as_ref(), sites.clone());
        Self {
            link,
            dims,
            flags,
            n_workers,
            data,
            engine,
            rng: RngHandle::for_rank(master_seed, rank),
            replica: WorkerLocalReplica {
                state,
                sites,
                backup: None,
                ranks: None,
                empirical_prior: None,
                empirical_frac: 1.0,
            },
        }
    }

    /// Rank of this worker.
    pub fn rank(&self) -> usize {
        self.link.rank()
    }

    /// Current replica.
    pub fn replica(&self) -> &WorkerLocalReplica {
        &self.replica
    }

    /// Dispatch loop: receive a signal, run its handler, repeat until a
    /// handler asks to stop. Returns the final replica.
    pub fn run(mut self, registry: &HandlerRegistry<E>) -> Result<WorkerLocalReplica, PbxError> {
        loop {
            let signal = self.link.recv_signal().map_err(|err| self.fail(err))?;
            debug!(rank = self.rank(), signal = signal.as_str(), "worker handling signal");
            let handler = registry.resolve(signal).map_err(|err| self.fail(err))?;
            match handler(&mut self).map_err(|err| self.fail(err))? {
                Flow::Continue => continue,
                Flow::Stop => break,
            }
        }
        debug!(rank = self.rank(), "worker stopped");
        Ok(self.replica)
    }

    fn fail(&self, err: PbxError) -> PbxError {
        error!(rank = self.rank(), error = %err, "worker aborting");
        err
    }

    fn extent(&self, extent: Extent) -> usize {
        extent.resolve(&ExtentContext {
            dims: self.dims,
            partition_sites: self.replica.sites.len(),
            range_components: self.components().len(),
            prior_len: EmpiricalLayout::from_flags(&self.flags, self.replica.state.component_count)
                .buffer_len(&self.dims),
        })
    }

    fn components(&self) -> Range<usize> {
        resample::component_range(self.replica.state.component_count, self.n_workers, self.rank())
    }

    fn single_int(&self) -> Result<i64, PbxError> {
        Ok(self.link.recv_ints(self.extent(Extent::Fixed(1)))?[0])
    }

    pub(crate) fn on_parameter_update(&mut self) -> Result<Flow, PbxError> {
        let ints = self.link.recv_ints(self.extent(Extent::IntParams))?;
        let doubles = self.link.recv_doubles(self.extent(Extent::DoubleParams))?;
        let state = decode(&self.dims, &ParameterVector { ints, doubles })?;
        self.engine.update_matrices(&state);
        self.engine.recompute_conditional_likelihoods(
            &state,
            self.data.as_ref(),
            self.replica.sites.clone(),
        );
        self.replica.state = state;
        Ok(Flow::Continue)
    }

    pub(crate) fn on_update_rate(&mut self) -> Result<Flow, PbxError> {
        let sites = self.replica.sites.clone();
        let mut counts = Vec::with_capacity(sites.len());
        let mut betas = Vec::with_capacity(sites.len());
        for site in sites {
            let stat = self
                .engine
                .site_suff_stat(&self.replica.state, self.data.as_ref(), site);
            counts.push(stat.rate_count);
            betas.push(stat.rate_beta);
        }
        counts.extend(betas);
        self.link.send_doubles(counts)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn on_update_rrate(&mut self) -> Result<Flow, PbxError> {
        let n_rr = self.dims.n_rr;
        let mut buffer = vec![0.0; 2 * n_rr];
        for site in self.replica.sites.clone() {
            let stat = self
                .engine
                .site_suff_stat(&self.replica.state, self.data.as_ref(), site);
            for (slot, value) in buffer[..n_rr].iter_mut().zip(&stat.rr_count) {
                *slot += value;
            }
            for (slot, value) in buffer[n_rr..].iter_mut().zip(&stat.rr_beta) {
                *slot += value;
            }
        }
        self.link.send_doubles(buffer)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn on_realloc_move(&mut self) -> Result<Flow, PbxError> {
        let repeats = non_negative(self.single_int()?, "repeats")?;
        let sites = self.replica.sites.clone();
        for _ in 0..repeats {
            resample::resample_allocations(
                &mut self.engine,
                &mut self.replica.state,
                self.data.as_ref(),
                sites.clone(),
                false,
                &mut self.rng,
            )?;
        }
        let allocation = self.replica.state.allocation[sites]
            .iter()
            .map(|&k| k as i64)
            .collect();
        self.link.send_ints(allocation)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn on_profile_move(&mut self) -> Result<Flow, PbxError> {
        let repeats = non_negative(self.single_int()?, "repeats")?;
        let step = self.link.recv_doubles(self.extent(Extent::Fixed(1)))?[0];
        let components = self.components();
        let accepted = resample::profile_move(
            &mut self.engine,
            &mut self.replica.state,
            self.data.as_ref(),
            components.clone(),
            repeats,
            step,
            &mut self.rng,
        );
        let profiles = components
            .flat_map(|k| self.replica.state.components[k].profile.clone())
            .collect();
        self.link.send_doubles(profiles)?;
        self.link.send_ints(vec![accepted as i64])?;
        Ok(Flow::Continue)
    }

    pub(crate) fn on_prepare_stepping(&mut self) -> Result<Flow, PbxError> {
        let site_rank = self.link.recv_ints(self.extent(Extent::Sites))?;
        let cell_rank = self.link.recv_ints(self.extent(Extent::Cells))?;
        if self.replica.backup.is_some() {
            return Err(already_prepared(self.rank()));
        }
        self.replica.ranks = Some(SteppingRanks::from_buffers(&site_rank, &cell_rank)?);
        self.replica.backup = Some(DataSnapshot::capture(self.data.as_ref()));
        Ok(Flow::Continue)
    }

    pub(crate) fn on_set_stepping_fraction(&mut self) -> Result<Flow, PbxError> {
        let cutoff = non_negative(self.single_int()?, "cutoff")?;
        let (ranks, backup) = prepared(&self.replica, self.link.rank())?;
        ranks.apply_cell_cutoff(self.data.as_mut(), backup, cutoff);
        self.refresh_partition();
        Ok(Flow::Continue)
    }

    pub(crate) fn on_set_empirical_frac(&mut self) -> Result<Flow, PbxError> {
        let frac = self.link.recv_doubles(self.extent(Extent::Fixed(1)))?[0];
        self.replica.empirical_frac = frac;
        if self.replica.backup.is_some() {
            let (ranks, backup) = prepared(&self.replica, self.link.rank())?;
            ranks.apply_empirical_fraction(self.data.as_mut(), backup, frac);
            self.refresh_partition();
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn on_set_empirical_prior(&mut self) -> Result<Flow, PbxError> {
        let buffer = self.link.recv_doubles(self.extent(Extent::EmpiricalPrior))?;
        let layout = EmpiricalLayout::from_flags(&self.flags, self.replica.state.component_count);
        self.replica.empirical_prior = Some(EmpiricalPrior::from_buffer(&buffer, layout, &self.dims)?);
        Ok(Flow::Continue)
    }

    pub(crate) fn on_stepping_site_logl(&mut self) -> Result<Flow, PbxError> {
        let params = self.link.recv_ints(self.extent(Extent::Fixed(3)))?;
        let site = non_negative(params[0], "site")?;
        if site >= self.dims.n_sites {
            return Err(PbxError::Protocol(
                ErrorInfo::new("site-range", "stepping site out of range")
                    .with_context("site", site)
                    .with_context("n_sites", self.dims.n_sites),
            ));
        }
        let restore = params[2] != 0;
        debug!(rank = self.rank(), site, repeats = params[1], restore, "stepping site");
        let components = self.components();
        let (logl, candidate) = resample::stepping_partial(
            &mut self.engine,
            &mut self.replica.state,
            self.data.as_ref(),
            site,
            components,
            &mut self.rng,
        );
        self.link.send_doubles(vec![logl])?;
        self.link
            .send_ints(vec![candidate.map(|k| k as i64).unwrap_or(-1)])?;
        if let (false, Some(k)) = (restore, candidate) {
            self.replica.state.allocation[site] = k;
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn on_cv_score(&mut self) -> Result<Flow, PbxError> {
        let score = resample::cv_partial_score(
            &mut self.engine,
            &mut self.replica.state,
            self.data.as_ref(),
            self.replica.sites.clone(),
        )?;
        self.link.send_doubles(vec![score])?;
        Ok(Flow::Continue)
    }

    pub(crate) fn on_site_logl(&mut self) -> Result<Flow, PbxError> {
        let sites = self.replica.sites.clone();
        let partial = resample::resample_allocations(
            &mut self.engine,
            &mut self.replica.state,
            self.data.as_ref(),
            sites.clone(),
            true,
            &mut self.rng,
        )?;
        let mut vector = vec![0.0; self.dims.n_sites];
        vector[sites.clone()].copy_from_slice(&partial);
        let allocation = self.replica.state.allocation[sites]
            .iter()
            .map(|&k| k as i64)
            .collect();
        self.link.send_doubles(vector)?;
        self.link.send_ints(allocation)?;
        Ok(Flow::Continue)
    }

    fn refresh_partition(&mut self) {
        self.engine.recompute_conditional_likelihoods(
            &self.replica.state,
            self.data.as_ref(),
            self.replica.sites.clone(),
        );
    }
}

fn prepared(
    replica: &WorkerLocalReplica,
    rank: usize,
) -> Result<(&SteppingRanks, &DataSnapshot), PbxError> {
    match (&replica.ranks, &replica.backup) {
        (Some(ranks), Some(backup)) => Ok((ranks, backup)),
        _ => Err(PbxError::Protocol(
            ErrorInfo::new("stepping-unprepared", "stepping session was never prepared")
                .with_context("rank", rank)
                .with_hint("send PrepareStepping first"),
        )),
    }
}

pub(crate) fn already_prepared(rank: usize) -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("stepping-prepared", "stepping session already prepared")
            .with_context("rank", rank)
            .with_hint("a run can prepare stepping only once"),
    )
}

fn non_negative(value: i64, field: &str) -> Result<usize, PbxError> {
    usize::try_from(value).map_err(|_| {
        PbxError::Protocol(
            ErrorInfo::new("negative-index", format!("{field} carried a negative value"))
                .with_context("value", value),
        )
    })
}
