use std::fmt::{self, Display};

use pbx_model::Dimensions;
use serde::{Deserialize, Serialize};

/// Control signal sent by the coordinator ahead of every collective exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Signal {
    /// Replace the replica with the broadcast parameter vector.
    ParameterUpdate,
    /// Report per-site rate sufficient statistics.
    UpdateRate,
    /// Report summed exchangeability sufficient statistics.
    UpdateRRate,
    /// Gibbs-resample allocations on the worker's partition.
    ReallocMove,
    /// Metropolis updates of the profiles owned by the worker.
    ProfileMove,
    /// Snapshot data and install stepping ranks.
    PrepareStepping,
    /// Mask cells whose rank reaches the cutoff.
    SetSteppingFraction,
    /// Mask whole sites beyond the empirical fraction.
    SetEmpiricalFrac,
    /// Install an empirical prior.
    SetEmpiricalPrior,
    /// Partial site likelihood for one stepping-stone round.
    SteppingSiteLogL,
    /// Partial cross-validation score.
    CvScore,
    /// Per-site log-likelihood vector with resampled allocations.
    SiteLogL,
    /// Leave the dispatch loop.
    Kill,
}

impl Signal {
    /// Every signal in declaration order.
    pub const ALL: [Signal; 13] = [
        Signal::ParameterUpdate,
        Signal::UpdateRate,
        Signal::UpdateRRate,
        Signal::ReallocMove,
        Signal::ProfileMove,
        Signal::PrepareStepping,
        Signal::SetSteppingFraction,
        Signal::SetEmpiricalFrac,
        Signal::SetEmpiricalPrior,
        Signal::SteppingSiteLogL,
        Signal::CvScore,
        Signal::SiteLogL,
        Signal::Kill,
    ];

    /// Stable lowercase name used in logs and error context.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::ParameterUpdate => "parameter-update",
            Signal::UpdateRate => "update-rate",
            Signal::UpdateRRate => "update-rrate",
            Signal::ReallocMove => "realloc-move",
            Signal::ProfileMove => "profile-move",
            Signal::PrepareStepping => "prepare-stepping",
            Signal::SetSteppingFraction => "set-stepping-fraction",
            Signal::SetEmpiricalFrac => "set-empirical-frac",
            Signal::SetEmpiricalPrior => "set-empirical-prior",
            Signal::SteppingSiteLogL => "stepping-site-logl",
            Signal::CvScore => "cv-score",
            Signal::SiteLogL => "site-logl",
            Signal::Kill => "kill",
        }
    }

    /// Buffers exchanged after the signal, in order.
    pub fn schema(&self) -> Schema {
        use Buffer::{Doubles, Ints};
        use Extent::*;
        let (request, reply): (&'static [Buffer], &'static [Buffer]) = match self {
            Signal::ParameterUpdate => (&[Ints(IntParams), Doubles(DoubleParams)], &[]),
            Signal::UpdateRate => (&[], &[Doubles(PartitionSitesTwice)]),
            Signal::UpdateRRate => (&[], &[Doubles(ExchangeabilitiesTwice)]),
            Signal::ReallocMove => (&[Ints(Fixed(1))], &[Ints(PartitionSites)]),
            Signal::ProfileMove => (
                &[Ints(Fixed(1)), Doubles(Fixed(1))],
                &[Doubles(RangeProfiles), Ints(Fixed(1))],
            ),
            Signal::PrepareStepping => (&[Ints(Sites), Ints(Cells)], &[]),
            Signal::SetSteppingFraction => (&[Ints(Fixed(1))], &[]),
            Signal::SetEmpiricalFrac => (&[Doubles(Fixed(1))], &[]),
            Signal::SetEmpiricalPrior => (&[Doubles(EmpiricalPrior)], &[]),
            Signal::SteppingSiteLogL => (&[Ints(Fixed(3))], &[Doubles(Fixed(1)), Ints(Fixed(1))]),
            Signal::CvScore => (&[], &[Doubles(Fixed(1))]),
            Signal::SiteLogL => (&[], &[Doubles(Sites), Ints(PartitionSites)]),
            Signal::Kill => (&[], &[]),
        };
        Schema { request, reply }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buffer sequence of one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Coordinator to worker buffers.
    pub request: &'static [Buffer],
    /// Worker to coordinator buffers.
    pub reply: &'static [Buffer],
}

/// One typed buffer of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    /// Integer buffer.
    Ints(Extent),
    /// Double buffer.
    Doubles(Extent),
}

impl Buffer {
    /// Extent of the buffer regardless of its element type.
    pub fn extent(&self) -> Extent {
        match *self {
            Buffer::Ints(extent) | Buffer::Doubles(extent) => extent,
        }
    }
}

/// Symbolic length of a buffer, resolved against an [`ExtentContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Constant length.
    Fixed(usize),
    /// `1 + n_sites`.
    IntParams,
    /// [`Dimensions::double_len`].
    DoubleParams,
    /// `n_sites`.
    Sites,
    /// `n_sites * n_taxa`.
    Cells,
    /// Sites of the sending worker's partition.
    PartitionSites,
    /// Twice the sites of the worker's partition.
    PartitionSitesTwice,
    /// `2 * n_rr`.
    ExchangeabilitiesTwice,
    /// `dim` doubles for every component of the worker's range.
    RangeProfiles,
    /// Empirical prior buffer length for the active layout.
    EmpiricalPrior,
}

/// Everything needed to turn an [`Extent`] into a length for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentContext {
    /// Shared model dimensions.
    pub dims: Dimensions,
    /// Number of sites owned by the worker.
    pub partition_sites: usize,
    /// Number of components owned by the worker.
    pub range_components: usize,
    /// Length of the empirical prior buffer.
    pub prior_len: usize,
}

impl Extent {
    /// Concrete number of elements.
    pub fn resolve(&self, ctx: &ExtentContext) -> usize {
        let dims = &ctx.dims;
        match *self {
            Extent::Fixed(n) => n,
            Extent::IntParams => dims.int_len(),
            Extent::DoubleParams => dims.double_len(),
            Extent::Sites => dims.n_sites,
            Extent::Cells => dims.n_sites * dims.n_taxa,
            Extent::PartitionSites => ctx.partition_sites,
            Extent::PartitionSitesTwice => 2 * ctx.partition_sites,
            Extent::ExchangeabilitiesTwice => 2 * dims.n_rr,
            Extent::RangeProfiles => ctx.range_components * dims.dim,
            Extent::EmpiricalPrior => ctx.prior_len,
        }
    }
}
