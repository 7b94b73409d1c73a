#![deny(missing_docs)]
//! Shared building blocks for the pbx distributed mixture sampler: the
//! structured error surface, deterministic per-participant random streams, and
//! the numerical kernels (stabilized log-sum-exp, proportional sampling,
//! contiguous partitioning, Gamma helpers) every participant relies on.

pub mod errors;
pub mod numeric;
pub mod rng;

pub use errors::{ErrorInfo, PbxError};
pub use numeric::{
    finite_discrete, log_sum_exp, partition, sample_cumulative, weighted_log_sum_exp,
    WeightedLogSum,
};
pub use rng::{derive_substream_seed, RngHandle};
