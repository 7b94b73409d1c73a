//! Stepping-stone evaluation of site marginal likelihoods across workers.
//!
//! Components are split between workers with the same contiguous partition
//! used for sites. For one site every worker reports the weighted log-sum of
//! its components and a locally drawn candidate; the coordinator combines the
//! partial sums and picks the worker whose candidate is accepted in
//! proportion to its share of the total mass.

use pbx_core::errors::ErrorInfo;
use pbx_core::{finite_discrete, PbxError, RngHandle};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coordinator::Coordinator;
use crate::resample::component_range;

/// Result of combining the partial likelihoods of one site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteppingOutcome {
    /// Estimated marginal log-likelihood of the site.
    pub log_likelihood: f64,
    /// Rank of the worker whose candidate was drawn.
    pub worker: usize,
    /// Component proposed by that worker.
    pub candidate: usize,
}

/// Per-site marginal log-likelihoods of a stepping pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalEstimate {
    /// Sites in evaluation order with their log-likelihood.
    pub sites: Vec<(usize, f64)>,
    /// Sum over the evaluated sites.
    pub total: f64,
}

/// `ceil(repeats / n_workers)`, the repeat count forwarded to each worker.
pub fn repeats_per_worker(repeats: usize, n_workers: usize) -> usize {
    if n_workers == 0 {
        return repeats;
    }
    repeats.div_ceil(n_workers)
}

/// Combines gathered `(logl, candidate)` pairs; a negative candidate marks a
/// worker whose components carried no mass.
///
/// Fails when no worker reported a candidate or the combined mass is zero.
pub fn combine_partials(
    logls: &[f64],
    candidates: &[i64],
    rng: &mut RngHandle,
) -> Result<SteppingOutcome, PbxError> {
    let max = logls
        .iter()
        .zip(candidates)
        .filter(|(_, candidate)| **candidate >= 0)
        .map(|(&logl, _)| logl)
        .fold(f64::NEG_INFINITY, f64::max);
    let post: Vec<f64> = logls
        .iter()
        .zip(candidates)
        .map(|(&logl, &candidate)| {
            if candidate >= 0 && max.is_finite() {
                (logl - max).exp()
            } else {
                0.0
            }
        })
        .collect();
    let total: f64 = post.iter().sum();
    if total <= 0.0 || total.is_nan() {
        return Err(PbxError::Protocol(
            ErrorInfo::new("zero-total-likelihood", "total likelihood is 0")
                .with_context("workers", logls.len())
                .with_context(
                    "valid_candidates",
                    candidates.iter().filter(|&&c| c >= 0).count(),
                ),
        ));
    }
    let index = finite_discrete(&post, rng).ok_or_else(|| {
        PbxError::Protocol(
            ErrorInfo::new("cumulative-overflow", "worker draw overflowed the cumulative")
                .with_context("workers", logls.len()),
        )
    })?;
    Ok(SteppingOutcome {
        log_likelihood: total.ln() + max,
        worker: index + 1,
        candidate: candidates[index] as usize,
    })
}

/// Fails unless the drawn candidate lies in the component range owned by
/// the selected worker.
pub fn check_candidate(
    outcome: &SteppingOutcome,
    component_count: usize,
    n_workers: usize,
) -> Result<(), PbxError> {
    let owned = component_range(component_count, n_workers, outcome.worker);
    if owned.contains(&outcome.candidate) {
        return Ok(());
    }
    Err(PbxError::Protocol(
        ErrorInfo::new("candidate-range", "worker proposed a component it does not own")
            .with_context("worker", outcome.worker)
            .with_context("candidate", outcome.candidate)
            .with_context("range", format!("{}..{}", owned.start, owned.end)),
    ))
}

/// Evaluates every site of `sites` in turn and sums the marginals.
///
/// With `restore`, the canonical state is left untouched; otherwise each
/// site is reallocated to the drawn candidate before the next one.
pub fn estimate_marginal<I>(
    coordinator: &mut Coordinator,
    sites: I,
    repeats: usize,
    restore: bool,
) -> Result<MarginalEstimate, PbxError>
where
    I: IntoIterator<Item = usize>,
{
    let mut estimate = MarginalEstimate {
        sites: Vec::new(),
        total: 0.0,
    };
    for site in sites {
        let logl = coordinator.site_log_likelihood_stepping(site, repeats, restore)?;
        estimate.sites.push((site, logl));
        estimate.total += logl;
    }
    info!(
        sites = estimate.sites.len(),
        total = estimate.total,
        restore,
        "stepping pass complete"
    );
    Ok(estimate)
}
