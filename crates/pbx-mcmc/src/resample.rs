//! Worker-side rounds that evaluate sites under every mixture component:
//! cross-validation scores, per-site log-likelihoods with Gibbs resampling of
//! the allocation, partial stepping-stone likelihoods and profile updates.
//!
//! Every function forces allocations on the replica it is given and leaves
//! the allocation of untouched sites exactly as it found them.

use std::ops::Range;

use pbx_core::errors::ErrorInfo;
use pbx_core::numeric::dirichlet_log_density;
use pbx_core::{partition, PbxError, RngHandle, WeightedLogSum};
use pbx_model::{GlobalParameterState, LikelihoodEngine, SequenceStore};

/// Components owned by worker `rank` (1-based) out of `n_workers`.
pub fn component_range(component_count: usize, n_workers: usize, rank: usize) -> Range<usize> {
    partition(component_count, n_workers)
        .get(rank.wrapping_sub(1))
        .cloned()
        .unwrap_or(0..0)
}

/// Log-likelihood of every site of `sites` under every active component,
/// indexed `[site - sites.start][component]`.
///
/// With `active_only`, sites without observed cells get an empty row. The
/// original allocations are restored and recomputed before returning.
pub fn component_site_logls(
    engine: &mut dyn LikelihoodEngine,
    state: &mut GlobalParameterState,
    data: &dyn SequenceStore,
    sites: Range<usize>,
    active_only: bool,
) -> Vec<Vec<f64>> {
    let saved: Vec<usize> = state.allocation[sites.clone()].to_vec();
    let evaluated = |site: usize| !active_only || data.is_active(site);
    let mut table: Vec<Vec<f64>> = sites
        .clone()
        .map(|site| {
            if evaluated(site) {
                Vec::with_capacity(state.component_count)
            } else {
                Vec::new()
            }
        })
        .collect();
    for k in 0..state.component_count {
        for site in sites.clone().filter(|&site| evaluated(site)) {
            state.allocation[site] = k;
        }
        engine.recompute_conditional_likelihoods(state, data, sites.clone());
        for site in sites.clone().filter(|&site| evaluated(site)) {
            table[site - sites.start].push(engine.site_log_likelihood(site));
        }
    }
    state.allocation[sites.clone()].copy_from_slice(&saved);
    engine.recompute_conditional_likelihoods(state, data, sites);
    table
}

/// Sum over `sites` of `log Σ_k w_k · L_k(site)`.
pub fn cv_partial_score(
    engine: &mut dyn LikelihoodEngine,
    state: &mut GlobalParameterState,
    data: &dyn SequenceStore,
    sites: Range<usize>,
) -> Result<f64, PbxError> {
    let weights = state.weights();
    let table = component_site_logls(engine, state, data, sites.clone(), false);
    let mut total = 0.0;
    for (offset, row) in table.iter().enumerate() {
        total += WeightedLogSum::new(row, &weights)
            .log_value()
            .ok_or_else(|| zero_mass(sites.start + offset))?;
    }
    Ok(total)
}

/// Draws a new allocation for every active site of `sites` from its
/// conditional distribution and returns the per-site marginal
/// log-likelihoods (zero for inactive sites), indexed like `sites`.
pub fn resample_allocations(
    engine: &mut dyn LikelihoodEngine,
    state: &mut GlobalParameterState,
    data: &dyn SequenceStore,
    sites: Range<usize>,
    active_only: bool,
    rng: &mut RngHandle,
) -> Result<Vec<f64>, PbxError> {
    let weights = state.weights();
    let table = component_site_logls(engine, state, data, sites.clone(), active_only);
    let mut logls = vec![0.0; table.len()];
    for (offset, row) in table.iter().enumerate() {
        if row.is_empty() {
            continue;
        }
        let site = sites.start + offset;
        let combined = WeightedLogSum::new(row, &weights);
        logls[offset] = combined.log_value().ok_or_else(|| zero_mass(site))?;
        let k = combined.sample(rng).ok_or_else(|| {
            PbxError::Protocol(
                ErrorInfo::new("cumulative-overflow", "component draw overflowed the cumulative")
                    .with_context("site", site)
                    .with_context("components", row.len()),
            )
        })?;
        state.allocation[site] = k;
    }
    engine.recompute_conditional_likelihoods(state, data, sites);
    Ok(logls)
}

/// Partial stepping-stone likelihood of `site` over `components`.
///
/// Returns `log Σ_{k∈components} w_k · L_k(site)` and a candidate drawn
/// proportionally to the terms, or `(0.0, None)` when the weights of the range
/// carry no mass. The site's allocation is left unchanged.
pub fn stepping_partial(
    engine: &mut dyn LikelihoodEngine,
    state: &mut GlobalParameterState,
    data: &dyn SequenceStore,
    site: usize,
    components: Range<usize>,
    rng: &mut RngHandle,
) -> (f64, Option<usize>) {
    let original = state.allocation[site];
    let mut logls = Vec::with_capacity(components.len());
    for k in components.clone() {
        state.allocation[site] = k;
        engine.recompute_conditional_likelihoods(state, data, site..site + 1);
        logls.push(engine.site_log_likelihood(site));
    }
    state.allocation[site] = original;
    engine.recompute_conditional_likelihoods(state, data, site..site + 1);

    let weights: Vec<f64> = components
        .clone()
        .map(|k| state.components[k].weight)
        .collect();
    let combined = WeightedLogSum::new(&logls, &weights);
    match (combined.log_value(), combined.sample(rng)) {
        (Some(logl), Some(offset)) => (logl, Some(components.start + offset)),
        _ => (0.0, None),
    }
}

/// Metropolis updates of the profiles in `components`, each targeting the
/// likelihood of the sites allocated to it times the Dirichlet prior given
/// by the concentration weights. Returns the number of accepted proposals.
///
/// Proposals move mass `h ~ U(-step/2, step/2)` between two random states, so
/// the proposal is symmetric; moves leaving the simplex interior are rejected.
pub fn profile_move(
    engine: &mut dyn LikelihoodEngine,
    state: &mut GlobalParameterState,
    data: &dyn SequenceStore,
    components: Range<usize>,
    repeats: usize,
    step: f64,
    rng: &mut RngHandle,
) -> usize {
    let dim = state.dirichlet_weights.len();
    let mut accepted = 0;
    if dim < 2 {
        return 0;
    }
    for k in components {
        let members: Vec<usize> = (0..state.allocation.len())
            .filter(|&site| state.allocation[site] == k)
            .collect();
        let mut current = members_logl(engine, state, data, &members)
            + dirichlet_log_density(&state.components[k].profile, &state.dirichlet_weights);
        for _ in 0..repeats {
            let i = (rng.uniform() * dim as f64) as usize % dim;
            let j = (i + 1 + (rng.uniform() * (dim - 1) as f64) as usize % (dim - 1)) % dim;
            let h = step * (rng.uniform() - 0.5);
            let previous = state.components[k].profile.clone();
            let mut proposed = previous.clone();
            proposed[i] += h;
            proposed[j] -= h;
            if proposed[i] <= 0.0 || proposed[j] <= 0.0 {
                continue;
            }
            state.components[k].profile = proposed;
            let candidate = members_logl(engine, state, data, &members)
                + dirichlet_log_density(&state.components[k].profile, &state.dirichlet_weights);
            if rng.uniform().ln() < candidate - current {
                current = candidate;
                accepted += 1;
            } else {
                state.components[k].profile = previous;
            }
        }
        members_logl(engine, state, data, &members);
    }
    accepted
}

fn members_logl(
    engine: &mut dyn LikelihoodEngine,
    state: &GlobalParameterState,
    data: &dyn SequenceStore,
    members: &[usize],
) -> f64 {
    members
        .iter()
        .map(|&site| {
            engine.recompute_conditional_likelihoods(state, data, site..site + 1);
            engine.site_log_likelihood(site)
        })
        .sum()
}

fn zero_mass(site: usize) -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("zero-weight-mass", "mixture weights carry no likelihood mass")
            .with_context("site", site),
    )
}
