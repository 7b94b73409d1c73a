//! Coordinator-side updates of the global hyperparameters. These run on the
//! canonical state between protocol rounds; callers rebroadcast afterwards.

use pbx_core::errors::ErrorInfo;
use pbx_core::numeric::{dirichlet_log_density, gamma_log_density};
use pbx_core::{PbxError, RngHandle};
use pbx_model::{EmpiricalPrior, GammaPair, GlobalParameterState};
use rand_distr::{Distribution, Gamma};

use crate::coordinator::{Coordinator, RateSuffStats, RrSuffStats};

const FLAT_PAIR: GammaPair = (1.0, 1.0);
const MIN_VALUE: f64 = 1e-6;

fn gamma_draw(shape: f64, rate: f64, rng: &mut RngHandle) -> Result<f64, PbxError> {
    let gamma = Gamma::new(shape, 1.0 / rate).map_err(|err| {
        PbxError::Model(
            ErrorInfo::new("gamma-distribution", err.to_string())
                .with_context("shape", shape)
                .with_context("rate", rate),
        )
    })?;
    Ok(gamma.sample(rng.inner_mut()))
}

/// Redraws the mixture weights from `Dirichlet(1 + occupancy)` over the active
/// components; inactive slots get weight zero.
pub fn resample_weights(
    state: &mut GlobalParameterState,
    rng: &mut RngHandle,
) -> Result<(), PbxError> {
    let occupancy = state.occupancy();
    let mut draws = Vec::with_capacity(state.component_count);
    for &count in &occupancy[..state.component_count] {
        draws.push(gamma_draw(1.0 + count as f64, 1.0, rng)?.max(f64::MIN_POSITIVE));
    }
    let total: f64 = draws.iter().sum();
    for (k, component) in state.components.iter_mut().enumerate() {
        component.weight = draws.get(k).map_or(0.0, |draw| draw / total);
    }
    Ok(())
}

/// Multiplicative Metropolis updates of each Dirichlet hyper-weight.
/// Returns the number of accepted proposals.
pub fn dirichlet_weight_move(
    state: &mut GlobalParameterState,
    prior: Option<&EmpiricalPrior>,
    step: f64,
    rng: &mut RngHandle,
) -> usize {
    let pairs = prior.and_then(|prior| prior.dirichlet_weights.as_deref());
    let target = |state: &GlobalParameterState, index: usize| {
        let (shape, rate) = pairs.and_then(|p| p.get(index).copied()).unwrap_or(FLAT_PAIR);
        let profiles: f64 = state.components[..state.component_count]
            .iter()
            .map(|c| dirichlet_log_density(&c.profile, &state.dirichlet_weights))
            .sum();
        profiles + gamma_log_density(state.dirichlet_weights[index], shape, rate)
    };
    let mut accepted = 0;
    for index in 0..state.dirichlet_weights.len() {
        let before = target(state, index);
        let old = state.dirichlet_weights[index];
        let new = (old * (step * (rng.uniform() - 0.5)).exp()).max(MIN_VALUE);
        state.dirichlet_weights[index] = new;
        let log_ratio = target(state, index) - before + (new / old).ln();
        if rng.uniform().ln() < log_ratio {
            accepted += 1;
        } else {
            state.dirichlet_weights[index] = old;
        }
    }
    accepted
}

/// Gibbs update of the exchangeabilities from their Gamma-Poisson
/// sufficient statistics.
pub fn gibbs_exchangeabilities(
    state: &mut GlobalParameterState,
    stats: &RrSuffStats,
    prior: Option<&EmpiricalPrior>,
    rng: &mut RngHandle,
) -> Result<(), PbxError> {
    let pairs = prior.and_then(|prior| prior.exchangeabilities.as_deref());
    for (i, value) in state.exchangeabilities.iter_mut().enumerate() {
        let (shape, rate) = pairs.and_then(|p| p.get(i).copied()).unwrap_or(FLAT_PAIR);
        *value = gamma_draw(shape + stats.counts[i], rate + stats.betas[i], rng)?.max(MIN_VALUE);
    }
    Ok(())
}

/// Rescales every branch length by a common factor drawn from
/// `Gamma(1 + counts, 1 + exposure)`; returns the factor.
pub fn rescale_tree(
    state: &mut GlobalParameterState,
    stats: &RateSuffStats,
    rng: &mut RngHandle,
) -> Result<f64, PbxError> {
    let counts: f64 = stats.counts.iter().sum();
    let exposure: f64 = stats.betas.iter().sum();
    let factor = gamma_draw(1.0 + counts, 1.0 + exposure, rng)?;
    if !(factor.is_finite() && factor > 0.0) {
        return Ok(1.0);
    }
    for length in &mut state.branch_lengths {
        *length = (*length * factor).max(MIN_VALUE);
    }
    Ok(factor)
}

/// Metropolis updates of the rate shape scored by full cross-validation
/// rounds. Rejected proposals are reverted and rebroadcast. Returns the
/// number of accepted proposals.
pub fn alpha_move(
    coordinator: &mut Coordinator,
    repeats: usize,
    step: f64,
    rng: &mut RngHandle,
) -> Result<usize, PbxError> {
    let (shape, rate) = coordinator
        .empirical_prior()
        .map_or(FLAT_PAIR, |prior| prior.alpha);
    let mut current = coordinator.compute_cv_score()?;
    let mut accepted = 0;
    for _ in 0..repeats {
        let old = coordinator.state().alpha;
        let new = (old * (step * (rng.uniform() - 0.5)).exp()).max(MIN_VALUE);
        coordinator.state_mut().alpha = new;
        coordinator.broadcast_parameters()?;
        let proposed = coordinator.compute_cv_score()?;
        let log_ratio = proposed - current
            + gamma_log_density(new, shape, rate)
            - gamma_log_density(old, shape, rate)
            + (new / old).ln();
        if rng.uniform().ln() < log_ratio {
            current = proposed;
            accepted += 1;
        } else {
            coordinator.state_mut().alpha = old;
            coordinator.broadcast_parameters()?;
        }
    }
    Ok(accepted)
}
