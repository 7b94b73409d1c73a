use pbx_core::errors::ErrorInfo;
use pbx_core::{PbxError, RngHandle};
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};

/// Model dimensions that size every buffer exchanged between participants.
///
/// All participants derive the same value from the alignment and the model
/// configuration before a session starts; buffer sizes are recomputed from it
/// before every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Number of alignment columns.
    pub n_sites: usize,
    /// Number of taxa (alignment rows).
    pub n_taxa: usize,
    /// Number of branches carrying a length.
    pub n_branch: usize,
    /// Number of exchangeability pairs, `dim * (dim - 1) / 2`.
    pub n_rr: usize,
    /// Size of the character state space.
    pub dim: usize,
    /// Upper bound on the number of mixture components.
    pub max_components: usize,
}

impl Dimensions {
    /// Builds dimensions for a model over `dim` states.
    pub fn new(
        n_sites: usize,
        n_taxa: usize,
        n_branch: usize,
        dim: usize,
        max_components: usize,
    ) -> Self {
        Self {
            n_sites,
            n_taxa,
            n_branch,
            n_rr: dim * dim.saturating_sub(1) / 2,
            dim,
            max_components,
        }
    }

    /// Number of doubles in an encoded parameter vector.
    pub fn double_len(&self) -> usize {
        3 + self.n_branch + self.n_rr + self.max_components * (self.dim + 1) + self.dim
    }

    /// Number of integers in an encoded parameter vector.
    pub fn int_len(&self) -> usize {
        1 + self.n_sites
    }
}

/// One mixture component: a probability vector over states and its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureComponent {
    /// Equilibrium frequencies over the state space.
    pub profile: Vec<f64>,
    /// Mixing weight.
    pub weight: f64,
}

/// Canonical parameter snapshot owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalParameterState {
    /// Shape of the Gamma rate-heterogeneity distribution.
    pub alpha: f64,
    /// Shape hyperparameter of the branch-length prior.
    pub branch_alpha: f64,
    /// Rate hyperparameter of the branch-length prior.
    pub branch_beta: f64,
    /// Branch lengths in branch order.
    pub branch_lengths: Vec<f64>,
    /// Relative exchangeability rates in packed upper-triangle order.
    pub exchangeabilities: Vec<f64>,
    /// Number of active components; only `components[..component_count]` may be allocated.
    pub component_count: usize,
    /// All `max_components` component slots.
    pub components: Vec<MixtureComponent>,
    /// Dirichlet concentration hyper-weights for the profiles.
    pub dirichlet_weights: Vec<f64>,
    /// Component index of every site.
    pub allocation: Vec<usize>,
}

impl GlobalParameterState {
    /// Draws a starting state: unit exchangeabilities, short branches, profiles
    /// from a flat Dirichlet, equal weights and a uniform random allocation.
    pub fn initial(dims: &Dimensions, rng: &mut RngHandle) -> Result<Self, PbxError> {
        if dims.max_components == 0 || dims.dim < 2 {
            return Err(PbxError::Model(
                ErrorInfo::new("degenerate-dimensions", "model needs components and states")
                    .with_context("max_components", dims.max_components)
                    .with_context("dim", dims.dim),
            ));
        }
        let gamma = Gamma::new(1.0_f64, 1.0).map_err(|err| {
            PbxError::Model(ErrorInfo::new("gamma-distribution", err.to_string()))
        })?;
        let weight = 1.0 / dims.max_components as f64;
        let components = (0..dims.max_components)
            .map(|_| {
                let mut profile: Vec<f64> = (0..dims.dim)
                    .map(|_| gamma.sample(rng.inner_mut()).max(1e-6))
                    .collect();
                let total: f64 = profile.iter().sum();
                profile.iter_mut().for_each(|p| *p /= total);
                MixtureComponent { profile, weight }
            })
            .collect();
        let allocation = (0..dims.n_sites)
            .map(|_| rng.index(dims.max_components))
            .collect();
        Ok(Self {
            alpha: 1.0,
            branch_alpha: 1.0,
            branch_beta: 10.0,
            branch_lengths: vec![0.1; dims.n_branch],
            exchangeabilities: vec![1.0; dims.n_rr],
            component_count: dims.max_components,
            components,
            dirichlet_weights: vec![1.0; dims.dim],
            allocation,
        })
    }

    /// Checks the state against `dims` and the model invariants.
    pub fn validate(&self, dims: &Dimensions) -> Result<(), PbxError> {
        let mismatch = |field: &str, expected: usize, found: usize| {
            PbxError::Model(
                ErrorInfo::new("dimension-mismatch", format!("{field} has the wrong length"))
                    .with_context("expected", expected)
                    .with_context("found", found),
            )
        };
        if self.branch_lengths.len() != dims.n_branch {
            return Err(mismatch("branch_lengths", dims.n_branch, self.branch_lengths.len()));
        }
        if self.exchangeabilities.len() != dims.n_rr {
            return Err(mismatch("exchangeabilities", dims.n_rr, self.exchangeabilities.len()));
        }
        if self.components.len() != dims.max_components {
            return Err(mismatch("components", dims.max_components, self.components.len()));
        }
        if self.dirichlet_weights.len() != dims.dim {
            return Err(mismatch("dirichlet_weights", dims.dim, self.dirichlet_weights.len()));
        }
        if self.allocation.len() != dims.n_sites {
            return Err(mismatch("allocation", dims.n_sites, self.allocation.len()));
        }
        for (index, component) in self.components.iter().enumerate() {
            if component.profile.len() != dims.dim {
                return Err(mismatch("profile", dims.dim, component.profile.len()));
            }
            if component.weight < 0.0 || !component.weight.is_finite() {
                return Err(PbxError::Model(
                    ErrorInfo::new("negative-weight", "mixture weights must be non-negative")
                        .with_context("component", index)
                        .with_context("weight", component.weight),
                ));
            }
        }
        if self.component_count == 0 || self.component_count > dims.max_components {
            return Err(PbxError::Model(
                ErrorInfo::new("component-count", "component count out of range")
                    .with_context("component_count", self.component_count)
                    .with_context("max_components", dims.max_components),
            ));
        }
        if let Some(site) = self
            .allocation
            .iter()
            .position(|&k| k >= self.component_count)
        {
            return Err(PbxError::Model(
                ErrorInfo::new("allocation-range", "allocation points past the active components")
                    .with_context("site", site)
                    .with_context("component", self.allocation[site])
                    .with_context("component_count", self.component_count),
            ));
        }
        Ok(())
    }

    /// Rescales every profile to sum to one.
    pub fn renormalize_profiles(&mut self) {
        for component in &mut self.components {
            let total: f64 = component.profile.iter().sum();
            if total > 0.0 {
                component.profile.iter_mut().for_each(|p| *p /= total);
            }
        }
    }

    /// Number of sites allocated to each component slot.
    pub fn occupancy(&self) -> Vec<usize> {
        let mut counts = vec![0; self.components.len()];
        for &k in &self.allocation {
            if let Some(count) = counts.get_mut(k) {
                *count += 1;
            }
        }
        counts
    }

    /// Moves `site` from its current component to `component`.
    pub fn reassign_site(&mut self, site: usize, component: usize) -> Result<(), PbxError> {
        if component >= self.component_count {
            return Err(PbxError::Model(
                ErrorInfo::new("allocation-range", "candidate component out of range")
                    .with_context("site", site)
                    .with_context("component", component)
                    .with_context("component_count", self.component_count),
            ));
        }
        let slot = self.allocation.get_mut(site).ok_or_else(|| {
            PbxError::Model(
                ErrorInfo::new("site-range", "site index out of range").with_context("site", site),
            )
        })?;
        *slot = component;
        Ok(())
    }

    /// Active component weights in component order.
    pub fn weights(&self) -> Vec<f64> {
        self.components[..self.component_count]
            .iter()
            .map(|component| component.weight)
            .collect()
    }

    /// Profile of the component currently explaining `site`.
    pub fn site_profile(&self, site: usize) -> &[f64] {
        &self.components[self.allocation[site]].profile
    }
}
