use std::ops::Range;

use pbx_core::numeric::{discrete_gamma_rates, rr_index};
use pbx_core::{log_sum_exp, RngHandle};
use serde::{Deserialize, Serialize};

use crate::alignment::SequenceStore;
use crate::state::GlobalParameterState;

/// Per-site sufficient statistics reported by a likelihood engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSuffStat {
    /// Substitution count relevant to the site rate.
    pub rate_count: f64,
    /// Exposure (summed branch length) relevant to the site rate.
    pub rate_beta: f64,
    /// Substitution counts per exchangeability pair.
    pub rr_count: Vec<f64>,
    /// Exposure per exchangeability pair.
    pub rr_beta: Vec<f64>,
}

/// Tree-likelihood collaborator consumed by workers.
///
/// Evaluation always follows the allocation stored in the state passed to
/// [`LikelihoodEngine::recompute_conditional_likelihoods`]; callers force an
/// allocation by editing the state before recomputing.
pub trait LikelihoodEngine: Send {
    /// Refreshes cached matrices after a parameter update.
    fn update_matrices(&mut self, state: &GlobalParameterState);

    /// Recomputes and caches site log-likelihoods for `sites`.
    fn recompute_conditional_likelihoods(
        &mut self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        sites: Range<usize>,
    );

    /// Cached log-likelihood of `site` from the last recomputation.
    fn site_log_likelihood(&self, site: usize) -> f64;

    /// Sufficient statistics of `site` under its current allocation.
    fn site_suff_stat(
        &self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        site: usize,
    ) -> SiteSuffStat;

    /// Posterior mean evolutionary rate of `site`.
    fn site_rate(&self, state: &GlobalParameterState, data: &dyn SequenceStore, site: usize)
        -> f64;

    /// Posterior probabilities of the ancestral (root) state of `site`.
    fn root_state_posterior(
        &self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        site: usize,
    ) -> Vec<f64>;

    /// Simulates one column of `n_taxa` states under the current parameters.
    fn simulate_site(
        &self,
        state: &GlobalParameterState,
        site: usize,
        n_taxa: usize,
        rng: &mut RngHandle,
    ) -> Vec<usize>;
}

/// F81 likelihood on a star tree (one branch per taxon) with discrete Gamma rates.
///
/// Exchangeabilities do not enter the F81 likelihood; they only receive
/// sufficient statistics from substitutions mapped onto the most probable root
/// state.
#[derive(Debug, Clone)]
pub struct StarTreeEngine {
    categories: usize,
    rates: Vec<f64>,
    site_logl: Vec<f64>,
}

impl StarTreeEngine {
    /// Creates an engine using `categories` discrete Gamma rate classes.
    pub fn new(categories: usize) -> Self {
        let categories = categories.max(1);
        Self {
            categories,
            rates: vec![1.0; categories],
            site_logl: Vec::new(),
        }
    }

    /// Current rate of each category.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    fn branch_length(state: &GlobalParameterState, taxon: usize) -> f64 {
        if state.branch_lengths.is_empty() {
            return 0.0;
        }
        state.branch_lengths[taxon % state.branch_lengths.len()]
    }

    /// Log-likelihood of the column for each (rate category, root state).
    fn conditional_table(
        &self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        site: usize,
    ) -> Vec<Vec<f64>> {
        let profile = state.site_profile(site);
        self.rates
            .iter()
            .map(|&rate| {
                profile
                    .iter()
                    .enumerate()
                    .map(|(root, &pi_root)| {
                        let mut logl = pi_root.ln();
                        for taxon in 0..data.n_taxa() {
                            if let Some(observed) = data.state(taxon, site) {
                                let stay = (-rate * Self::branch_length(state, taxon)).exp();
                                let mut p = (1.0 - stay) * profile[observed];
                                if observed == root {
                                    p += stay;
                                }
                                logl += p.ln();
                            }
                        }
                        logl
                    })
                    .collect()
            })
            .collect()
    }

    fn site_logl_from_table(&self, table: &[Vec<f64>]) -> f64 {
        let per_category: Vec<f64> = table.iter().map(|row| log_sum_exp(row)).collect();
        log_sum_exp(&per_category) - (self.categories as f64).ln()
    }
}

impl LikelihoodEngine for StarTreeEngine {
    fn update_matrices(&mut self, state: &GlobalParameterState) {
        self.rates = discrete_gamma_rates(state.alpha, self.categories);
    }

    fn recompute_conditional_likelihoods(
        &mut self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        sites: Range<usize>,
    ) {
        if self.site_logl.len() < data.n_sites() {
            self.site_logl.resize(data.n_sites(), 0.0);
        }
        for site in sites {
            let table = self.conditional_table(state, data, site);
            self.site_logl[site] = self.site_logl_from_table(&table);
        }
    }

    fn site_log_likelihood(&self, site: usize) -> f64 {
        self.site_logl.get(site).copied().unwrap_or(0.0)
    }

    fn site_suff_stat(
        &self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        site: usize,
    ) -> SiteSuffStat {
        let dim = state.dirichlet_weights.len();
        let n_rr = state.exchangeabilities.len();
        let posterior = self.root_state_posterior(state, data, site);
        let root = posterior
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (k, &p)| {
                if p > best.1 {
                    (k, p)
                } else {
                    best
                }
            })
            .0;
        let profile = state.site_profile(site);
        let mut stat = SiteSuffStat {
            rate_count: 0.0,
            rate_beta: 0.0,
            rr_count: vec![0.0; n_rr],
            rr_beta: vec![0.0; n_rr],
        };
        for taxon in 0..data.n_taxa() {
            let Some(observed) = data.state(taxon, site) else {
                continue;
            };
            let length = Self::branch_length(state, taxon);
            stat.rate_beta += length;
            for other in (0..dim).filter(|&other| other != root) {
                stat.rr_beta[rr_index(root, other, dim)] += length * profile[other];
            }
            if observed != root {
                stat.rate_count += 1.0;
                stat.rr_count[rr_index(root, observed, dim)] += 1.0;
            }
        }
        stat
    }

    fn site_rate(
        &self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        site: usize,
    ) -> f64 {
        let table = self.conditional_table(state, data, site);
        let per_category: Vec<f64> = table.iter().map(|row| log_sum_exp(row)).collect();
        let max = per_category
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (&logl, &rate) in per_category.iter().zip(&self.rates) {
            let w = (logl - max).exp();
            numerator += w * rate;
            denominator += w;
        }
        if denominator > 0.0 {
            numerator / denominator
        } else {
            1.0
        }
    }

    fn root_state_posterior(
        &self,
        state: &GlobalParameterState,
        data: &dyn SequenceStore,
        site: usize,
    ) -> Vec<f64> {
        let table = self.conditional_table(state, data, site);
        let dim = state.site_profile(site).len();
        let per_root: Vec<f64> = (0..dim)
            .map(|root| {
                let column: Vec<f64> = table.iter().map(|row| row[root]).collect();
                log_sum_exp(&column)
            })
            .collect();
        let total = log_sum_exp(&per_root);
        per_root.iter().map(|&logl| (logl - total).exp()).collect()
    }

    fn simulate_site(
        &self,
        state: &GlobalParameterState,
        site: usize,
        n_taxa: usize,
        rng: &mut RngHandle,
    ) -> Vec<usize> {
        let profile = state.site_profile(site);
        let draw = |rng: &mut RngHandle| {
            pbx_core::finite_discrete(profile, rng).unwrap_or(0)
        };
        let category = ((rng.uniform() * self.categories as f64) as usize).min(self.categories - 1);
        let rate = self.rates[category];
        let root = draw(rng);
        (0..n_taxa)
            .map(|taxon| {
                let stay = (-rate * Self::branch_length(state, taxon)).exp();
                if rng.uniform() < stay {
                    root
                } else {
                    draw(rng)
                }
            })
            .collect()
    }
}
