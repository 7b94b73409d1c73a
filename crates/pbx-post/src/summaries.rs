//! Analyses that only need the chain: mean exchangeabilities, mean site
//! profiles and the moment-matched empirical prior.

use std::io::{self, Write};

use pbx_core::errors::ErrorInfo;
use pbx_core::numeric::rr_index;
use pbx_core::PbxError;
use pbx_mcmc::ChainReader;
use pbx_model::{EmpiricalLayout, EmpiricalPrior, GammaPair, GlobalParameterState, ModelFlags};

use crate::report::{alphabet_header, Report};
use crate::schedule::{for_each_sample, require_samples, SampleSchedule};

/// Posterior mean of the exchangeabilities, each sample rescaled to mean one.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanRelativeRates {
    /// State alphabet used for the row labels.
    pub alphabet: Vec<char>,
    /// Mean value per exchangeability pair, packed upper-triangle order.
    pub values: Vec<f64>,
    /// Number of samples averaged.
    pub sample_size: usize,
}

impl Report for MeanRelativeRates {
    fn extension(&self) -> &'static str {
        "meanrr"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        alphabet_header(out, &self.alphabet)?;
        let dim = self.alphabet.len();
        for i in 0..dim {
            for j in i + 1..dim {
                let value = self.values[rr_index(i, j, dim)];
                writeln!(out, "{}\t{}\t{value}", self.alphabet[i], self.alphabet[j])?;
            }
        }
        Ok(())
    }
}

/// Averages the exchangeabilities over the scheduled samples.
pub fn relrates<R: ChainReader + ?Sized>(
    reader: &mut R,
    schedule: &SampleSchedule,
    alphabet: &[char],
) -> Result<MeanRelativeRates, PbxError> {
    let dim = alphabet.len();
    let n_rr = dim * dim.saturating_sub(1) / 2;
    let mut values = vec![0.0; n_rr];
    let sample_size = for_each_sample(reader, schedule, |position, state| {
        expect_len(position, "exchangeabilities", n_rr, state.exchangeabilities.len())?;
        let mean = state.exchangeabilities.iter().sum::<f64>() / n_rr as f64;
        for (slot, rr) in values.iter_mut().zip(&state.exchangeabilities) {
            *slot += rr / mean;
        }
        Ok(())
    })?;
    require_samples(sample_size, schedule)?;
    values.iter_mut().for_each(|v| *v /= sample_size as f64);
    Ok(MeanRelativeRates {
        alphabet: alphabet.to_vec(),
        values,
        sample_size,
    })
}

/// Posterior mean profile of every site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteProfiles {
    /// State alphabet used for the header.
    pub alphabet: Vec<char>,
    /// Mean profile per site.
    pub profiles: Vec<Vec<f64>>,
    /// Number of samples averaged.
    pub sample_size: usize,
}

impl Report for SiteProfiles {
    fn extension(&self) -> &'static str {
        "siteprofiles"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        alphabet_header(out, &self.alphabet)?;
        for (site, profile) in self.profiles.iter().enumerate() {
            write!(out, "{}", site + 1)?;
            for p in profile {
                write!(out, "\t{p}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Averages the profile of the component each site is allocated to.
pub fn site_profiles<R: ChainReader + ?Sized>(
    reader: &mut R,
    schedule: &SampleSchedule,
    alphabet: &[char],
    n_sites: usize,
) -> Result<SiteProfiles, PbxError> {
    let dim = alphabet.len();
    let mut profiles = vec![vec![0.0; dim]; n_sites];
    let sample_size = for_each_sample(reader, schedule, |position, state| {
        expect_len(position, "allocation", n_sites, state.allocation.len())?;
        for (site, sums) in profiles.iter_mut().enumerate() {
            let profile = state.site_profile(site);
            expect_len(position, "profile", dim, profile.len())?;
            for (sum, p) in sums.iter_mut().zip(profile) {
                *sum += p;
            }
        }
        Ok(())
    })?;
    require_samples(sample_size, schedule)?;
    for profile in &mut profiles {
        profile.iter_mut().for_each(|p| *p /= sample_size as f64);
    }
    Ok(SiteProfiles {
        alphabet: alphabet.to_vec(),
        profiles,
        sample_size,
    })
}

/// Moment-matched Gamma hyperparameters, ready to be read back as an
/// [`EmpiricalPrior`].
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorHyper {
    /// The fitted prior.
    pub prior: EmpiricalPrior,
    /// Number of samples used.
    pub sample_size: usize,
}

impl Report for PosteriorHyper {
    fn extension(&self) -> &'static str {
        "posthyper"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.prior.to_text().as_bytes())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn mean_variance(&self, n: usize) -> (f64, f64) {
        let n = n as f64;
        let mean = self.sum / n;
        let variance = self.sum_sq / n - mean * mean;
        (mean, variance.max(variance_floor(mean)))
    }

    /// `(mean² / var, mean / var)`.
    fn gamma_pair(&self, n: usize) -> GammaPair {
        let (mean, variance) = self.mean_variance(n);
        (mean * mean / variance, mean / variance)
    }
}

/// Lower bound on a sample variance; a constant trace gets a tight but
/// finite Gamma fit.
fn variance_floor(mean: f64) -> f64 {
    (mean * mean * 1e-8).max(f64::MIN_POSITIVE)
}

/// Fits the empirical prior read by `SetEmpiricalPrior`: Gamma pairs by
/// moment matching for alpha, Dirichlet weights, exchangeabilities and
/// branches `1..`, plus a Dirichlet concentration for a single fixed profile.
pub fn post_hyper<R: ChainReader + ?Sized>(
    reader: &mut R,
    schedule: &SampleSchedule,
    flags: &ModelFlags,
) -> Result<PosteriorHyper, PbxError> {
    let mut alpha = Moments::default();
    let mut weights: Vec<Moments> = Vec::new();
    let mut frequencies: Vec<Moments> = Vec::new();
    let mut rr: Vec<Moments> = Vec::new();
    let mut branches: Vec<Moments> = Vec::new();
    let mut layout: Option<EmpiricalLayout> = None;

    let sample_size = for_each_sample(reader, schedule, |position, state| {
        let current = EmpiricalLayout::from_flags(flags, state.component_count);
        match layout {
            None => {
                layout = Some(current);
                weights = vec![Moments::default(); state.dirichlet_weights.len()];
                frequencies = vec![Moments::default(); state.dirichlet_weights.len()];
                rr = vec![Moments::default(); state.exchangeabilities.len()];
                branches = vec![Moments::default(); state.branch_lengths.len()];
            }
            Some(first) if first != current => {
                return Err(PbxError::Data(
                    ErrorInfo::new("layout-changed", "component count changed the prior layout")
                        .with_context("position", position),
                ));
            }
            Some(_) => {}
        }
        accumulate(&state, position, &mut alpha, &mut weights, &mut frequencies, &mut rr, &mut branches)
    })?;
    require_samples(sample_size, schedule)?;
    let layout = layout.unwrap_or(EmpiricalLayout::from_flags(flags, 0));

    let pairs = |moments: &[Moments]| -> Vec<GammaPair> {
        moments.iter().map(|m| m.gamma_pair(sample_size)).collect()
    };
    let mut branch_lengths = pairs(&branches);
    if let Some(first) = branch_lengths.first_mut() {
        *first = (0.0, 0.0);
    }
    let prior = EmpiricalPrior {
        alpha: alpha.gamma_pair(sample_size),
        dirichlet_weights: layout.dirichlet_weights.then(|| pairs(&weights)),
        frequencies: layout
            .frequencies
            .then(|| dirichlet_concentrations(&frequencies, sample_size)),
        exchangeabilities: layout.exchangeabilities.then(|| pairs(&rr)),
        branch_lengths,
    };
    Ok(PosteriorHyper { prior, sample_size })
}

fn accumulate(
    state: &GlobalParameterState,
    position: usize,
    alpha: &mut Moments,
    weights: &mut [Moments],
    frequencies: &mut [Moments],
    rr: &mut [Moments],
    branches: &mut [Moments],
) -> Result<(), PbxError> {
    expect_len(position, "dirichlet_weights", weights.len(), state.dirichlet_weights.len())?;
    expect_len(position, "exchangeabilities", rr.len(), state.exchangeabilities.len())?;
    expect_len(position, "branch_lengths", branches.len(), state.branch_lengths.len())?;
    alpha.push(state.alpha);
    for (m, &value) in weights.iter_mut().zip(&state.dirichlet_weights) {
        m.push(value);
    }
    if let Some(component) = state.components.first() {
        for (m, &value) in frequencies.iter_mut().zip(&component.profile) {
            m.push(value);
        }
    }
    for (m, &value) in rr.iter_mut().zip(&state.exchangeabilities) {
        m.push(value);
    }
    for (m, &value) in branches.iter_mut().zip(&state.branch_lengths).skip(1) {
        m.push(value);
    }
    Ok(())
}

/// Dirichlet concentrations `conc · mean_k` with
/// `conc = Σ mean_k (1 - mean_k) / Σ var_k - 1`.
fn dirichlet_concentrations(frequencies: &[Moments], n: usize) -> Vec<f64> {
    let stats: Vec<(f64, f64)> = frequencies.iter().map(|m| m.mean_variance(n)).collect();
    let numerator: f64 = stats.iter().map(|(mean, _)| mean * (1.0 - mean)).sum();
    let variance: f64 = stats.iter().map(|(_, var)| var).sum();
    let concentration = numerator / variance - 1.0;
    stats.iter().map(|(mean, _)| concentration * mean).collect()
}

fn expect_len(position: usize, field: &str, expected: usize, found: usize) -> Result<(), PbxError> {
    if expected != found {
        return Err(PbxError::Data(
            ErrorInfo::new("chain-dimensions", format!("{field} does not match the alignment"))
                .with_context("position", position)
                .with_context("expected", expected)
                .with_context("found", found),
        ));
    }
    Ok(())
}
