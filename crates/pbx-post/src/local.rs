//! Analyses evaluated by one likelihood engine on the reading process.

use std::io::{self, Write};

use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_mcmc::ChainReader;
use pbx_model::{GlobalParameterState, LikelihoodEngine, SequenceStore};

use crate::report::Report;
use crate::schedule::{for_each_sample, require_samples, SampleSchedule};

/// Posterior mean rate of every site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRates {
    /// Mean rate per site.
    pub rates: Vec<f64>,
    /// Number of samples averaged.
    pub sample_size: usize,
}

impl Report for SiteRates {
    fn extension(&self) -> &'static str {
        "siterates"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "site\trate")?;
        for (site, rate) in self.rates.iter().enumerate() {
            writeln!(out, "{}\t{rate}", site + 1)?;
        }
        Ok(())
    }
}

/// Averages [`LikelihoodEngine::site_rate`] over the scheduled samples.
pub fn site_rates<R, E>(
    reader: &mut R,
    schedule: &SampleSchedule,
    engine: &mut E,
    data: &dyn SequenceStore,
) -> Result<SiteRates, PbxError>
where
    R: ChainReader + ?Sized,
    E: LikelihoodEngine + ?Sized,
{
    let mut rates = vec![0.0; data.n_sites()];
    let sample_size = for_each_sample(reader, schedule, |position, state| {
        check_sites(&state, data, position)?;
        engine.update_matrices(&state);
        for (site, sum) in rates.iter_mut().enumerate() {
            *sum += engine.site_rate(&state, data, site);
        }
        Ok(())
    })?;
    require_samples(sample_size, schedule)?;
    rates.iter_mut().for_each(|r| *r /= sample_size as f64);
    Ok(SiteRates { rates, sample_size })
}

/// Posterior probabilities of the ancestral state of every site.
#[derive(Debug, Clone, PartialEq)]
pub struct AncestralStates {
    /// State alphabet used for the header.
    pub alphabet: Vec<char>,
    /// Mean posterior per site and state.
    pub probabilities: Vec<Vec<f64>>,
    /// Number of samples averaged.
    pub sample_size: usize,
}

impl Report for AncestralStates {
    fn extension(&self) -> &'static str {
        "ancstateprob"
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "site")?;
        for state in &self.alphabet {
            write!(out, "\t{state}")?;
        }
        writeln!(out)?;
        for (site, row) in self.probabilities.iter().enumerate() {
            write!(out, "{}", site + 1)?;
            for p in row {
                write!(out, "\t{p}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Averages [`LikelihoodEngine::root_state_posterior`] over the scheduled samples.
pub fn ancestral<R, E>(
    reader: &mut R,
    schedule: &SampleSchedule,
    engine: &mut E,
    data: &dyn SequenceStore,
    alphabet: &[char],
) -> Result<AncestralStates, PbxError>
where
    R: ChainReader + ?Sized,
    E: LikelihoodEngine + ?Sized,
{
    let mut probabilities = vec![vec![0.0; data.dim()]; data.n_sites()];
    let sample_size = for_each_sample(reader, schedule, |position, state| {
        check_sites(&state, data, position)?;
        engine.update_matrices(&state);
        for (site, sums) in probabilities.iter_mut().enumerate() {
            let posterior = engine.root_state_posterior(&state, data, site);
            for (sum, p) in sums.iter_mut().zip(posterior) {
                *sum += p;
            }
        }
        Ok(())
    })?;
    require_samples(sample_size, schedule)?;
    for row in &mut probabilities {
        row.iter_mut().for_each(|p| *p /= sample_size as f64);
    }
    Ok(AncestralStates {
        alphabet: alphabet.to_vec(),
        probabilities,
        sample_size,
    })
}

pub(crate) fn check_sites(
    state: &GlobalParameterState,
    data: &dyn SequenceStore,
    position: usize,
) -> Result<(), PbxError> {
    if state.allocation.len() != data.n_sites() || state.dirichlet_weights.len() != data.dim() {
        return Err(PbxError::Data(
            ErrorInfo::new("chain-dimensions", "snapshot does not match the alignment")
                .with_context("position", position)
                .with_context("snapshot_sites", state.allocation.len())
                .with_context("alignment_sites", data.n_sites()),
        ));
    }
    Ok(())
}
