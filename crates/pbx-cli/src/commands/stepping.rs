use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use pbx_mcmc::{run_stepping, ChainReader, JsonLinesChain, RunConfig, SteppingRequest};
use pbx_model::{Alignment, GlobalParameterState, StarTreeEngine};
use tracing::info;

use crate::write_json;

#[derive(Args, Debug)]
pub struct SteppingArgs {
    /// YAML configuration of the model and ensemble.
    #[arg(long)]
    pub config: PathBuf,
    /// JSON alignment document.
    #[arg(long)]
    pub alignment: PathBuf,
    /// Chain whose last snapshot is the starting point; a fresh state otherwise.
    #[arg(long)]
    pub start: Option<PathBuf>,
    /// Allocation draws per site, split between the workers.
    #[arg(long, default_value_t = 10)]
    pub repeats: usize,
    /// Keep the allocation unchanged after each site.
    #[arg(long)]
    pub restore: bool,
    /// Fraction of sites kept unmasked.
    #[arg(long)]
    pub empirical_frac: Option<f64>,
    /// Number of alignment cells kept unmasked.
    #[arg(long)]
    pub cutoff: Option<usize>,
    /// Where to write the per-site estimates as JSON.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &SteppingArgs) -> Result<(), Box<dyn Error>> {
    let config = RunConfig::load(&args.config)?;
    let alignment = Alignment::load(&args.alignment)?;
    let engine = StarTreeEngine::new(config.model.rate_categories);
    let start = match &args.start {
        Some(path) => last_snapshot(&mut JsonLinesChain::open(path)?)?,
        None => None,
    };
    let request = SteppingRequest {
        repeats: args.repeats,
        restore: args.restore,
        empirical_frac: args.empirical_frac,
        cell_cutoff: args.cutoff,
    };

    let estimate = run_stepping(&config, alignment, engine, start, &request)?;

    write_json(&args.out, &estimate)?;
    info!(sites = estimate.sites.len(), total = estimate.total, "stepping finished");
    Ok(())
}

fn last_snapshot<R: ChainReader>(
    reader: &mut R,
) -> Result<Option<GlobalParameterState>, Box<dyn Error>> {
    let mut last = None;
    while let Some(state) = reader.next_snapshot()? {
        last = Some(state);
    }
    Ok(last)
}
