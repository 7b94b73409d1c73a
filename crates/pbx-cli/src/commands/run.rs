use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use pbx_mcmc::{run as run_sampler, RunConfig};
use pbx_model::{Alignment, StarTreeEngine};
use tracing::info;

use crate::write_json;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML configuration describing the sampler run.
    #[arg(long)]
    pub config: PathBuf,
    /// JSON alignment document.
    #[arg(long)]
    pub alignment: PathBuf,
    /// Run directory; overrides `output.run_directory`.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = RunConfig::load(&args.config)?;
    if let Some(out) = &args.out {
        config.output.run_directory = Some(out.clone());
    }
    let alignment = Alignment::load(&args.alignment)?;
    let engine = StarTreeEngine::new(config.model.rate_categories);

    let summary = run_sampler(&config, alignment, engine)?;

    if let Some(dir) = &config.output.run_directory {
        write_json(dir.join("summary.json"), &summary)?;
        std::fs::copy(&args.config, dir.join("config.yaml")).ok();
    }
    info!(
        cycles = summary.cycles,
        samples = summary.samples_written,
        log_likelihood = summary.final_log_likelihood,
        hash = %summary.final_hash,
        "run finished"
    );
    Ok(())
}
