use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{ArgGroup, Args};
use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_mcmc::{count_snapshots, JsonLinesChain, RunConfig, RunManifest};
use pbx_model::{Alignment, SequenceStore, StarTreeEngine};
use pbx_post::{
    ancestral, cross_validation, post_hyper, posterior_predictive, relrates, report_path,
    require_workers, site_log_likelihood, site_profiles, site_rates, write_report,
    EnsembleOptions, Report, SampleSchedule,
};
use tracing::info;

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["ppred", "cv", "sitelogl", "anc", "ss", "rr", "rates", "posthyper"])
))]
pub struct ReadpbArgs {
    /// Chain stem: snapshots are read from `<name>.chain`, reports go to `<name>.<ext>`.
    pub name: PathBuf,
    /// Posterior predictive check of site diversity.
    #[arg(long)]
    pub ppred: bool,
    /// Cross-validation score on a held-out alignment.
    #[arg(long, value_name = "TESTDATA")]
    pub cv: Option<PathBuf>,
    /// Posterior mean log-likelihood of every site.
    #[arg(long)]
    pub sitelogl: bool,
    /// Ancestral state probabilities.
    #[arg(long)]
    pub anc: bool,
    /// Posterior mean site profiles.
    #[arg(long)]
    pub ss: bool,
    /// Posterior mean exchangeabilities.
    #[arg(long)]
    pub rr: bool,
    /// Posterior mean site rates.
    #[arg(long)]
    pub rates: bool,
    /// Moment-matched empirical prior for a later run.
    #[arg(long)]
    pub posthyper: bool,
    /// Snapshots discarded at the start; a fifth of the chain by default.
    #[arg(short = 'x', long)]
    pub burnin: Option<usize>,
    /// Stride between retained snapshots.
    #[arg(long, default_value_t = 1)]
    pub every: usize,
    /// Position past the last snapshot read; the end of the chain by default.
    #[arg(long)]
    pub until: Option<usize>,
    /// Workers replaying snapshots in the likelihood modes.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,
    /// Alignment the chain was sampled on.
    #[arg(long)]
    pub alignment: Option<PathBuf>,
    /// Run manifest holding the model settings; `manifest.json` next to the chain by default.
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Predictive,
    CrossValidation(PathBuf),
    SiteLogLikelihood,
    Ancestral,
    SiteProfiles,
    RelativeRates,
    SiteRates,
    PosteriorHyper,
}

impl Mode {
    fn from_args(args: &ReadpbArgs) -> Self {
        match &args.cv {
            Some(test) => Mode::CrossValidation(test.clone()),
            None if args.ppred => Mode::Predictive,
            None if args.sitelogl => Mode::SiteLogLikelihood,
            None if args.anc => Mode::Ancestral,
            None if args.ss => Mode::SiteProfiles,
            None if args.rr => Mode::RelativeRates,
            None if args.rates => Mode::SiteRates,
            None => Mode::PosteriorHyper,
        }
    }

    fn needs_ensemble(&self) -> bool {
        matches!(
            self,
            Mode::Predictive | Mode::CrossValidation(_) | Mode::SiteLogLikelihood
        )
    }
}

pub fn run(args: &ReadpbArgs) -> Result<(), Box<dyn Error>> {
    let mode = Mode::from_args(args);
    let config = load_config(args)?;
    let options = EnsembleOptions {
        workers: args.workers,
        master_seed: config.seed_policy.master_seed,
        flags: config.model.flags,
    };
    if mode.needs_ensemble() {
        require_workers(&options)?;
    }

    let chain_path = report_path(&args.name, "chain");
    let size = count_snapshots(&chain_path)?;
    let schedule = SampleSchedule::resolve(size, args.burnin, args.every, args.until)?;
    info!(
        chain = %chain_path.display(),
        size,
        burnin = schedule.burnin,
        every = schedule.every,
        until = schedule.until,
        "reading chain"
    );
    let mut reader = JsonLinesChain::open(&chain_path)?;
    let engine = StarTreeEngine::new(config.model.rate_categories);

    let report: Box<dyn Report> = match mode {
        Mode::PosteriorHyper => Box::new(post_hyper(&mut reader, &schedule, &config.model.flags)?),
        Mode::RelativeRates => {
            let data = require_alignment(args)?;
            Box::new(relrates(&mut reader, &schedule, data.alphabet())?)
        }
        Mode::SiteProfiles => {
            let data = require_alignment(args)?;
            Box::new(site_profiles(&mut reader, &schedule, data.alphabet(), data.n_sites())?)
        }
        Mode::SiteRates => {
            let data = require_alignment(args)?;
            let mut engine = engine;
            Box::new(site_rates(&mut reader, &schedule, &mut engine, &data)?)
        }
        Mode::Ancestral => {
            let data = require_alignment(args)?;
            let mut engine = engine;
            Box::new(ancestral(&mut reader, &schedule, &mut engine, &data, data.alphabet())?)
        }
        Mode::SiteLogLikelihood => {
            let data = require_alignment(args)?;
            Box::new(site_log_likelihood(&mut reader, &schedule, &options, data, engine)?)
        }
        Mode::Predictive => {
            let data = require_alignment(args)?;
            Box::new(posterior_predictive(&mut reader, &schedule, &options, data, engine)?)
        }
        Mode::CrossValidation(test) => {
            let data = Alignment::load(&test)?;
            Box::new(cross_validation(&mut reader, &schedule, &options, data, engine)?)
        }
    };

    let path = write_report(&args.name, report.as_ref())?;
    info!(report = %path.display(), "report written");
    Ok(())
}

fn load_config(args: &ReadpbArgs) -> Result<RunConfig, PbxError> {
    let path = match &args.manifest {
        Some(path) => path.clone(),
        None => sibling(&args.name, "manifest.json"),
    };
    Ok(RunManifest::load(&path)?.config)
}

fn sibling(name: &Path, file: &str) -> PathBuf {
    match name.parent() {
        Some(parent) => parent.join(file),
        None => PathBuf::from(file),
    }
}

fn require_alignment(args: &ReadpbArgs) -> Result<Alignment, PbxError> {
    match &args.alignment {
        Some(path) => Alignment::load(path),
        None => Err(PbxError::Config(
            ErrorInfo::new("readpb-alignment", "this analysis needs the alignment")
                .with_hint("pass --alignment <file>"),
        )),
    }
}
