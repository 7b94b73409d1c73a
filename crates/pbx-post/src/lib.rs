#![deny(missing_docs)]

//! Post-processing of pbx chain files: posterior summaries computed on the
//! reading process and likelihood analyses that replay snapshots through a
//! worker ensemble.

pub mod likelihood;
pub mod local;
/// Report files written next to the chain.
pub mod report;
/// Burn-in, stride and bound of the snapshots an analysis reads.
pub mod schedule;
/// Posterior means and empirical hyperpriors.
pub mod summaries;

pub use likelihood::{
    cross_validation, posterior_predictive, require_workers, site_diversity, site_log_likelihood,
    CrossValidation, EnsembleOptions, PosteriorPredictive, SiteLogLikelihoods,
};
pub use local::{ancestral, site_rates, AncestralStates, SiteRates};
pub use report::{report_path, write_report, Report};
pub use schedule::{for_each_sample, require_samples, SampleSchedule};
pub use summaries::{
    post_hyper, relrates, site_profiles, MeanRelativeRates, PosteriorHyper, SiteProfiles,
};
