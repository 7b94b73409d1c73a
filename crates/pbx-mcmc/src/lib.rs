#![deny(missing_docs)]
#![doc = include_str!("../docs/ensemble-protocol.md")]

//! Coordinator, workers and sampler driver of the distributed CAT-GTR
//! mixture sampler.

/// Chain files of parameter snapshots.
pub mod chain;
/// YAML configuration schema and defaults.
pub mod config;
/// Coordinator side of every protocol round.
pub mod coordinator;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Spawning of coordinator plus worker ensembles.
pub mod ensemble;
/// Signal-to-handler registries with fallback.
pub mod handlers;
/// Run manifest serialization helpers.
pub mod manifest;
/// Data backups, stepping ranks and masking.
pub mod masking;
/// Metrics collection and coverage summaries.
pub mod metrics;
/// Coordinator-side hyperparameter updates.
pub mod moves;
pub mod resample;
/// Sampler and stepping-session entry points.
pub mod sampler;
pub mod stepping;
/// Worker dispatch loop and signal handlers.
pub mod worker;

pub use chain::{count_snapshots, ChainReader, ChainWriter, JsonLinesChain};
pub use config::{ModelConfig, MoveCounts, OutputConfig, RunConfig, SeedPolicy};
pub use coordinator::{Coordinator, RateSuffStats, RrSuffStats};
pub use ensemble::{dimensions_for, spawn, EnsembleSettings};
pub use handlers::{Flow, Handler, HandlerRegistry};
pub use manifest::RunManifest;
pub use metrics::{MetricSample, MetricsRecorder, RunCoverage};
pub use sampler::{run, run_stepping, RunSummary, SteppingRequest};
pub use stepping::{estimate_marginal, MarginalEstimate, SteppingOutcome};
pub use worker::{Worker, WorkerLocalReplica};
