use std::fs;
use std::path::{Path, PathBuf};

use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_model::ModelFlags;
use serde::{Deserialize, Serialize};

/// YAML-configurable parameters governing a sampler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of full cycles to execute.
    pub cycles: usize,
    /// Number of initial cycles that are not written to the chain.
    #[serde(default)]
    pub burn_in: usize,
    /// Keep every `thinning`-th cycle after burn-in.
    #[serde(default = "default_thinning")]
    pub thinning: usize,
    /// Number of worker participants (the coordinator is extra).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Mixture model settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Number and size of the moves performed per cycle.
    #[serde(default)]
    pub moves: MoveCounts,
    /// Master seed and substream policy.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Output layout.
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_thinning() -> usize {
    1
}

fn default_workers() -> usize {
    2
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cycles: 100,
            burn_in: 0,
            thinning: 1,
            workers: default_workers(),
            model: ModelConfig::default(),
            moves: MoveCounts::default(),
            seed_policy: SeedPolicy::default(),
            output: OutputConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parses a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PbxError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|err| {
            PbxError::Config(ErrorInfo::new("config-parse", err.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, PbxError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PbxError::Config(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        Self::from_yaml_str(&contents).map_err(|err| match err {
            PbxError::Config(info) => PbxError::Config(info.with_context("path", path.display())),
            other => other,
        })
    }

    /// Rejects settings no session can run with.
    pub fn validate(&self) -> Result<(), PbxError> {
        let invalid = |field: &str, value: String, hint: &str| {
            PbxError::Config(
                ErrorInfo::new("config-invalid", format!("{field} is out of range"))
                    .with_context("field", field)
                    .with_context("value", value)
                    .with_hint(hint),
            )
        };
        if self.workers == 0 {
            return Err(invalid(
                "workers",
                self.workers.to_string(),
                "likelihood computations need at least one worker",
            ));
        }
        if self.thinning == 0 {
            return Err(invalid("thinning", "0".into(), "use 1 to keep every cycle"));
        }
        if self.model.max_components == 0 {
            return Err(invalid("model.max_components", "0".into(), "use at least one component"));
        }
        if self.model.rate_categories == 0 {
            return Err(invalid("model.rate_categories", "0".into(), "use at least one category"));
        }
        if !(self.moves.profile_step > 0.0 && self.moves.profile_step.is_finite()) {
            return Err(invalid(
                "moves.profile_step",
                self.moves.profile_step.to_string(),
                "profile steps must be positive",
            ));
        }
        if !(self.moves.alpha_step > 0.0 && self.moves.alpha_step.is_finite()) {
            return Err(invalid(
                "moves.alpha_step",
                self.moves.alpha_step.to_string(),
                "alpha steps must be positive",
            ));
        }
        Ok(())
    }
}

/// Mixture model settings shared by every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of component slots.
    #[serde(default = "default_max_components")]
    pub max_components: usize,
    /// Number of discrete Gamma rate categories.
    #[serde(default = "default_rate_categories")]
    pub rate_categories: usize,
    /// Which hyperparameters are free.
    #[serde(default)]
    pub flags: ModelFlags,
    /// Empirical-Bayes prior produced by a previous `post-hyper` analysis.
    #[serde(default)]
    pub empirical_prior: Option<PathBuf>,
}

fn default_max_components() -> usize {
    4
}

fn default_rate_categories() -> usize {
    4
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_components: default_max_components(),
            rate_categories: default_rate_categories(),
            flags: ModelFlags::default(),
            empirical_prior: None,
        }
    }
}

/// Number of repetitions of each move per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveCounts {
    /// Gibbs sweeps over every site allocation.
    #[serde(default = "default_move_reps")]
    pub realloc_reps: usize,
    /// Metropolis updates per profile.
    #[serde(default = "default_move_reps")]
    pub profile_reps: usize,
    /// Half-width of the profile pair perturbation.
    #[serde(default = "default_profile_step")]
    pub profile_step: f64,
    /// Metropolis updates of the rate shape.
    #[serde(default = "default_move_reps")]
    pub alpha_reps: usize,
    /// Log-scale step of the rate shape proposal.
    #[serde(default = "default_alpha_step")]
    pub alpha_step: f64,
}

fn default_move_reps() -> usize {
    1
}

fn default_profile_step() -> f64 {
    0.1
}

fn default_alpha_step() -> f64 {
    0.5
}

impl Default for MoveCounts {
    fn default() -> Self {
        Self {
            realloc_reps: default_move_reps(),
            profile_reps: default_move_reps(),
            profile_step: default_profile_step(),
            alpha_reps: default_move_reps(),
            alpha_step: default_alpha_step(),
        }
    }
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed used for the run.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label recorded in manifests.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x00CA_7677_5EED_0001_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

/// Output directory layout configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for run artefacts. Nothing is written when unset.
    #[serde(default)]
    pub run_directory: Option<PathBuf>,
    /// Chain filename relative to `run_directory`.
    #[serde(default = "default_chain_filename")]
    pub chain_file: PathBuf,
    /// Metrics filename relative to `run_directory`.
    #[serde(default = "default_metrics_filename")]
    pub metrics_file: PathBuf,
    /// Manifest filename relative to `run_directory`.
    #[serde(default = "default_manifest_filename")]
    pub manifest_file: PathBuf,
}

fn default_chain_filename() -> PathBuf {
    PathBuf::from("run.chain")
}

fn default_metrics_filename() -> PathBuf {
    PathBuf::from("metrics.csv")
}

fn default_manifest_filename() -> PathBuf {
    PathBuf::from("manifest.json")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            run_directory: None,
            chain_file: default_chain_filename(),
            metrics_file: default_metrics_filename(),
            manifest_file: default_manifest_filename(),
        }
    }
}
