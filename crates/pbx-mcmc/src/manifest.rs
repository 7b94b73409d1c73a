use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;

/// Structured record of a completed sampler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Configuration used for the run.
    pub config: RunConfig,
    /// Master seed from which every stream was derived.
    pub master_seed: u64,
    /// Seed label captured from the configuration.
    pub seed_label: Option<String>,
    /// Canonical hash of the terminal parameter state.
    pub final_hash: String,
    /// Number of snapshots written to the chain.
    pub samples_written: usize,
    /// Chain file, relative to the run directory.
    pub chain_file: Option<PathBuf>,
    /// Metrics file, relative to the run directory.
    pub metrics_file: Option<PathBuf>,
    /// Time the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunManifest {
    /// Writes the manifest to a JSON file.
    pub fn write(&self, path: &Path) -> Result<(), PbxError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PbxError::io("manifest-mkdir", err, parent))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            PbxError::Serde(
                ErrorInfo::new("manifest-serialize", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        fs::write(path, json).map_err(|err| PbxError::io("manifest-write", err, path))
    }

    /// Loads a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, PbxError> {
        let contents =
            fs::read_to_string(path).map_err(|err| PbxError::io("manifest-read", err, path))?;
        serde_json::from_str(&contents).map_err(|err| {
            PbxError::Serde(
                ErrorInfo::new("manifest-parse", err.to_string())
                    .with_context("path", path.display()),
            )
        })
    }
}
