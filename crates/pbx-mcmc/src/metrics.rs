use std::fs::File;
use std::io::Write;
use std::path::Path;

use indexmap::IndexSet;
use pbx_core::PbxError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-cycle metrics stored for CSV export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    /// Cycle number, counted from zero including burn-in.
    pub cycle: usize,
    /// Total log-likelihood after the cycle.
    pub log_likelihood: f64,
    /// Log density under the empirical prior, when one is installed.
    pub log_prior: Option<f64>,
    /// Number of components with at least one site.
    pub occupied_components: usize,
    /// Accepted profile proposals in the cycle.
    pub accepted_profiles: usize,
    /// Profile proposals issued in the cycle.
    pub proposed_profiles: usize,
    /// Accepted rate-shape proposals in the cycle.
    pub accepted_alpha: usize,
    /// Rate shape after the cycle.
    pub alpha: f64,
    /// Sum of branch lengths after the cycle.
    pub tree_length: f64,
}

/// Aggregate exploration summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCoverage {
    /// Number of distinct allocation vectors visited.
    pub distinct_allocations: usize,
    /// Mean log-likelihood over the recorded cycles.
    pub mean_log_likelihood: f64,
    /// Variance of the log-likelihood over the recorded cycles.
    pub log_likelihood_variance: f64,
    /// Accepted over proposed profile updates.
    pub profile_acceptance: f64,
}

impl RunCoverage {
    /// Coverage of a run without samples.
    pub fn empty() -> Self {
        Self {
            distinct_allocations: 0,
            mean_log_likelihood: 0.0,
            log_likelihood_variance: 0.0,
            profile_acceptance: 0.0,
        }
    }
}

/// Collects per-cycle metrics and the set of visited allocations.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    samples: Vec<MetricSample>,
    allocations: IndexSet<String>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample together with the allocation it was taken at.
    pub fn push_sample(&mut self, sample: MetricSample, allocation: &[usize]) {
        self.allocations.insert(allocation_signature(allocation));
        self.samples.push(sample);
    }

    /// Recorded samples in cycle order.
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Computes the aggregate coverage.
    pub fn coverage(&self) -> RunCoverage {
        if self.samples.is_empty() {
            return RunCoverage::empty();
        }
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().map(|s| s.log_likelihood).sum::<f64>() / n;
        let variance = if self.samples.len() > 1 {
            self.samples
                .iter()
                .map(|s| (s.log_likelihood - mean).powi(2))
                .sum::<f64>()
                / n
        } else {
            0.0
        };
        let proposed: usize = self.samples.iter().map(|s| s.proposed_profiles).sum();
        let accepted: usize = self.samples.iter().map(|s| s.accepted_profiles).sum();
        RunCoverage {
            distinct_allocations: self.allocations.len(),
            mean_log_likelihood: mean,
            log_likelihood_variance: variance,
            profile_acceptance: if proposed > 0 {
                accepted as f64 / proposed as f64
            } else {
                0.0
            },
        }
    }

    /// Writes the samples as CSV; a missing prior is an empty field.
    pub fn write_csv(&self, path: &Path) -> Result<(), PbxError> {
        let mut file = File::create(path).map_err(|err| PbxError::io("metrics-create", err, path))?;
        let mut write = |line: String| {
            writeln!(file, "{line}").map_err(|err| PbxError::io("metrics-write", err, path))
        };
        write(
            "cycle,log_likelihood,log_prior,occupied_components,accepted_profiles,\
             proposed_profiles,accepted_alpha,alpha,tree_length"
                .to_string(),
        )?;
        for sample in &self.samples {
            let prior = sample
                .log_prior
                .map(|value| value.to_string())
                .unwrap_or_default();
            write(format!(
                "{},{},{},{},{},{},{},{},{}",
                sample.cycle,
                sample.log_likelihood,
                prior,
                sample.occupied_components,
                sample.accepted_profiles,
                sample.proposed_profiles,
                sample.accepted_alpha,
                sample.alpha,
                sample.tree_length,
            ))?;
        }
        Ok(())
    }
}

fn allocation_signature(allocation: &[usize]) -> String {
    let mut hasher = Sha256::new();
    for &k in allocation {
        hasher.update((k as u64).to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
