//! Data snapshots and the two masking schemes used by stepping sessions.

use pbx_core::errors::ErrorInfo;
use pbx_core::{PbxError, RngHandle};
use pbx_model::SequenceStore;
use serde::{Deserialize, Serialize};

/// Immutable copy of every cell of an alignment, taken when a stepping
/// session is prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    n_taxa: usize,
    n_sites: usize,
    cells: Vec<Option<usize>>,
}

impl DataSnapshot {
    /// Copies the current content of `data`.
    pub fn capture(data: &dyn SequenceStore) -> Self {
        let (n_taxa, n_sites) = (data.n_taxa(), data.n_sites());
        let mut cells = Vec::with_capacity(n_taxa * n_sites);
        for taxon in 0..n_taxa {
            for site in 0..n_sites {
                cells.push(data.state(taxon, site));
            }
        }
        Self {
            n_taxa,
            n_sites,
            cells,
        }
    }

    /// Backed-up state of one cell.
    pub fn state(&self, taxon: usize, site: usize) -> Option<usize> {
        self.cells[taxon * self.n_sites + site]
    }

    /// Number of taxa in the snapshot.
    pub fn n_taxa(&self) -> usize {
        self.n_taxa
    }

    /// Number of sites in the snapshot.
    pub fn n_sites(&self) -> usize {
        self.n_sites
    }
}

/// Site and cell permutations shared by all participants of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteppingRanks {
    /// Rank of every site, a permutation of `0..n_sites`.
    pub site_rank: Vec<usize>,
    /// Rank of every cell indexed `site * n_taxa + taxon`.
    pub cell_rank: Vec<usize>,
}

impl SteppingRanks {
    /// Draws both permutations.
    pub fn random(n_sites: usize, n_taxa: usize, rng: &mut RngHandle) -> Self {
        Self {
            site_rank: rng.permutation(n_sites),
            cell_rank: rng.permutation(n_sites * n_taxa),
        }
    }

    /// Wire form of the site permutation.
    pub fn site_buffer(&self) -> Vec<i64> {
        self.site_rank.iter().map(|&r| r as i64).collect()
    }

    /// Wire form of the cell permutation.
    pub fn cell_buffer(&self) -> Vec<i64> {
        self.cell_rank.iter().map(|&r| r as i64).collect()
    }

    /// Rebuilds ranks received from the coordinator, rejecting buffers that
    /// are not permutations.
    pub fn from_buffers(site: &[i64], cell: &[i64]) -> Result<Self, PbxError> {
        Ok(Self {
            site_rank: to_ranks(site, "site_rank")?,
            cell_rank: to_ranks(cell, "cell_rank")?,
        })
    }

    /// Restores cells ranked below `cutoff` from `backup` and masks the rest.
    pub fn apply_cell_cutoff(
        &self,
        data: &mut dyn SequenceStore,
        backup: &DataSnapshot,
        cutoff: usize,
    ) {
        let n_taxa = backup.n_taxa();
        for site in 0..backup.n_sites() {
            for taxon in 0..n_taxa {
                let value = if self.cell_rank[site * n_taxa + taxon] < cutoff {
                    backup.state(taxon, site)
                } else {
                    None
                };
                data.set_state(taxon, site, value);
            }
        }
        data.fill_missing_map();
    }

    /// Keeps the `round(frac * n_sites)` lowest-ranked sites and masks every
    /// other site entirely.
    pub fn apply_empirical_fraction(
        &self,
        data: &mut dyn SequenceStore,
        backup: &DataSnapshot,
        frac: f64,
    ) -> usize {
        let keep = (frac.clamp(0.0, 1.0) * backup.n_sites() as f64).round() as usize;
        for site in 0..backup.n_sites() {
            let kept = self.site_rank[site] < keep;
            for taxon in 0..backup.n_taxa() {
                data.set_state(taxon, site, if kept { backup.state(taxon, site) } else { None });
            }
        }
        data.fill_missing_map();
        keep
    }
}

fn to_ranks(buffer: &[i64], field: &str) -> Result<Vec<usize>, PbxError> {
    let mut seen = vec![false; buffer.len()];
    buffer
        .iter()
        .enumerate()
        .map(|(at, &value)| {
            let rank = usize::try_from(value)
                .ok()
                .filter(|&rank| rank < buffer.len())
                .ok_or_else(|| {
                    PbxError::Protocol(
                        ErrorInfo::new("rank-range", format!("{field} entry is not a rank"))
                            .with_context("value", value)
                            .with_context("len", buffer.len()),
                    )
                })?;
            if std::mem::replace(&mut seen[rank], true) {
                return Err(PbxError::Protocol(
                    ErrorInfo::new("rank-duplicate", format!("{field} is not a permutation"))
                        .with_context("value", value)
                        .with_context("position", at),
                ));
            }
            Ok(rank)
        })
        .collect()
}
