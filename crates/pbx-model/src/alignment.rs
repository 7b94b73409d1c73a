use std::fs;
use std::path::Path;

use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use serde::{Deserialize, Serialize};

/// Narrow view of an alignment used by workers and likelihood engines.
pub trait SequenceStore: Send {
    /// Number of taxa (rows).
    fn n_taxa(&self) -> usize;
    /// Number of sites (columns).
    fn n_sites(&self) -> usize;
    /// Size of the state space.
    fn dim(&self) -> usize;
    /// Observed state of a cell, `None` when missing.
    fn state(&self, taxon: usize, site: usize) -> Option<usize>;
    /// Overwrites a cell; `None` marks it missing.
    fn set_state(&mut self, taxon: usize, site: usize, state: Option<usize>);
    /// Rebuilds the per-site missing-data map after cells were changed.
    fn fill_missing_map(&mut self);
    /// Whether the site has at least one observed cell, per the last map fill.
    fn is_active(&self, site: usize) -> bool;
}

/// JSON alignment document: one string per taxon over a single-character alphabet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentDocument {
    /// Ordered state alphabet, e.g. `"ACGT"`.
    pub alphabet: String,
    /// Taxon names in row order.
    pub taxa: Vec<String>,
    /// One sequence per taxon, all of equal length.
    pub sequences: Vec<String>,
}

/// In-memory taxa × sites matrix of state indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    alphabet: Vec<char>,
    taxa: Vec<String>,
    n_sites: usize,
    cells: Vec<Option<u16>>,
    observed: Vec<usize>,
}

impl Alignment {
    /// Builds an alignment from state indices given row by row.
    pub fn from_states(
        alphabet: &str,
        taxa: Vec<String>,
        rows: Vec<Vec<Option<usize>>>,
    ) -> Result<Self, PbxError> {
        let alphabet: Vec<char> = alphabet.chars().collect();
        if taxa.len() != rows.len() {
            return Err(PbxError::Data(
                ErrorInfo::new("taxa-rows", "taxon names and rows disagree")
                    .with_context("taxa", taxa.len())
                    .with_context("rows", rows.len()),
            ));
        }
        let n_sites = rows.first().map(Vec::len).unwrap_or(0);
        let mut cells = Vec::with_capacity(rows.len() * n_sites);
        for (taxon, row) in rows.iter().enumerate() {
            if row.len() != n_sites {
                return Err(PbxError::Data(
                    ErrorInfo::new("ragged-alignment", "sequences have different lengths")
                        .with_context("taxon", &taxa[taxon])
                        .with_context("expected", n_sites)
                        .with_context("found", row.len()),
                ));
            }
            for &cell in row {
                match cell {
                    Some(state) if state >= alphabet.len() => {
                        return Err(PbxError::Data(
                            ErrorInfo::new("state-range", "state index outside the alphabet")
                                .with_context("taxon", &taxa[taxon])
                                .with_context("state", state),
                        ));
                    }
                    Some(state) => cells.push(Some(state as u16)),
                    None => cells.push(None),
                }
            }
        }
        let mut alignment = Self {
            alphabet,
            taxa,
            n_sites,
            cells,
            observed: Vec::new(),
        };
        alignment.fill_missing_map();
        Ok(alignment)
    }

    /// Parses a document; characters outside the alphabet are missing data.
    pub fn from_document(document: &AlignmentDocument) -> Result<Self, PbxError> {
        let alphabet: Vec<char> = document.alphabet.chars().collect();
        if alphabet.len() < 2 {
            return Err(PbxError::Data(
                ErrorInfo::new("alphabet", "alphabet needs at least two states")
                    .with_context("alphabet", &document.alphabet),
            ));
        }
        let rows = document
            .sequences
            .iter()
            .map(|sequence| {
                sequence
                    .chars()
                    .map(|c| {
                        let upper = c.to_ascii_uppercase();
                        alphabet.iter().position(|&a| a.to_ascii_uppercase() == upper)
                    })
                    .collect()
            })
            .collect();
        Self::from_states(&document.alphabet, document.taxa.clone(), rows)
    }

    /// Loads a JSON alignment document from disk.
    pub fn load(path: &Path) -> Result<Self, PbxError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PbxError::Data(
                ErrorInfo::new("alignment-read", err.to_string()).with_context("path", path.display()),
            )
        })?;
        let document: AlignmentDocument = serde_json::from_str(&contents).map_err(|err| {
            PbxError::Data(
                ErrorInfo::new("alignment-parse", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        Self::from_document(&document)
    }

    /// Ordered alphabet.
    pub fn alphabet(&self) -> &[char] {
        &self.alphabet
    }

    /// Taxon names.
    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    /// Number of distinct observed states in a site column.
    pub fn distinct_states(&self, site: usize) -> usize {
        let mut seen = vec![false; self.alphabet.len()];
        for taxon in 0..self.taxa.len() {
            if let Some(state) = self.state(taxon, site) {
                seen[state] = true;
            }
        }
        seen.into_iter().filter(|&flag| flag).count()
    }

    fn cell_index(&self, taxon: usize, site: usize) -> usize {
        taxon * self.n_sites + site
    }
}

impl SequenceStore for Alignment {
    fn n_taxa(&self) -> usize {
        self.taxa.len()
    }

    fn n_sites(&self) -> usize {
        self.n_sites
    }

    fn dim(&self) -> usize {
        self.alphabet.len()
    }

    fn state(&self, taxon: usize, site: usize) -> Option<usize> {
        self.cells[self.cell_index(taxon, site)].map(usize::from)
    }

    fn set_state(&mut self, taxon: usize, site: usize, state: Option<usize>) {
        let index = self.cell_index(taxon, site);
        self.cells[index] = state.map(|s| s as u16);
    }

    fn fill_missing_map(&mut self) {
        self.observed = (0..self.n_sites)
            .map(|site| {
                (0..self.taxa.len())
                    .filter(|&taxon| self.cells[self.cell_index(taxon, site)].is_some())
                    .count()
            })
            .collect();
    }

    fn is_active(&self, site: usize) -> bool {
        self.observed.get(site).copied().unwrap_or(0) > 0
    }
}
