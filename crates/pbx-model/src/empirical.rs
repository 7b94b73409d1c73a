use std::fmt::Write as _;
use std::io::Read;

use pbx_core::errors::ErrorInfo;
use pbx_core::numeric::{dirichlet_log_density, gamma_log_density};
use pbx_core::PbxError;
use serde::{Deserialize, Serialize};

use crate::state::{Dimensions, GlobalParameterState};

/// Model switches that decide which hyperparameters are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelFlags {
    /// Dirichlet weights carry their own hyperprior (no empirical pairs for them).
    #[serde(default)]
    pub dirichlet_weight_prior: bool,
    /// The number of components is fixed.
    #[serde(default)]
    pub fix_components: bool,
    /// Exchangeabilities are fixed (no empirical pairs for them).
    #[serde(default)]
    pub fix_exchangeabilities: bool,
}

/// Which optional blocks are present in an empirical prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmpiricalLayout {
    /// Per-dimension Dirichlet weight pairs.
    pub dirichlet_weights: bool,
    /// Fixed frequency vector (single fixed component).
    pub frequencies: bool,
    /// Per-pair exchangeability pairs.
    pub exchangeabilities: bool,
}

impl EmpiricalLayout {
    /// Derives the layout from the model flags and the active component count.
    pub fn from_flags(flags: &ModelFlags, component_count: usize) -> Self {
        Self {
            dirichlet_weights: !flags.dirichlet_weight_prior,
            frequencies: flags.fix_components && component_count == 1,
            exchangeabilities: !flags.fix_exchangeabilities,
        }
    }

    /// Number of doubles in the broadcast buffer.
    pub fn buffer_len(&self, dims: &Dimensions) -> usize {
        let mut len = 2 + 2 * dims.n_branch;
        if self.dirichlet_weights {
            len += 2 * dims.dim;
        }
        if self.frequencies {
            len += dims.dim;
        }
        if self.exchangeabilities {
            len += 2 * dims.n_rr;
        }
        len
    }
}

/// Gamma `(shape, rate)` pair.
pub type GammaPair = (f64, f64);

/// Empirical-Bayes hyperparameters computed from a previous run.
///
/// Text layout (whitespace separated, the order written by the `posthyper`
/// analysis): alpha pair; Dirichlet weight pairs; frequencies; exchangeability
/// pairs; branch pairs for branches `1..n_branch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalPrior {
    /// Prior on the rate-heterogeneity shape.
    pub alpha: GammaPair,
    /// Priors on the Dirichlet weights.
    pub dirichlet_weights: Option<Vec<GammaPair>>,
    /// Dirichlet concentrations for a single fixed profile.
    pub frequencies: Option<Vec<f64>>,
    /// Priors on the exchangeabilities.
    pub exchangeabilities: Option<Vec<GammaPair>>,
    /// Priors on branch lengths; entry 0 is unused and left at `(0, 0)`.
    pub branch_lengths: Vec<GammaPair>,
}

impl EmpiricalPrior {
    /// Returns the layout this prior was built with.
    pub fn layout(&self) -> EmpiricalLayout {
        EmpiricalLayout {
            dirichlet_weights: self.dirichlet_weights.is_some(),
            frequencies: self.frequencies.is_some(),
            exchangeabilities: self.exchangeabilities.is_some(),
        }
    }

    /// Parses the text layout.
    pub fn parse<R: Read>(
        mut reader: R,
        layout: EmpiricalLayout,
        dims: &Dimensions,
    ) -> Result<Self, PbxError> {
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(|err| {
            PbxError::Serde(ErrorInfo::new("empirical-prior-read", err.to_string()))
        })?;
        let mut tokens = TokenStream {
            tokens: text.split_whitespace().collect(),
            at: 0,
        };
        let alpha = tokens.next_pair()?;
        let dirichlet_weights = if layout.dirichlet_weights {
            Some(tokens.pairs(dims.dim)?)
        } else {
            None
        };
        let frequencies = if layout.frequencies {
            let mut values = Vec::with_capacity(dims.dim);
            for _ in 0..dims.dim {
                values.push(tokens.next_value()?);
            }
            Some(values)
        } else {
            None
        };
        let exchangeabilities = if layout.exchangeabilities {
            Some(tokens.pairs(dims.n_rr)?)
        } else {
            None
        };
        let mut branch_lengths = vec![(0.0, 0.0); dims.n_branch];
        for pair in branch_lengths.iter_mut().skip(1) {
            *pair = tokens.next_pair()?;
        }
        Ok(Self {
            alpha,
            dirichlet_weights,
            frequencies,
            exchangeabilities,
            branch_lengths,
        })
    }

    /// Renders the text layout read by [`EmpiricalPrior::parse`].
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}\t{}", self.alpha.0, self.alpha.1);
        out.push('\n');
        if let Some(pairs) = &self.dirichlet_weights {
            for (shape, rate) in pairs {
                let _ = writeln!(out, "{shape}\t{rate}");
            }
            out.push('\n');
        }
        if let Some(frequencies) = &self.frequencies {
            for value in frequencies {
                let _ = write!(out, "{value}\t");
            }
            out.push_str("\n\n");
        }
        if let Some(pairs) = &self.exchangeabilities {
            for (shape, rate) in pairs {
                let _ = writeln!(out, "{shape}\t{rate}");
            }
            out.push('\n');
        }
        for (shape, rate) in self.branch_lengths.iter().skip(1) {
            let _ = writeln!(out, "{shape}\t{rate}");
        }
        out
    }

    /// Flattens the prior into the broadcast buffer.
    pub fn to_buffer(&self) -> Vec<f64> {
        fn push_pairs(buffer: &mut Vec<f64>, pairs: &[GammaPair]) {
            buffer.extend(pairs.iter().map(|pair| pair.0));
            buffer.extend(pairs.iter().map(|pair| pair.1));
        }
        let mut buffer = vec![self.alpha.0, self.alpha.1];
        if let Some(pairs) = &self.dirichlet_weights {
            push_pairs(&mut buffer, pairs);
        }
        if let Some(frequencies) = &self.frequencies {
            buffer.extend_from_slice(frequencies);
        }
        if let Some(pairs) = &self.exchangeabilities {
            push_pairs(&mut buffer, pairs);
        }
        push_pairs(&mut buffer, &self.branch_lengths);
        buffer
    }

    /// Rebuilds a prior from a broadcast buffer.
    pub fn from_buffer(
        buffer: &[f64],
        layout: EmpiricalLayout,
        dims: &Dimensions,
    ) -> Result<Self, PbxError> {
        let expected = layout.buffer_len(dims);
        if buffer.len() != expected {
            return Err(PbxError::Protocol(
                ErrorInfo::new("empirical-prior-size", "empirical prior buffer has the wrong size")
                    .with_context("expected", expected)
                    .with_context("found", buffer.len()),
            ));
        }
        let mut cursor = BufferCursor { buffer, at: 0 };
        let alpha_block = cursor.take(2);
        let alpha = (alpha_block[0], alpha_block[1]);
        let dirichlet_weights = if layout.dirichlet_weights {
            Some(cursor.pairs(dims.dim))
        } else {
            None
        };
        let frequencies = if layout.frequencies {
            Some(cursor.take(dims.dim).to_vec())
        } else {
            None
        };
        let exchangeabilities = if layout.exchangeabilities {
            Some(cursor.pairs(dims.n_rr))
        } else {
            None
        };
        let branch_lengths = cursor.pairs(dims.n_branch);
        Ok(Self {
            alpha,
            dirichlet_weights,
            frequencies,
            exchangeabilities,
            branch_lengths,
        })
    }

    /// Log prior density of `state` under the empirical hyperparameters.
    pub fn log_density(&self, state: &GlobalParameterState) -> f64 {
        let mut total = gamma_log_density(state.alpha, self.alpha.0, self.alpha.1);
        if let Some(pairs) = &self.dirichlet_weights {
            for (&value, &(shape, rate)) in state.dirichlet_weights.iter().zip(pairs) {
                total += gamma_log_density(value, shape, rate);
            }
        }
        if let Some(frequencies) = &self.frequencies {
            if let Some(component) = state.components.first() {
                total += dirichlet_log_density(&component.profile, frequencies);
            }
        }
        if let Some(pairs) = &self.exchangeabilities {
            for (&value, &(shape, rate)) in state.exchangeabilities.iter().zip(pairs) {
                total += gamma_log_density(value, shape, rate);
            }
        }
        for (&value, &(shape, rate)) in state
            .branch_lengths
            .iter()
            .zip(&self.branch_lengths)
            .skip(1)
        {
            total += gamma_log_density(value, shape, rate);
        }
        total
    }
}

struct TokenStream<'a> {
    tokens: Vec<&'a str>,
    at: usize,
}

impl TokenStream<'_> {
    fn next_value(&mut self) -> Result<f64, PbxError> {
        let token = self.tokens.get(self.at).ok_or_else(|| {
            PbxError::Serde(ErrorInfo::new(
                "empirical-prior-truncated",
                "empirical prior ended early",
            ))
        })?;
        let value = token.parse::<f64>().map_err(|err| {
            PbxError::Serde(
                ErrorInfo::new("empirical-prior-parse", err.to_string())
                    .with_context("token", self.at)
                    .with_context("value", token),
            )
        })?;
        self.at += 1;
        Ok(value)
    }

    fn next_pair(&mut self) -> Result<GammaPair, PbxError> {
        Ok((self.next_value()?, self.next_value()?))
    }

    fn pairs(&mut self, n: usize) -> Result<Vec<GammaPair>, PbxError> {
        (0..n).map(|_| self.next_pair()).collect()
    }
}

struct BufferCursor<'a> {
    buffer: &'a [f64],
    at: usize,
}

impl<'a> BufferCursor<'a> {
    fn take(&mut self, n: usize) -> &'a [f64] {
        let slice = &self.buffer[self.at..self.at + n];
        self.at += n;
        slice
    }

    /// Shapes block followed by rates block.
    fn pairs(&mut self, n: usize) -> Vec<GammaPair> {
        let shapes = self.take(n);
        let rates = self.take(n);
        shapes.iter().copied().zip(rates.iter().copied()).collect()
    }
}
