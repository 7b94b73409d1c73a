//! Structured error types shared across pbx crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`PbxError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Ranks, buffer sizes or site indices involved, keyed by name.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// What the user can change to get past the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Payload without context or hint.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Records `key = value`; a repeated key keeps the last value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Attaches a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the distributed sampler.
///
/// `Protocol` and `Model` errors are fatal for the whole ensemble: a participant
/// that observes one stops, and the remaining participants see their peer
/// disconnect on the next collective call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum PbxError {
    /// Protocol and invariant violations during a session: size mismatches, lost
    /// peers, zero total likelihood, sampled indices out of range.
    #[error("protocol error: {0}")]
    Protocol(ErrorInfo),
    /// Parameter state violations: invalid allocations, negative weights.
    #[error("model error: {0}")]
    Model(ErrorInfo),
    /// User configuration errors detected before a session starts.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Alignment and input data errors.
    #[error("data error: {0}")]
    Data(ErrorInfo),
    /// Serialization, schema and file system errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

/// `message [code] key=value ... (hint: ...)`
impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.code)?;
        for (key, value) in &self.context {
            write!(f, " {key}={value}")?;
        }
        match &self.hint {
            Some(hint) => write!(f, " (hint: {hint})"),
            None => Ok(()),
        }
    }
}

impl PbxError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            PbxError::Protocol(info)
            | PbxError::Model(info)
            | PbxError::Config(info)
            | PbxError::Data(info)
            | PbxError::Serde(info) => info,
        }
    }

    /// Shorthand for a configuration error without context.
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        PbxError::Config(ErrorInfo::new(code, message))
    }

    /// Wraps an I/O failure on `path` as a serde-family error.
    pub fn io(code: impl Into<String>, err: std::io::Error, path: &std::path::Path) -> Self {
        PbxError::Serde(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display()),
        )
    }

    /// Returns `true` for errors that must abort the whole ensemble.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PbxError::Protocol(_) | PbxError::Model(_))
    }
}
