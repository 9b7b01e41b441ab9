//! Error type shared by every quartetfit-core operation.

use std::fmt;
use std::path::PathBuf;

/// Errors produced by network handling, preconditions, optimization and simulation.
#[derive(Debug)]
pub enum Error {
    /// File I/O error with path context.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Malformed extended Newick text.
    Newick(String),
    /// JSON (de)serialization of a dataset or report.
    Json(serde_json::Error),
    /// Quartet data violating a precondition (CFs not summing to 1, bad gene counts).
    InvalidData(String),
    /// A taxon of the dataset is missing from the network.
    TaxonMismatch(String),
    /// Network is not of level 1.
    NotLevel1(String),
    /// A four-taxon set has no resolution in the network's major tree.
    UnresolvedQuartet(String),
    /// A branch length needed to compute expected CFs is missing.
    MissingBranchLength { edge: usize },
    /// Optimizer did not converge and the strict failure policy is active.
    Optimization(String),
    /// External gene-tree simulation failed for a replicate.
    Simulator { replicate: usize, message: String },
    /// Invalid parameters (counts, bounds, empty inputs).
    InvalidInput(String),
}

/// Result type alias for quartetfit-core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Newick(msg) => write!(f, "Newick parse error: {msg}"),
            Self::Json(err) => write!(f, "JSON error: {err}"),
            Self::InvalidData(msg) => write!(f, "invalid quartet data: {msg}"),
            Self::TaxonMismatch(msg) => write!(f, "taxon mismatch: {msg}"),
            Self::NotLevel1(msg) => write!(f, "network is not level-1: {msg}"),
            Self::UnresolvedQuartet(msg) => write!(f, "unresolved four-taxon set: {msg}"),
            Self::MissingBranchLength { edge } => {
                write!(f, "missing branch length on edge {edge}")
            }
            Self::Optimization(msg) => write!(f, "optimization failed: {msg}"),
            Self::Simulator { replicate, message } => {
                write!(f, "simulation failed for replicate {replicate}: {message}")
            }
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
