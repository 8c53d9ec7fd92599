//! Error types shared by the harness and the engine adapters.

use std::io;
use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error reported by a storage engine or one of its contexts.
///
/// [`EngineError::NotFound`] is an expected outcome: a missing key for `GET`/`DELETE`, or the
/// end of the cursor for `ITERATE`. Everything else fails the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,

    /// The engine cannot honor a requested mode, step or option.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

/// Top-level error of a benchmark run.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller configuration problem, detected before any worker starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// A key was reported missing and `ignore_not_found` is off.
    #[error("key {key} not found ({op}, doer #{doer})")]
    KeyNotFound {
        op: &'static str,
        doer: usize,
        key: String,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration file: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// The run was stopped because another worker failed or an interrupt arrived.
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Figment(Box::new(e))
    }
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
