//! Typed errors for the bundle augmentation core.
//!
//! Command code wraps these in `anyhow` with context; tests downcast back to
//! `AugmentError` to check the kind.
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = AugmentError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum AugmentError {
    #[error("parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unexpected document structure in {}: {reason}", path.display())]
    Schema { path: PathBuf, reason: String },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("bad archive {}: {reason}", path.display())]
    BadArchive { path: PathBuf, reason: String },

    #[error("working directory {} is not a previous unpack: {reason}", path.display())]
    WorkDirInUse { path: PathBuf, reason: String },

    #[error("invalid direction '{value}' (expected Request or Response)")]
    InvalidDirection { value: String },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shared flow name for policy '{policy}' is empty")]
    EmptySharedFlow { policy: String },

    #[error("invalid policy name '{name}'")]
    InvalidPolicyName { name: String },

    #[error("override flows {flows:?} were given without override shared flows")]
    MissingOverridePolicies { flows: Vec<String> },

    #[error("{operation} failed with HTTP {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} request failed: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("config: {0}")]
    Config(String),
}

impl AugmentError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AugmentError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        AugmentError::NotFound {
            what,
            name: name.into(),
        }
    }
}
