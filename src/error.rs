use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a whole run. Problems with a single file, film or actor
/// go into a [`crate::report::FailureReport`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The filename pattern does not compile
    #[error("invalid filename pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The filename pattern compiles but lacks a required capture group
    #[error("filename pattern {pattern:?} has no named group `{group}`")]
    MissingGroup { pattern: String, group: &'static str },

    #[error("cannot read library root {path:?}: {source}")]
    UnreadableRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input produced by an earlier command is missing
    #[error("{path:?} not found, run `{command}` first")]
    MissingInput { path: PathBuf, command: &'static str },

    #[error("metadata provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("checkpoint {path:?} is unreadable at line {line}: {reason}")]
    CheckpointCorruption {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(
        "cannot hard-link {source_path:?} into {link:?}: they are on different volumes (use symlinks instead)"
    )]
    CrossDevice { source_path: PathBuf, link: PathBuf },

    #[error("malformed row {line} in {path:?}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
