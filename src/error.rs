// src/error.rs

//! Central error taxonomy for the conversion pipeline.
//!
//! Extraction and validation errors are fatal (archives are untrusted; fail
//! closed). Parsing ambiguities degrade to warnings inside the pipeline and
//! never surface here. Write failures are always fatal.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown archive format: {} (expected zip or tar+gzip)", .0.display())]
    UnknownFormat(PathBuf),

    #[error("{what} limit exceeded: {actual} > {limit}")]
    SizeLimitExceeded {
        what: &'static str,
        limit: u64,
        actual: u64,
    },

    #[error("Unsafe path in archive member: {0}")]
    UnsafePathEntry(String),

    #[error("Critical file missing from archive: {0}")]
    MissingCriticalFile(String),

    #[error("Malformed document {}: {}", .path.display(), .reason)]
    MalformedDocument { path: PathBuf, reason: String },

    #[error("Failed to write backup file {}: {}", .path.display(), .source)]
    WriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an XML parse failure with the document it came from.
    pub fn malformed(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::MalformedDocument {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
