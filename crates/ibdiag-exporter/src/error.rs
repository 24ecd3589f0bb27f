//! Error types for ibdiag-exporter

use std::path::PathBuf;
use thiserror::Error;

/// Exporter errors
///
/// Only structural and I/O failures are represented here. Lines that match no
/// grammar and counters that fail to decode are absorbed by the extractors.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// A dump or snapshot file could not be read or written
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted baseline snapshot is present but unreadable
    #[error("Malformed baseline snapshot {}: {message}", .path.display())]
    Baseline { path: PathBuf, message: String },

    /// A line grammar failed to compile
    #[error("Grammar '{grammar}' failed to compile: {source}")]
    Grammar {
        grammar: &'static str,
        #[source]
        source: regex::Error,
    },

    /// A block did not start with a recognizable header line
    #[error("Block does not begin with a valid header: {excerpt:?}")]
    MalformedHeader { excerpt: String },

    /// Metric registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Staging a fresh dump failed
    #[error("Refresh error: {0}")]
    Refresh(String),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

impl ExporterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExporterError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a header error that carries the first line of the offending block
    pub(crate) fn malformed_header(block: &str) -> Self {
        let excerpt = block.lines().next().unwrap_or_default();
        ExporterError::MalformedHeader {
            excerpt: excerpt.chars().take(120).collect(),
        }
    }
}

/// Result type for exporter operations
pub type Result<T> = std::result::Result<T, ExporterError>;
