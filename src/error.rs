use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CdsError {
    #[error("invalid dimension: {0}")]
    #[diagnostic(help("split keys must name dimensions present in the filter"))]
    InvalidDimension(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("request of {size} elements exceeds selection limit {limit}, nothing left to split")]
    SelectionLimitExceeded { size: u64, limit: u64 },

    #[error("metadata lookup failed: {0}")]
    MetadataUnavailable(String),

    #[error("metadata service returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("cutoff {cutoff} not found in reference axis (first {first}, last {last})")]
    #[diagnostic(help("the cutoff must fall inside the temporal domain the store publishes"))]
    CutoffNotFound {
        cutoff: String,
        first: String,
        last: String,
    },

    #[error("invalid duration: {0}")]
    #[diagnostic(help("examples of valid durations: '8h', '2D 8h 5m 2s', '2m4.3s'"))]
    InvalidDuration(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("failed to relocate {path}: {message}")]
    RelocationFailed { path: PathBuf, message: String },

    #[error("missing job file cds-job.json in current directory")]
    MissingConfig,

    #[error("failed to read job file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON job file: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}
