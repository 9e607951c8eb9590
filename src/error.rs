//! Error types shared across the worker.
//!
//! Subsystem-specific errors that never leave their module (queue, mail,
//! configuration, stage execution) live next to their code. The types here
//! cross module boundaries:
//! - Job specification decoding
//! - Database params sidecar access
//! - Result archive creation
//! - Execution failures reported in a job outcome

use std::path::PathBuf;

use thiserror::Error;

use crate::runner::StageError;

/// Errors that can occur while loading a job specification file.
#[derive(Debug, Error)]
pub enum JobSpecError {
    #[error("Failed to read job specification '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode job specification '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur while reading or writing a database params sidecar.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Failed to read params '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse params '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write params '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while building a result archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive input '{path}' is missing or unreadable: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No files in '{0}' matched the archive rules")]
    EmptySelection(PathBuf),

    #[error("Archive input '{0}' has no file name")]
    NoFileName(PathBuf),

    #[error("Failed to finalize archive '{path}': {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cause of an `ExecutionFailure` outcome.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Stage failed: {0}")]
    Stage(#[from] StageError),

    #[error("Params error: {0}")]
    Params(#[from] ParamsError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Invalid alignment mode '{0}'")]
    InvalidMode(String),

    #[error("Search request names no database")]
    NoDatabases,

    #[error("Failed to render argument template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Database '{path}' failed validation: {reason}")]
    DatabaseCheck { path: PathBuf, reason: String },

    #[error("Background task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
