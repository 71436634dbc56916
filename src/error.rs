use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures. These abort the current session (and a batch run).
///
/// Line-level anomalies in a task log are not errors: they are collected as
/// [`Diagnostic`](crate::parser::Diagnostic)s on the parse report instead.
#[derive(Debug, Error)]
pub enum ConvError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("No files matching '{select}' found in {folder}")]
    NoFiles { folder: PathBuf, select: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sync file line {line}: {reason}")]
    Sync { line: u64, reason: String },

    #[error("Invalid recording file {path}: {reason}")]
    InvalidRecording { path: PathBuf, reason: String },

    #[error("Invalid task record: {0}")]
    InvalidTask(String),

    #[error("Container error: {0}")]
    Container(String),
}

pub type Result<T> = std::result::Result<T, ConvError>;
