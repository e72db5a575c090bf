//! Errors in the library.
use std::path::PathBuf;
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug)]
pub enum ImpalaError {
    /// Batch dimensions are inconsistent with the declared sizes or shape.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A loss or a probability distribution is not finite.
    #[error("Numeric instability: {0}")]
    NumericInstability(String),

    /// A checkpoint directory or file does not exist.
    #[error("Checkpoint not found: {0:?}")]
    CheckpointNotFound(PathBuf),

    /// A configuration parameter is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),
}
