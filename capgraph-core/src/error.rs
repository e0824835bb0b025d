//! Error type shared by every core operation

use std::path::PathBuf;
use thiserror::Error;

use crate::models::IdPrefix;

/// Errors that can occur while reading or rewriting the document corpus
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Path escapes its storage root: {0}")]
    PathTraversal(PathBuf),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Could not parse document: {0}")]
    ParseFailure(String),

    #[error("No free {0} identifier left after retries and sequential search")]
    CollisionExhausted(IdPrefix),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Timeout waiting for lock on {0} - another process may be editing it")]
    LockTimeout(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Failures on a non-primary document that a corpus-wide pass may log and skip
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphError::ParseFailure(_) | GraphError::DocumentNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
