//! Orchestrator error types and their wire mapping.

use periderm_protocol::{ErrorKind, ErrorPayload};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown scan ID {0}")]
    ScanNotFound(String),

    #[error("{0} is unimplemented")]
    Unimplemented(&'static str),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error("analyzer {analyzer} failed: {message}")]
    Analyzer { analyzer: String, message: String },

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Chunk stream violations detected while merging a submitted file.
#[derive(Error, Debug)]
pub enum ReassemblyError {
    #[error("file {path}: chunk at offset {offset} overlaps the {have} bytes already buffered")]
    OverlappingChunks { path: String, offset: u64, have: u64 },

    #[error("file {path}: chunk at offset {offset} leaves a gap after {have} buffered bytes")]
    MissingChunks { path: String, offset: u64, have: u64 },

    #[error("file {path}: chunks total {got} bytes, more than the declared size {declared}")]
    DeclaredSizeExceeded { path: String, declared: u64, got: u64 },
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            OrchestratorError::ScanNotFound(_) => ErrorKind::NotFound,
            OrchestratorError::Unimplemented(_) => ErrorKind::Unimplemented,
            OrchestratorError::Reassembly(ReassemblyError::OverlappingChunks { .. }) => {
                ErrorKind::OverlappingChunks
            }
            OrchestratorError::Reassembly(ReassemblyError::MissingChunks { .. }) => {
                ErrorKind::MissingChunks
            }
            // A chunk stream running past the declared size means the
            // metadata and the content disagree.
            OrchestratorError::Reassembly(ReassemblyError::DeclaredSizeExceeded { .. }) => {
                ErrorKind::InvalidArgument
            }
            OrchestratorError::Analyzer { .. } => ErrorKind::AnalyzerError,
            OrchestratorError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            OrchestratorError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
