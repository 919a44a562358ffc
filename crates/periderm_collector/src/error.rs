//! Collector error types.

use periderm_protocol::{ErrorKind, OpCode, ProtocolError};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("orchestrator returned {kind}: {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("connection closed before a response")]
    ConnectionClosed,

    #[error("response correlates request {got} but {sent} was sent")]
    RequestMismatch { sent: u64, got: u64 },

    #[error("unexpected response opcode {0:?}")]
    UnexpectedOpcode(OpCode),

    #[error("invalid server name in {0}")]
    InvalidServerName(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}
