//! Protocol error types

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unrecognized protocol tag: {0:?}")]
    BadTag(Vec<u8>),

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("unrecognized service type: {0}")]
    UnknownService(u8),

    #[error("expected at least {expected} frames, got {got}")]
    TooFewFrames { expected: usize, got: usize },

    #[error("malformed length-prefixed field: {0}")]
    BadLengthPrefix(&'static str),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("uuid parse error: {0}")]
    UuidError(#[from] uuid::Error),
}
