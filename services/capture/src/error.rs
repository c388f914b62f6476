//! Error types shared by the sinks, the frame source and the orchestrator.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of a sink failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkErrorKind {
    /// Broker or database unreachable, or the connection dropped
    Connection,
    /// Operation exceeded its configured timeout
    Timeout,
    /// Record or image could not be encoded
    Serialization,
    /// Database rejected the row (duplicate key, not-null, ...)
    Constraint,
    /// Local filesystem failure
    Io,
}

impl fmt::Display for SinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkErrorKind::Connection => "connection",
            SinkErrorKind::Timeout => "timeout",
            SinkErrorKind::Serialization => "serialization",
            SinkErrorKind::Constraint => "constraint",
            SinkErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// A failed sink operation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{kind} error: {message}")]
pub struct SinkError {
    pub kind: SinkErrorKind,
    pub message: String,
}

impl SinkError {
    pub fn new(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Timeout, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Serialization, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Constraint, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Io, message)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::io(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::serialization(err.to_string())
    }
}

impl From<image::ImageError> for SinkError {
    fn from(err: image::ImageError) -> Self {
        SinkError::serialization(err.to_string())
    }
}

/// Errors raised by a frame source.
///
/// Any of these during grabbing is a source malfunction and ends the run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Frame source is not open")]
    NotOpen,

    #[error("Frame source is already open")]
    AlreadyOpen,

    #[error("Frame source has not been configured")]
    NotConfigured,

    #[error("Unsupported source option: {0}")]
    UnsupportedOption(String),

    #[error("Staging area unavailable: {0}")]
    Staging(String),

    #[error("Frame source malfunction: {0}")]
    Malfunction(String),
}

/// Run-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Database session could not be opened: {0}")]
    Database(#[source] SinkError),

    #[error("Frame source failed: {0}")]
    Source(#[from] SourceError),
}
