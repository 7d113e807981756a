//! Error types for the telemetry pipeline

use std::path::PathBuf;
use thiserror::Error;

use crate::reading::Reading;

/// Errors raised while building or feeding the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bounded source queue is at capacity; the rejected reading is handed back
    #[error("Queue full for source {source_id} (capacity: {capacity})")]
    QueueFull {
        source_id: String,
        capacity: usize,
        reading: Box<Reading>,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for our schema
    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Per-reading failure reported by a downstream sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink refused this particular reading
    #[error("Reading rejected: {0}")]
    Rejected(String),

    /// The far end is gone
    #[error("Sink disconnected: {0}")]
    Disconnected(String),

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire encoding failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Payload ended before the frame was complete
    #[error("Truncated payload: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Source id is not valid UTF-8: {0}")]
    InvalidSourceId(#[from] std::string::FromUtf8Error),

    /// Bytes left over after a complete frame
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// Source id does not fit the u16 length prefix
    #[error("Source id too long: {len} bytes (max: {max})")]
    SourceIdTooLong { len: usize, max: usize },
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
