use crate::types::StreamId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergerError {
    #[error("No sources registered")]
    NoSources,

    #[error("Playback failed for stream {stream_id}: {reason}")]
    PlaybackFailed { stream_id: StreamId, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session has been cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MergerError>;
