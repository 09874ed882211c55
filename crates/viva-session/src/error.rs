//! Error types for interview sessions

use thiserror::Error;
use viva_voice::VoiceError;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Microphone unavailable: {0}")]
    Microphone(#[source] VoiceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session service returned {status}: {detail}")]
    Service { status: u16, detail: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the duplex audio channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
}
